use clap::Parser;
use quickpoll::cli::{self, Cli};
use quickpoll::{config, logging};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Warning: {}", e);
    }

    if let Err(e) = cli::run(args, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
