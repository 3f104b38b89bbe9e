//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `create` -- create a poll and remember its creator key
//! - `show` -- print a poll's public details
//! - `vote` -- cast a vote
//! - `results` -- print results, optionally following live updates
//! - `delete` -- delete a poll created from this device
//! - `mine` -- list polls created from this device
//! - `themes` -- list available poll themes
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use crate::api::{ApiClient, ApiError};
use crate::config::{self, ClientConfig};
use crate::live::{LiveResults, LiveState, Phase, WsConnector};
use crate::polls::summary::{render_results, results_url, vote_url, TimeRemaining};
use crate::polls::{NewPoll, PollTheme, VoteRequest};
use crate::store::{FileStore, MyPolls, RememberedPoll};
use clap::{Parser, Subcommand};
use std::sync::Arc;

/// Command-line client for Quick Poll.
#[derive(Parser, Debug)]
#[command(
    name = "quickpoll",
    version = env!("CARGO_PKG_VERSION"),
    about = "Create polls, vote, and watch results update live"
)]
pub struct Cli {
    /// Override the API root (e.g. http://localhost:8000/api).
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new poll.
    Create {
        /// The question to ask.
        question: String,

        /// An answer option (repeat 2-10 times).
        #[arg(short, long = "option", required = true)]
        options: Vec<String>,

        /// How long the poll accepts votes, in hours.
        #[arg(long, default_value_t = crate::polls::model::DEFAULT_DURATION_HOURS)]
        hours: u32,

        /// Visual theme (see `quickpoll themes`).
        #[arg(long, default_value = "default")]
        theme: String,

        /// Allow voters to pick more than one option.
        #[arg(long)]
        multiple: bool,

        /// Only the creator can see results.
        #[arg(long)]
        private: bool,

        /// Bot-verification token.
        #[arg(long)]
        token: String,
    },

    /// Print a poll's question, options and voting window.
    Show {
        poll_id: String,
    },

    /// Cast a vote.
    Vote {
        poll_id: String,

        /// Option to vote for: its ID, 1-based position, or text (repeat for multi-choice polls).
        #[arg(short, long = "option", required = true)]
        options: Vec<String>,

        /// Voter fingerprint (default: this device's stored ID).
        #[arg(long)]
        fingerprint: Option<String>,

        /// Bot-verification token.
        #[arg(long)]
        token: String,
    },

    /// Print results for a poll.
    Results {
        poll_id: String,

        /// Keep printing as votes come in, until the channel closes or Ctrl-C.
        #[arg(short, long)]
        watch: bool,
    },

    /// Delete a poll created from this device.
    Delete {
        poll_id: String,
    },

    /// List polls created from this device.
    Mine,

    /// List available poll themes.
    Themes,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the loaded configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Shared handles for commands that talk to the API
pub struct Context {
    pub config: ClientConfig,
    pub api: ApiClient,
    pub polls: MyPolls<FileStore>,
}

impl Context {
    pub fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let api = ApiClient::new(&config.api_url, config.request_timeout())?;
        let polls = MyPolls::new(FileStore::new(config.store_path()));
        Ok(Self { config, api, polls })
    }
}

/// Dispatch a parsed command
pub async fn run(cli: Cli, mut config: ClientConfig) -> CliResult {
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    let context = || Context::new(config.clone());

    match cli.command {
        Command::Create {
            question,
            options,
            hours,
            theme,
            multiple,
            private,
            token,
        } => {
            let poll = NewPoll::new(question, token)
                .with_options(options)
                .with_duration_hours(hours)
                .with_theme(PollTheme::from_key(&theme))
                .allow_multiple_choices(multiple)
                .public_results(!private);
            handle_create(&context()?, &poll).await
        }
        Command::Show { poll_id } => handle_show(&context()?, &poll_id).await,
        Command::Vote {
            poll_id,
            options,
            fingerprint,
            token,
        } => handle_vote(&context()?, &poll_id, &options, fingerprint, &token).await,
        Command::Results { poll_id, watch } => handle_results(&context()?, &poll_id, watch).await,
        Command::Delete { poll_id } => handle_delete(&context()?, &poll_id).await,
        Command::Mine => handle_mine(&context()?),
        Command::Themes => {
            handle_themes();
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => handle_config_show(&config),
        Command::Config(ConfigCommand::Path) => {
            println!("{}", config::get_config_path().display());
            Ok(())
        }
        Command::Version => {
            handle_version();
            Ok(())
        }
    }
}

/// Run the `create` subcommand.
pub async fn handle_create(ctx: &Context, poll: &NewPoll) -> CliResult {
    let created = ctx.api.create_poll(poll).await?;

    ctx.polls.append(
        RememberedPoll::new(&created.poll_id, &created.creator_key).with_theme(poll.theme),
    )?;

    println!("Poll created: {}", created.poll_id);
    println!("  Question:    {}", created.question);
    println!("  Voting ends: {}", created.active_until.to_rfc3339());
    println!("  Expires:     {}", created.expire_at.to_rfc3339());
    println!("  Vote link:   {}", vote_url(&ctx.config.site_url, &created.poll_id));
    println!("  Results:     {}", results_url(&ctx.config.site_url, &created.poll_id));
    Ok(())
}

/// Run the `show` subcommand.
pub async fn handle_show(ctx: &Context, poll_id: &str) -> CliResult {
    let poll = ctx.api.get_poll(poll_id).await.map_err(end_of_view)?;
    let now = chrono::Utc::now();

    println!("[{}] Q: {}", poll.poll_id, poll.question);
    for (i, option) in poll.options.iter().enumerate() {
        println!("  {}. {}  ({})", i + 1, option.text, option.id);
    }
    if poll.allow_multiple_choices {
        println!("Multiple choices allowed.");
    }
    println!("{}", TimeRemaining::until(poll.active_until, now));
    if ctx.polls.has_voted(poll_id)? {
        println!("You have already voted on this poll.");
    }
    Ok(())
}

/// Run the `vote` subcommand.
pub async fn handle_vote(
    ctx: &Context,
    poll_id: &str,
    selectors: &[String],
    fingerprint: Option<String>,
    token: &str,
) -> CliResult {
    let poll = ctx.api.get_poll(poll_id).await.map_err(end_of_view)?;

    if ctx.polls.has_voted(poll_id)? {
        println!("Results: {}", results_url(&ctx.config.site_url, poll_id));
        return Err(format!("You have already voted on poll '{}'.", poll_id).into());
    }
    if !poll.is_voting_active(chrono::Utc::now()) {
        println!("Results: {}", results_url(&ctx.config.site_url, poll_id));
        return Err(format!("Voting on poll '{}' has closed.", poll_id).into());
    }

    let mut option_ids = Vec::with_capacity(selectors.len());
    for selector in selectors {
        match poll.resolve_option(selector) {
            Some(id) if !option_ids.iter().any(|o| o == id) => option_ids.push(id.to_string()),
            Some(_) => {}
            None => {
                return Err(ApiError::Validation(format!(
                    "'{}' is not an option of this poll",
                    selector
                ))
                .into())
            }
        }
    }

    let fingerprint = match fingerprint {
        Some(fp) => fp,
        None => ctx.polls.device_id()?,
    };

    let vote = VoteRequest::new(option_ids, fingerprint, token);
    let receipt = ctx.api.cast_vote(&poll, &vote).await?;
    ctx.polls.mark_voted(poll_id)?;

    println!("{}", receipt.message);
    println!("Results: {}", results_url(&ctx.config.site_url, poll_id));
    Ok(())
}

/// Run the `results` subcommand.
pub async fn handle_results(ctx: &Context, poll_id: &str, watch: bool) -> CliResult {
    let creator_key = ctx.polls.creator_key(poll_id)?;

    if !watch {
        let results = ctx
            .api
            .get_results(poll_id, creator_key.as_deref())
            .await
            .map_err(end_of_view)?;
        print!("{}", render_results(&results.poll, &results.votes, false));
        return Ok(());
    }

    let connector = WsConnector::new(ctx.config.ws_url());
    let mut live = LiveResults::new(Arc::new(ctx.api.clone()), Arc::new(connector));
    let mut rx = live.subscribe();

    live.open(poll_id, creator_key.as_deref())
        .await
        .map_err(end_of_view)?;

    let mut was_live = false;
    loop {
        {
            let state = rx.borrow_and_update();
            if let (Phase::Ready, Some(poll)) = (&state.phase, &state.poll) {
                print!("{}", render_results(poll, &state.tally, state.is_live()));
                println!();
            }
            match state.live {
                LiveState::Live => was_live = true,
                LiveState::Disconnected if was_live => {
                    println!("Live updates stopped; showing last known results.");
                    break;
                }
                LiveState::Disconnected => {
                    println!("Live updates unavailable; showing snapshot.");
                    break;
                }
                LiveState::Connecting => {}
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    live.close().await;
    Ok(())
}

/// Run the `delete` subcommand.
pub async fn handle_delete(ctx: &Context, poll_id: &str) -> CliResult {
    let Some(creator_key) = ctx.polls.creator_key(poll_id)? else {
        return Err(format!("Poll '{}' was not created from this device.", poll_id).into());
    };

    ctx.api
        .delete_poll(poll_id, &creator_key)
        .await?;
    ctx.polls.remove(poll_id)?;

    println!("Deleted poll {}", poll_id);
    Ok(())
}

/// Run the `mine` subcommand.
pub fn handle_mine(ctx: &Context) -> CliResult {
    let polls = ctx.polls.list()?;
    if polls.is_empty() {
        println!("No polls created from this device yet.");
        return Ok(());
    }
    for poll in polls {
        let theme = poll.theme.unwrap_or_default();
        println!(
            "{:<32} {:<10} {}",
            poll.poll_id,
            theme,
            results_url(&ctx.config.site_url, &poll.poll_id)
        );
    }
    Ok(())
}

/// Run the `themes` subcommand.
pub fn handle_themes() {
    for theme in PollTheme::ALL {
        let palette = theme.palette();
        println!(
            "{:<10} {:<10} main {}  light {}  dark {}",
            theme.as_str(),
            theme.label(),
            palette.main,
            palette.light,
            palette.dark
        );
    }
}

/// Run the `config show` subcommand.
pub fn handle_config_show(config: &ClientConfig) -> CliResult {
    let mut value = serde_json::to_value(config)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("wsUrl".to_string(), config.ws_url().into());
        obj.insert(
            "storePath".to_string(),
            config.store_path().display().to_string().into(),
        );
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("quickpoll {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("QUICKPOLL_BUILD_DATE"));
    println!("  Git commit: {}", env!("QUICKPOLL_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A poll could not be shown. Anything but rejected input leaves nothing to
/// retry, so point the user at creating their own.
fn end_of_view(err: ApiError) -> Box<dyn std::error::Error> {
    if err.is_terminal_for_view() {
        eprintln!("Create your own poll: quickpoll create \"<question>\" -o <option> -o <option> --token <token>");
    }
    Box::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from([
            "quickpoll",
            "create",
            "Lunch?",
            "-o",
            "Pizza",
            "--option",
            "Sushi",
            "--private",
            "--theme",
            "seagreen",
            "--token",
            "tok",
        ])
        .unwrap();

        match cli.command {
            Command::Create {
                question,
                options,
                hours,
                theme,
                multiple,
                private,
                token,
            } => {
                assert_eq!(question, "Lunch?");
                assert_eq!(options, vec!["Pizza", "Sushi"]);
                assert_eq!(hours, 24);
                assert_eq!(theme, "seagreen");
                assert!(!multiple);
                assert!(private);
                assert_eq!(token, "tok");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_results_watch_with_global_api_url() {
        let cli = Cli::try_parse_from([
            "quickpoll",
            "results",
            "sleepy-blue-toaster",
            "--watch",
            "--api-url",
            "http://127.0.0.1:8000/api",
        ])
        .unwrap();

        assert_eq!(cli.api_url.as_deref(), Some("http://127.0.0.1:8000/api"));
        assert!(matches!(
            cli.command,
            Command::Results { ref poll_id, watch: true } if poll_id == "sleepy-blue-toaster"
        ));
    }

    #[test]
    fn test_vote_requires_option() {
        assert!(Cli::try_parse_from(["quickpoll", "vote", "p1", "--token", "t"]).is_err());
    }

    #[test]
    fn test_build_info_is_stamped() {
        let date = env!("QUICKPOLL_BUILD_DATE");
        let parts: Vec<&str> = date.split('-').collect();
        assert_eq!(parts.len(), 3, "unexpected build date {}", date);
        assert_eq!(parts[0].len(), 4);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
        assert!(!env!("QUICKPOLL_GIT_HASH").is_empty());
    }

    #[test]
    fn test_parse_config_path() {
        let cli = Cli::try_parse_from(["quickpoll", "config", "path"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
    }
}
