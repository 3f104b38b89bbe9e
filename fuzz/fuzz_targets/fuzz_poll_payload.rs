#![no_main]

use libfuzzer_sys::fuzz_target;
use quickpoll::polls::{render_results, PollResults};

// Full results payloads, including timestamps with and without offsets.
fuzz_target!(|data: &[u8]| {
    let Ok(results) = serde_json::from_slice::<PollResults>(data) else {
        return;
    };

    let rendered = render_results(&results.poll, &results.votes, false);
    assert!(rendered.contains(&results.poll.poll_id));

    for option in &results.poll.options {
        let _ = results.poll.resolve_option(&option.text);
    }
});
