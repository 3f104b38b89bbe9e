#![no_main]

use libfuzzer_sys::fuzz_target;
use quickpoll::live::TallyUpdate;
use quickpoll::polls::{PollOption, ResultsSummary};

// Push messages come straight off the wire. Decoding must never panic, and any
// tally that decodes must summarize cleanly.
fuzz_target!(|data: &[u8]| {
    let Ok(update) = TallyUpdate::from_slice(data) else {
        return;
    };

    let options: Vec<PollOption> = update
        .votes
        .iter()
        .map(|(id, _)| PollOption::new(id, id))
        .collect();
    let summary = ResultsSummary::compute(&options, &update.votes);

    for row in &summary.rows {
        assert!(row.percentage >= 0.0 && row.percentage <= 100.0);
        assert!(row.count <= summary.max);
    }
});
