//! Results Summary
//!
//! Turns a poll and a tally into what a results view shows: per-option
//! percentages, the winning set, remaining voting time and share links.

use super::model::{PollOption, PollPublic, Tally};
use chrono::{DateTime, Utc};
use std::fmt;

/// One option's row in a results view
#[derive(Debug, Clone, PartialEq)]
pub struct OptionResult {
    pub option: PollOption,
    pub count: u64,
    /// Share of all votes, 0.0..=100.0
    pub percentage: f64,
    /// Whether this option holds the maximum count (never set when no votes exist)
    pub winning: bool,
}

impl OptionResult {
    /// Percentage rounded to a whole number
    pub fn rounded_percentage(&self) -> u64 {
        self.percentage.round() as u64
    }

    /// e.g. `3 (50%)`
    pub fn count_label(&self) -> String {
        format!("{} ({}%)", self.count, self.rounded_percentage())
    }
}

/// Summary of a tally against the poll's options
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsSummary {
    pub rows: Vec<OptionResult>,
    /// Votes across the poll's options
    pub total: u64,
    /// Highest count among the poll's options
    pub max: u64,
}

impl ResultsSummary {
    /// Compute rows in option order. Options missing from the tally count as zero.
    pub fn compute(options: &[PollOption], tally: &Tally) -> Self {
        let counts: Vec<u64> = options.iter().map(|o| tally.count(&o.id)).collect();
        let total = counts.iter().fold(0u64, |acc, c| acc.saturating_add(*c));
        let max = counts.iter().copied().max().unwrap_or(0);

        let rows = options
            .iter()
            .zip(counts)
            .map(|(option, count)| OptionResult {
                option: option.clone(),
                count,
                percentage: percentage(count, total),
                winning: total > 0 && count == max,
            })
            .collect();

        Self { rows, total, max }
    }

    /// Option IDs in the winning set
    pub fn winners(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| r.winning)
            .map(|r| r.option.id.as_str())
            .collect()
    }
}

/// `count / total * 100`, with 0/0 defined as 0
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Time left until a poll stops accepting votes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRemaining {
    Closed,
    LessThanMinute,
    Remaining { days: i64, hours: i64, minutes: i64 },
}

impl TimeRemaining {
    pub fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let left = deadline - now;
        if left <= chrono::Duration::zero() {
            return TimeRemaining::Closed;
        }
        let minutes_total = left.num_minutes();
        if minutes_total == 0 {
            return TimeRemaining::LessThanMinute;
        }
        TimeRemaining::Remaining {
            days: minutes_total / (60 * 24),
            hours: (minutes_total / 60) % 24,
            minutes: minutes_total % 60,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TimeRemaining::Closed)
    }
}

impl fmt::Display for TimeRemaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRemaining::Closed => f.write_str("The poll has closed"),
            TimeRemaining::LessThanMinute => f.write_str("Closing in less than a minute"),
            TimeRemaining::Remaining {
                days,
                hours,
                minutes,
            } => {
                let parts: Vec<String> = [(*days, "day"), (*hours, "hour"), (*minutes, "min")]
                    .into_iter()
                    .filter(|(n, _)| *n > 0)
                    .map(|(n, unit)| format!("{} {}{}", n, unit, if n > 1 { "s" } else { "" }))
                    .collect();
                write!(f, "Closes in {}", parts.join(" "))
            }
        }
    }
}

/// Link to the voting page for a poll
pub fn vote_url(site_url: &str, poll_id: &str) -> String {
    format!(
        "{}/p/{}",
        site_url.trim_end_matches('/'),
        urlencoding::encode(poll_id)
    )
}

/// Link to the results page for a poll
pub fn results_url(site_url: &str, poll_id: &str) -> String {
    format!(
        "{}/r/{}",
        site_url.trim_end_matches('/'),
        urlencoding::encode(poll_id)
    )
}

/// Plain-text results block used by the CLI
pub fn render_results(poll: &PollPublic, tally: &Tally, live: bool) -> String {
    let summary = ResultsSummary::compute(&poll.options, tally);
    let mut out = String::new();

    out.push_str(&format!("[{}] Q: {}\n", poll.poll_id, poll.question));
    out.push_str(if live { "Live Results ●\n" } else { "Results ○\n" });
    for row in &summary.rows {
        let marker = if row.winning { '*' } else { ' ' };
        out.push_str(&format!(
            " {} {:<32} {}\n",
            marker,
            row.option.text,
            row.count_label()
        ));
    }
    out.push_str(&format!("{} votes cast.\n", summary.total));
    out
}
