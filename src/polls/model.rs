//! Poll Data Model
//!
//! Wire shapes exchanged with the polling API: poll metadata, vote tallies,
//! creation and vote payloads.

use super::theme::PollTheme;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum question length accepted by the API
pub const MAX_QUESTION_LEN: usize = 280;
/// Minimum number of options per poll
pub const MIN_OPTIONS: usize = 2;
/// Maximum number of options per poll
pub const MAX_OPTIONS: usize = 10;
/// Default voting window in hours
pub const DEFAULT_DURATION_HOURS: u32 = 24;

/// Poll option/choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    /// Option ID (unique within poll, assigned by the server)
    pub id: String,
    /// Option text/label
    pub text: String,
}

impl PollOption {
    /// Create a new poll option
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Vote counts keyed by option ID.
///
/// Always handled as a full snapshot: a newer tally replaces an older one
/// wholesale, and options missing from it count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count for an option, zero when absent
    pub fn count(&self, option_id: &str) -> u64 {
        self.0.get(option_id).copied().unwrap_or(0)
    }

    /// Sum of every count in the tally
    pub fn total(&self) -> u64 {
        self.0.values().fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Public poll metadata, visible to any voter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPublic {
    /// Human-readable poll ID (e.g. `sleepy-blue-toaster`)
    pub poll_id: String,
    /// Poll question
    pub question: String,
    /// Ordered options
    pub options: Vec<PollOption>,
    /// Whether voters may select more than one option
    #[serde(default)]
    pub allow_multiple_choices: bool,
    /// Visual theme tag
    #[serde(default)]
    pub theme: PollTheme,
    /// End of the voting window
    #[serde(with = "utc_timestamp")]
    pub active_until: DateTime<Utc>,
    /// When the server drops the poll entirely
    #[serde(with = "utc_timestamp")]
    pub expire_at: DateTime<Utc>,
    /// Whether results are visible without the creator key
    #[serde(default = "default_true")]
    pub public_results: bool,
}

fn default_true() -> bool {
    true
}

impl PollPublic {
    /// Whether the poll still accepts votes at `now`
    pub fn is_voting_active(&self, now: DateTime<Utc>) -> bool {
        now < self.active_until
    }

    /// Look up an option by ID
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// Resolve a user-supplied selector to an option ID.
    ///
    /// Accepts an exact option ID, a 1-based position, or the option text
    /// (case-insensitive).
    pub fn resolve_option(&self, selector: &str) -> Option<&str> {
        let selector = selector.trim();
        if let Some(opt) = self.option(selector) {
            return Some(opt.id.as_str());
        }
        if let Ok(position) = selector.parse::<usize>() {
            if position >= 1 {
                if let Some(opt) = self.options.get(position - 1) {
                    return Some(opt.id.as_str());
                }
            }
        }
        self.options
            .iter()
            .find(|o| o.text.eq_ignore_ascii_case(selector))
            .map(|o| o.id.as_str())
    }
}

/// Poll metadata plus the current tally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    #[serde(flatten)]
    pub poll: PollPublic,
    /// Vote counts per option
    pub votes: Tally,
}

/// Response to a successful poll creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollCreated {
    pub poll_id: String,
    /// Ownership credential; required to delete the poll or read private results
    pub creator_key: String,
    pub question: String,
    #[serde(with = "utc_timestamp")]
    pub active_until: DateTime<Utc>,
    #[serde(with = "utc_timestamp")]
    pub expire_at: DateTime<Utc>,
}

/// Request body for `POST /polls`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub duration_hours: u32,
    pub theme: PollTheme,
    pub allow_multiple_choices: bool,
    pub public_results: bool,
    /// Bot-verification token
    pub turnstile_token: String,
}

impl NewPoll {
    /// Create a new poll request with default flags
    pub fn new(question: impl Into<String>, turnstile_token: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
            duration_hours: DEFAULT_DURATION_HOURS,
            theme: PollTheme::Default,
            allow_multiple_choices: false,
            public_results: true,
            turnstile_token: turnstile_token.into(),
        }
    }

    /// Set options
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Set voting window in hours
    pub fn with_duration_hours(mut self, hours: u32) -> Self {
        self.duration_hours = hours;
        self
    }

    /// Set theme
    pub fn with_theme(mut self, theme: PollTheme) -> Self {
        self.theme = theme;
        self
    }

    /// Allow multiple selections per vote
    pub fn allow_multiple_choices(mut self, allow: bool) -> Self {
        self.allow_multiple_choices = allow;
        self
    }

    /// Set whether results are public
    pub fn public_results(mut self, public: bool) -> Self {
        self.public_results = public;
        self
    }

    /// Client-side validation; the server remains authoritative
    pub fn validate(&self) -> Result<(), String> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err("Question cannot be empty".to_string());
        }
        if question.chars().count() > MAX_QUESTION_LEN {
            return Err(format!(
                "Question cannot be longer than {} characters",
                MAX_QUESTION_LEN
            ));
        }

        if self.options.len() < MIN_OPTIONS {
            return Err(format!("A poll needs at least {} options", MIN_OPTIONS));
        }
        if self.options.len() > MAX_OPTIONS {
            return Err(format!("A poll can have at most {} options", MAX_OPTIONS));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err("Options cannot be empty or just whitespace".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for option in &self.options {
            if !seen.insert(option.to_lowercase()) {
                return Err("Duplicate options are not allowed".to_string());
            }
        }

        if self.duration_hours == 0 {
            return Err("Duration must be at least one hour".to_string());
        }

        Ok(())
    }
}

/// Request body for `POST /polls/{id}/vote`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub option_ids: Vec<String>,
    pub voter_fingerprint: String,
    pub turnstile_token: String,
}

impl VoteRequest {
    pub fn new(
        option_ids: Vec<String>,
        voter_fingerprint: impl Into<String>,
        turnstile_token: impl Into<String>,
    ) -> Self {
        Self {
            option_ids,
            voter_fingerprint: voter_fingerprint.into(),
            turnstile_token: turnstile_token.into(),
        }
    }

    /// Validate the selection against the poll it targets
    pub fn validate_for(&self, poll: &PollPublic) -> Result<(), String> {
        if self.option_ids.is_empty() {
            return Err("Please select at least one option".to_string());
        }
        if !poll.allow_multiple_choices && self.option_ids.len() > 1 {
            return Err("This poll does not allow multiple choices".to_string());
        }
        if let Some(unknown) = self.option_ids.iter().find(|id| poll.option(id).is_none()) {
            return Err(format!("Option '{}' does not exist in this poll", unknown));
        }
        Ok(())
    }
}

/// Response to a successful vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub message: String,
}

/// Timestamps as emitted by the API. Values without an offset are UTC.
pub(crate) mod utc_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }
}
