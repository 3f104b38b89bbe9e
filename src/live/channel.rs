//! Push-update channel abstraction.
//!
//! A channel delivers full tally snapshots for one poll. Transports implement
//! [`ChannelConnector`] and [`UpdateChannel`]; the synchronizer only sees these
//! traits.

use crate::polls::Tally;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Push channel errors. These never end a results view; they only drop liveness.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// What a channel is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub poll_id: String,
    /// Only set for polls whose results are private
    pub creator_key: Option<String>,
}

impl ChannelTarget {
    pub fn new(poll_id: impl Into<String>, creator_key: Option<String>) -> Self {
        Self {
            poll_id: poll_id.into(),
            creator_key,
        }
    }

    /// Resolve the channel endpoint under `ws_base` (e.g. `ws://localhost:8000/api`)
    pub fn url(&self, ws_base: &str) -> Result<url::Url, ChannelError> {
        let raw = format!(
            "{}/ws/polls/{}/results",
            ws_base.trim_end_matches('/'),
            urlencoding::encode(&self.poll_id)
        );
        let mut url = url::Url::parse(&raw).map_err(|e| ChannelError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if let Some(key) = &self.creator_key {
            url.query_pairs_mut().append_pair("creator_key", key);
        }
        Ok(url)
    }
}

/// A message pushed by the server. Only the tally is read; other fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyUpdate {
    pub votes: Tally,
}

impl TallyUpdate {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// An established push channel
#[async_trait]
pub trait UpdateChannel: Send {
    /// Next update from the server.
    ///
    /// `None` once the server has closed the channel. Must be cancel-safe.
    async fn next_update(&mut self) -> Option<Result<TallyUpdate, ChannelError>>;

    /// Close the channel. Errors are swallowed; the channel is gone either way.
    async fn close(&mut self);
}

/// Opens push channels. Returning `Ok` means the server acknowledged the channel.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, target: &ChannelTarget) -> Result<Box<dyn UpdateChannel>, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_channel_url() {
        let target = ChannelTarget::new("sleepy-blue-toaster", None);
        let url = target.url("ws://localhost:8000/api/").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/ws/polls/sleepy-blue-toaster/results"
        );
    }

    #[test]
    fn test_private_channel_url_carries_key() {
        let target = ChannelTarget::new("p1", Some("k/ey+1".to_string()));
        let url = target.url("wss://poll.example/api").unwrap();
        assert_eq!(url.scheme(), "wss");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("creator_key".to_string(), "k/ey+1".to_string())]);
    }

    #[test]
    fn test_channel_url_rejects_http() {
        let target = ChannelTarget::new("p1", None);
        assert!(matches!(
            target.url("http://localhost:8000/api"),
            Err(ChannelError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_tally_update_ignores_extra_fields() {
        let update =
            TallyUpdate::from_json(r#"{"type": "results", "votes": {"o1": 2, "o2": 5}}"#).unwrap();
        assert_eq!(update.votes.count("o2"), 5);
        assert_eq!(update.votes.total(), 7);

        assert!(TallyUpdate::from_json(r#"{"message": "hi"}"#).is_err());
    }
}
