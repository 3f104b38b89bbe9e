//! Live Results
//!
//! Keeps a displayed vote tally consistent with the server for one poll at a
//! time: a snapshot fetch, then a single push channel whose messages replace
//! the tally wholesale.
//!
//! ```text
//!   open(poll) ──► Loading ──fetch ok──► Ready ──► channel: Connecting ─► Live ─► Disconnected
//!                     │
//!                     └──fetch err──► Failed (terminal, no channel)
//! ```
//!
//! There is no reconnect: once the channel drops, the last tally stays in
//! place and the view is simply no longer live.

pub mod channel;
pub mod sync;
pub mod ws;

use crate::api::ApiError;
use crate::polls::{PollPublic, Tally};

pub use channel::{ChannelConnector, ChannelError, ChannelTarget, TallyUpdate, UpdateChannel};
pub use sync::LiveResults;
pub use ws::WsConnector;

/// Push channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveState {
    Connecting,
    Live,
    #[default]
    Disconnected,
}

/// Lifecycle of a results activation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Phase {
    /// Nothing opened yet. `close()` keeps the last phase so a closed view still renders.
    #[default]
    Idle,
    /// Snapshot fetch outstanding
    Loading,
    /// Snapshot received; tally is displayable
    Ready,
    /// Snapshot fetch failed; terminal for this activation
    Failed(ApiError),
}

/// Everything a results view renders from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsState {
    pub poll_id: Option<String>,
    pub phase: Phase,
    pub live: LiveState,
    pub poll: Option<PollPublic>,
    pub tally: Tally,
}

impl ResultsState {
    fn loading(poll_id: &str) -> Self {
        Self {
            poll_id: Some(poll_id.to_string()),
            phase: Phase::Loading,
            ..Default::default()
        }
    }

    /// Liveness flag
    pub fn is_live(&self) -> bool {
        self.live == LiveState::Live
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn error(&self) -> Option<&ApiError> {
        match &self.phase {
            Phase::Failed(e) => Some(e),
            _ => None,
        }
    }
}
