//! Polls Module
//!
//! Poll data model, theme palette and results presentation helpers.

pub mod model;
pub mod summary;
pub mod theme;

pub use model::{
    NewPoll, PollCreated, PollOption, PollPublic, PollResults, Tally, VoteReceipt, VoteRequest,
};
pub use summary::{percentage, render_results, OptionResult, ResultsSummary, TimeRemaining};
pub use theme::{Palette, PollTheme, Rgb};
