//! quickpoll client library
//!
//! Typed access to a Quick Poll backend: poll creation, voting, results
//! snapshots, and live tally updates over a push channel, plus the local
//! record of polls created from this device.

pub mod api;
pub mod cli;
pub mod config;
pub mod live;
pub mod logging;
pub mod polls;
pub mod store;
