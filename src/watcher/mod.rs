//! File watcher for continuous rebuilds
//!
//! Implements the `watch` command with:
//! - An initial full build
//! - One event loop feeding classified changes to the scheduler
//! - Graceful Ctrl+C shutdown
//! - NDJSON output for CI

mod coordinator;
mod event;

pub use coordinator::watch;
pub use event::{change_events, ChangeEvent, WatchEvent};
