//! Polling for asynchronously derived destination objects

pub mod poller;

pub use poller::{AsyncValidationPoller, PollOutcome, PollState};
