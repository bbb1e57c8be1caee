//! Progress reporting.
//!
//! The lifecycle reports through [`ProgressSink`]. [`PhasedProgress`] maps a
//! sequence of weighted phases onto one monotonic scale for a downstream sink
//! such as the terminal bar or [`NullProgress`].

mod phases;
mod terminal;

pub use phases::{ActivePhase, PhaseHandle, PhasedProgress, mul_div};
pub use terminal::TerminalProgress;

/// Whether the caller should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing {
    Continue,
    Cancel,
}

#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink {
    fn set_total(&mut self, total: u64);
    fn set_completed(&mut self, completed: u64) -> Processing;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_total(&mut self, _total: u64) {}

    fn set_completed(&mut self, _completed: u64) -> Processing {
        Processing::Continue
    }
}
