//! Weighted multi-phase progress.

use super::{Processing, ProgressSink};
use crate::interrupt::Interrupt;

/// `a * b / c` through a 128-bit intermediate, saturating at `u64::MAX`.
///
/// Returns 0 when `c` is 0.
pub fn mul_div(a: u64, b: u64, c: u64) -> u64 {
    if c == 0 {
        return 0;
    }
    let quotient = u128::from(a) * u128::from(b) / u128::from(c);
    u64::try_from(quotient).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy, Default)]
struct Phase {
    start: u64,
    weight: u64,
}

/// Handle returned by [`PhasedProgress::add_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseHandle(usize);

/// Maps sequential phases, each owning `[start, start + weight)` of a virtual
/// axis, onto a downstream sink.
pub struct PhasedProgress<'s> {
    sink: &'s mut dyn ProgressSink,
    interrupt: Interrupt,
    phases: Vec<Phase>,
    total_dirty: bool,
    current_total: u64,
    cancelled: bool,
}

impl<'s> PhasedProgress<'s> {
    pub fn new(sink: &'s mut dyn ProgressSink, interrupt: Interrupt) -> Self {
        Self {
            sink,
            interrupt,
            phases: Vec::new(),
            total_dirty: false,
            current_total: 0,
            cancelled: false,
        }
    }

    /// Append a phase right after the previous one. A weight of 0 makes the
    /// phase invisible on the downstream scale.
    pub fn add_phase(&mut self, weight: u64) -> PhaseHandle {
        let start = self
            .phases
            .last()
            .map_or(0, |last| last.start.saturating_add(last.weight));
        self.phases.push(Phase { start, weight });
        self.total_dirty = true;
        PhaseHandle(self.phases.len() - 1)
    }

    /// Sum of all phase weights.
    pub fn total(&self) -> u64 {
        self.phases
            .last()
            .map_or(0, |last| last.start.saturating_add(last.weight))
    }

    /// Make `handle` the active phase and report its start offset.
    pub fn phase(&mut self, handle: PhaseHandle) -> ActivePhase<'_, 's> {
        if self.total_dirty {
            let total = self.total();
            self.sink.set_total(total);
            self.total_dirty = false;
        }

        let phase = self.phases.get(handle.0).copied().unwrap_or_default();
        self.current_total = 0;
        self.forward(phase.start);
        ActivePhase {
            progress: self,
            phase,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled || self.interrupt.is_triggered()
    }

    fn forward(&mut self, completed: u64) -> Processing {
        if self.sink.set_completed(completed) == Processing::Cancel {
            self.cancelled = true;
        }
        if self.is_cancelled() {
            Processing::Cancel
        } else {
            Processing::Continue
        }
    }
}

/// The phase currently reporting; a [`ProgressSink`] in local units.
pub struct ActivePhase<'a, 's> {
    progress: &'a mut PhasedProgress<'s>,
    phase: Phase,
}

impl ProgressSink for ActivePhase<'_, '_> {
    fn set_total(&mut self, total: u64) {
        self.progress.current_total = total;
    }

    fn set_completed(&mut self, completed: u64) -> Processing {
        let total = self.progress.current_total;
        let offset = if total == 0 {
            0
        } else {
            mul_div(completed.min(total), self.phase.weight, total)
        };
        self.progress.forward(self.phase.start.saturating_add(offset))
    }
}
