//! Cooperative time slicing for long scene builds.
//!
//! A build is a [`ChunkedWork`] advanced one unit at a time. The owner gives
//! it one slice per tick; a slice keeps stepping until the work is done or
//! the time budget is spent. There is no cancellation: a started job is
//! driven to completion.

use std::time::{Duration, Instant};

pub trait ChunkedWork<Ctx: ?Sized> {
    /// Processes one unit of work. Returns `false` once nothing is left.
    fn step(&mut self, ctx: &Ctx) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    Finished,
    Yielded,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeSlicer {
    budget: Duration,
}

impl TimeSlicer {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Steps `work` until it finishes or the budget runs out. At least one
    /// step runs per slice so a zero budget still makes progress.
    pub fn run_slice<Ctx: ?Sized, W: ChunkedWork<Ctx>>(&self, work: &mut W, ctx: &Ctx) -> SliceOutcome {
        let start = Instant::now();
        loop {
            if !work.step(ctx) {
                return SliceOutcome::Finished;
            }
            if start.elapsed() >= self.budget {
                return SliceOutcome::Yielded;
            }
        }
    }

    /// Runs `work` to completion in one go.
    pub fn run_to_end<Ctx: ?Sized, W: ChunkedWork<Ctx>>(work: &mut W, ctx: &Ctx) {
        while work.step(ctx) {}
    }
}

impl Default for TimeSlicer {
    fn default() -> Self {
        Self::from_millis(100)
    }
}
