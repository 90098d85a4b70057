//! FISH recipe sequencing.
//!
//! The scheduler turns the protocol into a strict sequence of verified
//! fluidics transitions and timed holds: fixation first, then one
//! hybridization cycle per probe with an imaging pass after each. Steps never
//! overlap and nothing is retried here; any failure ends the run.

pub mod cancellation;
pub mod scheduler;

pub use cancellation::CancellationToken;
pub use scheduler::{RecipeScheduler, RunSummary};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Blocks for the recipe's timed holds.
pub trait Waiter {
    /// Block for `duration`. `reason` names the hold for logs.
    fn wait(&mut self, duration: Duration, reason: &str);
}

/// Real-time waiter: sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepWaiter;

impl Waiter for SleepWaiter {
    fn wait(&mut self, duration: Duration, reason: &str) {
        debug!("Holding {:?} for {}", duration, reason);
        std::thread::sleep(duration);
    }
}

/// Waiter that records each hold instead of sleeping. Clones share the record.
#[derive(Debug, Default, Clone)]
pub struct RecordingWaiter(Arc<Mutex<Vec<(String, Duration)>>>);

impl RecordingWaiter {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds requested so far as `(reason, duration)`.
    pub fn holds(&self) -> Vec<(String, Duration)> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sum of every hold requested.
    pub fn total(&self) -> Duration {
        self.holds().iter().map(|(_, d)| *d).sum()
    }
}

impl Waiter for RecordingWaiter {
    fn wait(&mut self, duration: Duration, reason: &str) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((reason.to_string(), duration));
    }
}
