//! Wall-clock threshold strategy.

use std::time::Duration;

use super::{Action, BatchStats, ControlStrategy, PriorityChange};
use crate::context::TimingEvent;

/// Adds a worker to every stage whose mean latency reaches `threshold`.
/// Never removes workers.
#[derive(Debug, Clone)]
pub struct WallClockThresholdStrategy {
    threshold: Duration,
}

impl WallClockThresholdStrategy {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl ControlStrategy for WallClockThresholdStrategy {
    fn name(&self) -> &'static str {
        "wall-clock-threshold"
    }

    fn evaluate(&mut self, batch: &[TimingEvent]) -> Vec<PriorityChange> {
        BatchStats::from_events(batch)
            .stage_means()
            .filter(|&(_, mean)| mean >= self.threshold)
            .map(|(stage, _)| PriorityChange::new(stage, Action::Increase))
            .collect()
    }
}
