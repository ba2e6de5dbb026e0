//! Equalizing strategy: move every stage's latency towards the batch mean.

use std::time::Duration;

use super::{Action, BatchStats, ControlStrategy, PriorityChange};
use crate::context::TimingEvent;

/// Grows stages slower than `mean + delta` and shrinks stages faster than
/// `mean - delta`, where `mean` is the mean latency of the whole batch.
///
/// Stateless across batches.
#[derive(Debug, Clone)]
pub struct EqualizingStrategy {
    delta: Duration,
}

impl EqualizingStrategy {
    #[must_use]
    pub fn new(delta: Duration) -> Self {
        Self { delta }
    }
}

impl ControlStrategy for EqualizingStrategy {
    fn name(&self) -> &'static str {
        "equalizing"
    }

    fn evaluate(&mut self, batch: &[TimingEvent]) -> Vec<PriorityChange> {
        let stats = BatchStats::from_events(batch);
        let Some(mean) = stats.overall_mean() else { return Vec::new() };
        let upper = mean + self.delta;
        let lower = mean.checked_sub(self.delta);

        stats
            .stage_means()
            .filter_map(|(stage, stage_mean)| {
                if stage_mean > upper {
                    Some(PriorityChange::new(stage, Action::Increase))
                } else if lower.is_some_and(|lower| stage_mean < lower) {
                    Some(PriorityChange::new(stage, Action::Decrease))
                } else {
                    None
                }
            })
            .collect()
    }
}
