//! Experimental strategy: per-stage hill-climbing.
//!
//! The first batch a stage appears in always tries one more worker. After
//! that, the stage's mean latency is compared with the previous batch:
//!
//! - change below `min_difference_percent`: do nothing;
//! - latency improved: repeat the last action;
//! - latency worsened: reverse the last action.
//!
//! With no last action to repeat or reverse, one of increase, decrease or
//! nothing is drawn uniformly at random.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;

use super::{Action, BatchStats, ControlStrategy, PriorityChange};
use crate::context::TimingEvent;

#[derive(Debug, Clone, Copy)]
struct StageMemory {
    last_action: Option<Action>,
    last_latency: Duration,
}

/// Hill-climbing strategy with random exploration.
#[derive(Debug)]
pub struct ExperimentalStrategy {
    min_difference_percent: f64,
    memory: HashMap<String, StageMemory>,
    rng: SmallRng,
}

impl ExperimentalStrategy {
    /// Create the strategy. A `seed` makes the random choices reproducible.
    #[must_use]
    pub fn new(min_difference_percent: f64, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self { min_difference_percent, memory: HashMap::new(), rng: SmallRng::seed_from_u64(seed) }
    }

    /// The last action taken for `stage`, if the stage has been seen.
    #[must_use]
    pub fn last_action(&self, stage: &str) -> Option<Action> {
        self.memory.get(stage).and_then(|m| m.last_action)
    }

    fn random_action(rng: &mut SmallRng) -> Option<Action> {
        match rng.random_range(0..3) {
            0 => Some(Action::Increase),
            1 => Some(Action::Decrease),
            _ => None,
        }
    }

    fn percent_change(last: Duration, current: Duration) -> f64 {
        let last = last.as_secs_f64();
        let current = current.as_secs_f64();
        if last > 0.0 {
            (current - last).abs() / last * 100.0
        } else if current > 0.0 {
            100.0
        } else {
            0.0
        }
    }
}

impl ControlStrategy for ExperimentalStrategy {
    fn name(&self) -> &'static str {
        "experimental"
    }

    fn evaluate(&mut self, batch: &[TimingEvent]) -> Vec<PriorityChange> {
        let stats = BatchStats::from_events(batch);
        let mut changes = Vec::new();

        for (stage, latency) in stats.stage_means() {
            let action = match self.memory.get_mut(stage) {
                None => {
                    self.memory.insert(
                        stage.to_string(),
                        StageMemory { last_action: Some(Action::Increase), last_latency: latency },
                    );
                    Some(Action::Increase)
                }
                Some(memory) => {
                    let action = if Self::percent_change(memory.last_latency, latency)
                        < self.min_difference_percent
                    {
                        None
                    } else if latency < memory.last_latency {
                        memory.last_action.or_else(|| Self::random_action(&mut self.rng))
                    } else {
                        memory.last_action.map(Action::reverse).or_else(|| Self::random_action(&mut self.rng))
                    };
                    memory.last_action = action;
                    memory.last_latency = latency;
                    action
                }
            };
            if let Some(action) = action {
                changes.push(PriorityChange::new(stage, action));
            }
        }
        changes
    }
}
