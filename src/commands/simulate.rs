//! Run a synthetic pipeline of sleeping stages.
//!
//! Each stage sleeps for a fixed latency per item and then forwards the item
//! to the next stage; a final synchronous sink counts deliveries. Useful for
//! watching how the driver kinds and control strategies behave under load.

use anyhow::{Result, bail};
use clap::Parser;
use fgstage_lib::config::{
    ControllerConfig, DriverConfig, DriverKind, StrategyConfig, StrategyKind, create_driver,
};
use fgstage_lib::context::StageContext;
use fgstage_lib::control::DriverController;
use fgstage_lib::driver::{Driver, FaultTolerance, Feeder, Handler, StageDriver};
use fgstage_lib::errors::HandlerError;
use fgstage_lib::logging::{format_count, format_duration, format_rate};
use fgstage_lib::progress::ProgressTracker;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::commands::command::Command;

/// Simulate a multi-stage pipeline.
#[derive(Debug, Parser)]
#[command(
    name = "simulate",
    about = "Run a synthetic pipeline of sleeping stages",
    long_about = r#"
Run a synthetic pipeline of sleeping stages under one driver kind.

Every stage sleeps for its latency and forwards the item downstream. With a
prioritizable driver kind (executor, balanced) and --strategy, a controller
adjusts worker counts from the observed latencies while the pipeline runs.

Example usage:
  fgstage simulate -n 10000 -l 1 -l 8 -l 2 --driver thread-pool --threads 4
  fgstage simulate -n 5000 -l 2 -l 10 --driver balanced --strategy equalizing --delta-ms 2
"#
)]
pub struct Simulate {
    /// Number of items to feed into the first stage
    #[arg(short = 'n', long = "items", default_value = "1000")]
    pub items: u64,

    /// Per-item latency of each stage in milliseconds; repeat once per stage
    #[arg(short = 'l', long = "latency-ms", required = true)]
    pub latencies: Vec<u64>,

    /// Driver kind used for every stage
    #[arg(long = "driver", value_enum, default_value = "dedicated")]
    pub driver: DriverKind,

    /// Channel capacity for queue-backed drivers (0 = unbounded)
    #[arg(long = "queue-capacity", default_value = "128")]
    pub queue_capacity: usize,

    /// Worker poll timeout in milliseconds
    #[arg(long = "poll-timeout-ms", default_value = "100")]
    pub poll_timeout_ms: u64,

    /// Workers per stage (thread-pool threads, executor max threads, balanced initial workers)
    #[arg(short = 't', long = "threads", default_value = "2")]
    pub threads: usize,

    /// Fault tolerance applied to every stage
    #[arg(long = "fault-tolerance", value_enum, default_value = "none")]
    pub fault_tolerance: FaultTolerance,

    /// Make the first stage fail on every Nth item (0 = never)
    #[arg(long = "fail-every", default_value = "0")]
    pub fail_every: u64,

    /// Control strategy; requires --driver executor or balanced
    #[arg(long = "strategy", value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Timing events per controller batch
    #[arg(long = "batch-size", default_value = "100")]
    pub batch_size: usize,

    /// Equalizing strategy tolerance around the batch mean, in milliseconds
    #[arg(long = "delta-ms", default_value = "1")]
    pub delta_ms: u64,

    /// Wall-clock strategy latency threshold, in milliseconds
    #[arg(long = "threshold-ms", default_value = "5")]
    pub threshold_ms: u64,

    /// Experimental strategy minimum latency change worth acting on
    #[arg(long = "min-difference-percent", default_value = "10.0")]
    pub min_difference_percent: f64,

    /// Random seed for the experimental strategy
    #[arg(long = "seed")]
    pub seed: Option<u64>,
}

/// Sleeps, then forwards the item downstream.
struct SleepStage {
    name: String,
    latency: Duration,
    fail_every: u64,
    downstream: Arc<dyn Feeder<u64>>,
}

impl Handler<u64> for SleepStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, item: u64) -> Result<(), HandlerError> {
        std::thread::sleep(self.latency);
        if self.fail_every > 0 && (item + 1) % self.fail_every == 0 {
            return Err(HandlerError::processing(format!("item {item} rejected")));
        }
        self.downstream.feed(item).map_err(|e| HandlerError::Runtime(e.into()))
    }
}

/// Counts deliveries at the end of the pipeline.
struct Sink {
    progress: ProgressTracker,
}

impl Handler<u64> for Sink {
    fn name(&self) -> &str {
        "sink"
    }

    fn process(&self, _item: u64) -> Result<(), HandlerError> {
        self.progress.record(1);
        Ok(())
    }

    fn postprocess(&self) -> Result<(), HandlerError> {
        self.progress.log_final();
        Ok(())
    }
}

impl Simulate {
    fn driver_config(&self) -> DriverConfig {
        DriverConfig::new(self.driver)
            .with_queue_capacity(self.queue_capacity)
            .with_poll_timeout(Duration::from_millis(self.poll_timeout_ms))
            .with_fault_tolerance(self.fault_tolerance)
            .with_num_threads(self.threads)
            .with_thread_bounds(self.threads.min(1), self.threads)
            .with_initial_workers(self.threads)
    }

    fn controller_config(&self, kind: StrategyKind) -> ControllerConfig {
        let strategy = match kind {
            StrategyKind::Equalizing => {
                StrategyConfig::Equalizing { delta: Duration::from_millis(self.delta_ms) }
            }
            StrategyKind::WallClockThreshold => {
                StrategyConfig::WallClockThreshold { threshold: Duration::from_millis(self.threshold_ms) }
            }
            StrategyKind::Experimental => StrategyConfig::Experimental {
                min_difference_percent: self.min_difference_percent,
                seed: self.seed,
            },
        };
        ControllerConfig::default()
            .with_min_batch_size(self.batch_size)
            .with_wait_timeout(Duration::from_millis(self.poll_timeout_ms))
            .with_strategy(strategy)
    }

    /// Build drivers from the sink backwards so each stage can hold its downstream feeder.
    fn build_stages(
        &self,
        context: &Arc<StageContext>,
        controller: Option<&DriverController>,
    ) -> Result<(StageDriver<u64>, Vec<StageDriver<u64>>)> {
        let sink = create_driver(
            Arc::new(Sink { progress: ProgressTracker::new("Delivered").with_interval(1_000) })
                as Arc<dyn Handler<u64>>,
            &DriverConfig::new(DriverKind::Synchronous),
            None,
        )?;

        let config = self.driver_config();
        let mut stages = Vec::with_capacity(self.latencies.len());
        let mut downstream = sink.feeder();
        for (index, &latency) in self.latencies.iter().enumerate().rev() {
            let handler = SleepStage {
                name: format!("stage-{index}"),
                latency: Duration::from_millis(latency),
                fail_every: if index == 0 { self.fail_every } else { 0 },
                downstream,
            };
            let driver = create_driver(
                Arc::new(handler) as Arc<dyn Handler<u64>>,
                &config,
                Some(Arc::clone(context)),
            )?;
            if let (Some(controller), Some(prioritizable)) = (controller, driver.prioritizable()) {
                controller.manage(prioritizable);
            }
            downstream = driver.feeder();
            stages.push(driver);
        }
        stages.reverse();
        Ok((sink, stages))
    }
}

impl Command for Simulate {
    fn execute(&self, command_line: &str) -> Result<()> {
        if self.latencies.is_empty() {
            bail!("at least one --latency-ms is required");
        }
        if self.strategy.is_some() && !self.driver.is_prioritizable() {
            bail!("--strategy requires --driver executor or balanced, got {:?}", self.driver);
        }

        info!("Command line: {command_line}");
        info!("Simulating {} stage(s) with {:?} drivers", self.latencies.len(), self.driver);

        let context = Arc::new(StageContext::new());
        let controller = self.strategy.map(|kind| self.controller_config(kind).build(Arc::clone(&context)));
        let (sink, stages) = self.build_stages(&context, controller.as_ref())?;

        sink.start()?;
        for stage in stages.iter().rev() {
            stage.start()?;
        }
        if let Some(controller) = &controller {
            controller.start()?;
        }

        let started = Instant::now();
        let entry = stages[0].feeder();
        let mut fed = 0;
        for item in 0..self.items {
            if let Err(e) = entry.feed(item) {
                warn!("Stopped feeding after {} items: {e}", format_count(fed));
                break;
            }
            fed += 1;
        }

        for stage in &stages {
            stage.finish()?;
        }
        sink.finish()?;
        context.signal_complete();
        if let Some(controller) = &controller {
            controller.stop();
            info!("Controller dispatched {} batches", controller.batches_dispatched());
        }

        let elapsed = started.elapsed();
        info!(
            "Fed {} items in {} ({}); {} delivered",
            format_count(fed),
            format_duration(elapsed),
            format_rate(fed, elapsed),
            format_count(sink.processed_count())
        );

        let mut fatal = 0;
        for stage in &stages {
            let priority = stage.prioritizable().map(|p| p.priority());
            info!(
                "  {}: {} processed, {} failures, final state {}{}",
                stage.name(),
                format_count(stage.processed_count()),
                stage.processing_failures().len(),
                stage.state(),
                priority.map(|p| format!(", priority {p}")).unwrap_or_default()
            );
            fatal += stage.fatal_errors().len();
        }
        if fatal > 0 {
            bail!("{fatal} stage(s) ended in error");
        }
        Ok(())
    }
}
