//! Controller and strategies applied to real prioritizable drivers.

use fgstage_lib::config::{ControllerConfig, StrategyConfig};
use fgstage_lib::context::{StageContext, StageEvent, StageEventListener, TimingEvent};
use fgstage_lib::control::{DriverController, EqualizingStrategy};
use fgstage_lib::driver::{BalancedPoolDriver, Driver, ExecutorDriver, FaultTolerance, Prioritizable};
use fgstage_lib::errors::HandlerError;
use fgstage_lib::Handler;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::helpers::{Collector, Forwarding};

fn timed(groups: &[(&str, u64, usize)]) -> Vec<TimingEvent> {
    groups.iter()
        .flat_map(|&(stage, millis, n)| {
            std::iter::repeat_with(move || TimingEvent::new(stage, Duration::from_millis(millis)))
                .take(n)
        })
        .collect()
}

fn balanced_stage(name: &str, sink: Arc<Collector<u32>>) -> Arc<BalancedPoolDriver<u32>> {
    Arc::new(BalancedPoolDriver::new(
        Arc::new(Forwarding::new(name, sink)),
        FaultTolerance::None,
        0,
        Duration::from_millis(10),
        2,
        None,
    ))
}

#[test]
fn test_equalizing_dispatch_on_running_balanced_pools() {
    let context = Arc::new(StageContext::new());
    let controller = DriverController::new(
        Arc::clone(&context),
        Box::new(EqualizingStrategy::new(Duration::from_millis(50))),
        6,
        Duration::from_millis(50),
    );
    let sink = Collector::<u32>::new();
    let stages: Vec<_> = ["A", "B", "C"].iter().map(|n| balanced_stage(n, sink.clone())).collect();
    for stage in &stages {
        stage.start().unwrap();
        controller.manage(stage.clone());
    }

    controller.dispatch(&timed(&[("A", 300, 2), ("B", 100, 2), ("C", 50, 2)]));

    let priorities: Vec<_> = stages.iter().map(|s| s.priority()).collect();
    assert_eq!(priorities, vec![3, 2, 1]);

    for stage in &stages {
        stage.finish().unwrap();
    }
}

#[test]
fn test_equalizing_dispatch_on_executors() {
    let context = Arc::new(StageContext::new());
    let controller = DriverController::new(
        Arc::clone(&context),
        Box::new(EqualizingStrategy::new(Duration::from_millis(50))),
        6,
        Duration::from_millis(50),
    );
    let sink = Collector::<u32>::new();
    let stages: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|n| {
            Arc::new(
                ExecutorDriver::new(
                    Arc::new(Forwarding::new(n, sink.clone())),
                    FaultTolerance::None,
                    1,
                    2,
                    Duration::from_millis(50),
                    None,
                )
                .unwrap(),
            )
        })
        .collect();
    for stage in &stages {
        controller.manage(stage.clone());
    }

    controller.dispatch(&timed(&[("A", 300, 2), ("B", 100, 2), ("C", 50, 2)]));

    assert_eq!(stages[0].thread_bounds(), (2, 3));
    assert_eq!(stages[1].thread_bounds(), (1, 2));
    assert_eq!(stages[2].thread_bounds(), (0, 1));
}

#[test]
fn test_controller_grows_slow_stage_end_to_end() {
    let context = Arc::new(StageContext::new());
    let controller = ControllerConfig::default()
        .with_min_batch_size(10)
        .with_wait_timeout(Duration::from_millis(20))
        .with_strategy(StrategyConfig::WallClockThreshold { threshold: Duration::from_millis(1) })
        .build(Arc::clone(&context));

    let sink = Collector::<u32>::new();
    let slow = Arc::new(BalancedPoolDriver::new(
        Arc::new(Forwarding::new("slow", sink.clone()).with_latency(Duration::from_millis(3))),
        FaultTolerance::None,
        0,
        Duration::from_millis(10),
        1,
        Some(Arc::clone(&context)),
    ));
    controller.manage(slow.clone());
    controller.start().unwrap();
    slow.start().unwrap();

    for i in 0..60 {
        slow.feeder().feed(i).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while slow.priority() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(slow.priority() >= 2);
    slow.finish().unwrap();
    context.signal_complete();
    controller.stop();

    assert!(controller.batches_dispatched() >= 1);
    assert_eq!(sink.len(), 60);
    assert_eq!(slow.processed_count(), 60);
}

#[derive(Debug, PartialEq)]
struct Milestone(u32);

#[derive(Default)]
struct MilestoneLog {
    seen: Mutex<Vec<u32>>,
}

impl StageEventListener for MilestoneLog {
    fn notify(&self, event: &StageEvent) {
        if let StageEvent::Custom(payload) = event {
            if let Some(Milestone(n)) = payload.downcast_ref::<Milestone>() {
                self.seen.lock().push(*n);
            }
        }
    }
}

struct Announcer {
    context: Arc<StageContext>,
}

impl Handler<u32> for Announcer {
    fn name(&self) -> &str {
        "announcer"
    }

    fn process(&self, item: u32) -> Result<(), HandlerError> {
        if item % 10 == 0 {
            self.context.raise(&StageEvent::custom(Milestone(item)));
        }
        Ok(())
    }
}

#[test]
fn test_handlers_publish_custom_events_alongside_timing() {
    let context = Arc::new(StageContext::new());
    let log = Arc::new(MilestoneLog::default());
    context.register_listener(log.clone());
    let controller = DriverController::new(
        Arc::clone(&context),
        Box::new(EqualizingStrategy::new(Duration::from_millis(50))),
        1_000,
        Duration::from_millis(20),
    );

    let driver = BalancedPoolDriver::new(
        Arc::new(Announcer { context: Arc::clone(&context) }),
        FaultTolerance::None,
        0,
        Duration::from_millis(10),
        1,
        Some(Arc::clone(&context)),
    );
    driver.start().unwrap();
    for i in 0..35 {
        driver.feeder().feed(i).unwrap();
    }
    driver.finish().unwrap();

    assert_eq!(*log.seen.lock(), vec![0, 10, 20, 30]);
    assert_eq!(controller.pending_events(), 35);
}
