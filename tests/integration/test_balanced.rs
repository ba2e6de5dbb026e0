//! Worker-count floor and resizing of the balanced pool.

use fgstage_lib::driver::{BalancedPoolDriver, Driver, DriverState, FaultTolerance, Prioritizable};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

use crate::helpers::{Collector, Forwarding, Lifecycle};

fn balanced(initial_workers: usize, sink: Arc<Collector<u32>>) -> BalancedPoolDriver<u32> {
    BalancedPoolDriver::new(
        Arc::new(Forwarding::new("balanced", sink)),
        FaultTolerance::None,
        0,
        Duration::from_millis(10),
        initial_workers,
        None,
    )
}

#[test]
fn test_worker_floor_while_running() {
    let sink = Collector::<u32>::new();
    let driver = balanced(0, sink.clone());
    driver.start().unwrap();
    assert_eq!(driver.priority(), 0);

    driver.decrease_priority(1).unwrap();
    assert_eq!(driver.priority(), 0);

    driver.increase_priority(2).unwrap();
    assert_eq!(driver.priority(), 2);

    driver.decrease_priority(5).unwrap();
    assert_eq!(driver.priority(), 1);
    assert_eq!(driver.state(), DriverState::Running);

    for i in 0..20 {
        driver.feeder().feed(i).unwrap();
    }
    driver.finish().unwrap();

    let mut delivered = sink.items();
    delivered.sort_unstable();
    assert_eq!(delivered, (0..20).collect::<Vec<_>>());
    assert_eq!(driver.state(), DriverState::Stopped);
}

#[test]
fn test_grow_and_shrink_under_load() {
    let sink = Collector::<u32>::new();
    let driver = balanced(1, sink.clone());
    driver.start().unwrap();

    for i in 0..200 {
        driver.feeder().feed(i).unwrap();
        match i {
            50 => driver.increase_priority(3).unwrap(),
            100 => driver.decrease_priority(2).unwrap(),
            _ => {}
        }
    }
    driver.finish().unwrap();

    assert_eq!(sink.len(), 200);
    assert_eq!(driver.processed_count(), 200);
}

#[test]
fn test_resizing_after_finish_is_illegal() {
    let driver = balanced(1, Collector::<u32>::new());
    driver.start().unwrap();
    driver.finish().unwrap();
    assert!(driver.increase_priority(1).is_err());
    assert!(driver.decrease_priority(1).is_err());
}

/// Resize from another thread until the driver refuses; returns completed rounds.
fn resize_until_finished(driver: Arc<BalancedPoolDriver<u32>>) -> std::thread::JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut rounds = 0;
        while driver.increase_priority(2).is_ok() && driver.decrease_priority(3).is_ok() {
            rounds += 1;
        }
        rounds
    })
}

#[rstest]
#[case::unbounded(0)]
#[case::bounded(4)]
fn test_resizing_while_feeding_and_finishing(#[case] queue_capacity: usize) {
    let handler = Arc::new(Lifecycle { latency: Duration::from_millis(1), ..Lifecycle::default() });
    let driver = Arc::new(BalancedPoolDriver::<u32>::new(
        handler.clone(),
        FaultTolerance::None,
        queue_capacity,
        Duration::from_millis(5),
        2,
        None,
    ));
    driver.start().unwrap();
    let resizer = resize_until_finished(Arc::clone(&driver));

    let feeder = driver.feeder();
    for i in 0..500 {
        feeder.feed(i).unwrap();
    }
    driver.finish().unwrap();
    let rounds = resizer.join().unwrap();

    assert!(rounds > 0);
    assert_eq!(driver.state(), DriverState::Stopped);
    assert_eq!(Lifecycle::count(&handler.processed), 500);
    assert_eq!(Lifecycle::count(&handler.processed_late), 0);
    assert_eq!(Lifecycle::count(&handler.postprocessed), 1);
    assert_eq!(Lifecycle::count(&handler.released), 1);
}

#[test]
fn test_shrink_to_floor_while_feeding_delivers_everything() {
    let sink = Collector::<u32>::new();
    let driver = Arc::new(balanced(3, sink.clone()));
    driver.start().unwrap();

    let shrinker = {
        let driver = Arc::clone(&driver);
        std::thread::spawn(move || {
            for _ in 0..3 {
                driver.decrease_priority(1).unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    };
    for i in 0..300 {
        driver.feeder().feed(i).unwrap();
    }
    shrinker.join().unwrap();
    // every worker may be gone by now; the feeder must still move items
    for i in 300..310 {
        driver.feeder().feed(i).unwrap();
    }
    driver.finish().unwrap();

    let mut delivered = sink.items();
    delivered.sort_unstable();
    assert_eq!(delivered, (0..310).collect::<Vec<_>>());
}
