//! Bounded queues block feeders until a worker frees capacity.

use fgstage_lib::driver::{DedicatedThreadDriver, Driver, FaultTolerance};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::helpers::Gate;

const HOLD: Duration = Duration::from_millis(300);

#[test]
fn test_feed_blocks_while_queue_is_full() {
    let gate = Arc::new(Gate::default());
    let driver = DedicatedThreadDriver::<u32>::new(
        gate.clone(),
        FaultTolerance::None,
        1,
        Duration::from_millis(10),
    );
    driver.start().unwrap();
    let feeder = driver.feeder();

    // one item held by the paused worker, one in the queue
    feeder.feed(1).unwrap();
    feeder.feed(2).unwrap();

    let opener = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            thread::sleep(HOLD);
            gate.open();
        })
    };

    let begin = Instant::now();
    feeder.feed(3).unwrap();
    let blocked = begin.elapsed();
    opener.join().unwrap();

    assert!(blocked >= HOLD / 2, "feed returned after {blocked:?}");
    driver.finish().unwrap();
    assert_eq!(gate.processed.load(Ordering::SeqCst), 3);
    assert_eq!(driver.queue_len(), 0);
}

#[test]
fn test_unbounded_queue_never_blocks() {
    let gate = Arc::new(Gate::default());
    let driver = DedicatedThreadDriver::<u32>::new(
        gate.clone(),
        FaultTolerance::None,
        0,
        Duration::from_millis(10),
    );
    driver.start().unwrap();

    let begin = Instant::now();
    for i in 0..100 {
        driver.feeder().feed(i).unwrap();
    }
    assert!(begin.elapsed() < HOLD);
    assert!(driver.queue_len() >= 99);

    gate.open();
    driver.finish().unwrap();
    assert_eq!(gate.processed.load(Ordering::SeqCst), 100);
}
