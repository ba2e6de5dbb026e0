//! Per-item failure handling under each fault-tolerance policy.

use fgstage_lib::config::DriverKind;
use fgstage_lib::driver::{Driver, DriverState, FaultTolerance, Handler};
use rstest::rstest;
use std::sync::Arc;

use crate::helpers::{Collector, FailureKind, Forwarding, test_driver};

/// Feed 1, 2, 3 through a stage that fails on 2; returns (delivered, driver).
fn run(
    kind: DriverKind,
    failure: FailureKind,
    fault_tolerance: FaultTolerance,
) -> (Vec<u32>, fgstage_lib::StageDriver<u32>) {
    let sink = Collector::<u32>::new();
    let handler: Arc<dyn Handler<u32>> =
        Arc::new(Forwarding::new("flaky", sink.clone()).failing_on(2, failure));
    let driver = test_driver(kind, handler, fault_tolerance);

    driver.start().unwrap();
    let feeder = driver.feeder();
    for item in [1, 2, 3] {
        // a stage in ERROR rejects further items; that is part of what is under test
        let _ = feeder.feed(item);
    }
    driver.finish().unwrap();
    (sink.items(), driver)
}

#[rstest]
#[case::synchronous(DriverKind::Synchronous)]
#[case::dedicated(DriverKind::Dedicated)]
fn test_none_halts_single_consumer_after_first_item(#[case] kind: DriverKind) {
    let (delivered, driver) = run(kind, FailureKind::Declared, FaultTolerance::None);
    assert_eq!(delivered, vec![1]);
    assert_eq!(driver.state(), DriverState::Error);
    assert_eq!(driver.fatal_errors().len(), 1);
    assert_eq!(driver.processing_failures().len(), 1);
    assert_eq!(driver.processing_failures()[0].item, 2);
}

#[rstest]
#[case::thread_pool(DriverKind::ThreadPool)]
#[case::executor(DriverKind::Executor)]
#[case::balanced(DriverKind::Balanced)]
fn test_none_is_fatal_for_pools(#[case] kind: DriverKind) {
    let (delivered, driver) = run(kind, FailureKind::Declared, FaultTolerance::None);
    assert!(!delivered.contains(&2));
    assert_eq!(driver.state(), DriverState::Error);
    assert_eq!(driver.fatal_errors().len(), 1);
}

#[rstest]
#[case::synchronous(DriverKind::Synchronous)]
#[case::dedicated(DriverKind::Dedicated)]
#[case::thread_pool(DriverKind::ThreadPool)]
#[case::executor(DriverKind::Executor)]
#[case::balanced(DriverKind::Balanced)]
fn test_checked_skips_declared_failures(#[case] kind: DriverKind) {
    let (mut delivered, driver) = run(kind, FailureKind::Declared, FaultTolerance::Checked);
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 3]);
    assert_eq!(driver.processing_failures().len(), 1);
    assert!(driver.fatal_errors().is_empty());
    assert_eq!(driver.state(), DriverState::Stopped);
}

#[rstest]
#[case::undeclared_under_none(FailureKind::Undeclared, FaultTolerance::None, true)]
#[case::undeclared_under_checked(FailureKind::Undeclared, FaultTolerance::Checked, true)]
#[case::undeclared_under_all(FailureKind::Undeclared, FaultTolerance::All, false)]
#[case::panic_under_checked(FailureKind::Panic, FaultTolerance::Checked, true)]
#[case::panic_under_all(FailureKind::Panic, FaultTolerance::All, false)]
fn test_undeclared_failures(
    #[case] failure: FailureKind,
    #[case] fault_tolerance: FaultTolerance,
    #[case] fatal: bool,
) {
    let (delivered, driver) = run(DriverKind::Dedicated, failure, fault_tolerance);
    assert_eq!(driver.processing_failures().len(), 1);
    if fatal {
        assert_eq!(delivered, vec![1]);
        assert_eq!(driver.state(), DriverState::Error);
    } else {
        assert_eq!(delivered, vec![1, 3]);
        assert_eq!(driver.state(), DriverState::Stopped);
    }
}

#[test]
fn test_synchronous_failure_surfaces_to_feeder() {
    let sink = Collector::<u32>::new();
    let handler: Arc<dyn Handler<u32>> =
        Arc::new(Forwarding::new("strict", sink.clone()).failing_on(2, FailureKind::Declared));
    let driver = test_driver(DriverKind::Synchronous, handler, FaultTolerance::None);
    driver.start().unwrap();

    let feeder = driver.feeder();
    assert!(feeder.feed(1).is_ok());
    let err = feeder.feed(2).unwrap_err();
    assert!(err.to_string().contains("strict"));
    assert!(feeder.feed(3).is_err());
    driver.finish().unwrap();
    assert_eq!(sink.len(), 1);
}
