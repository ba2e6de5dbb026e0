//! Lifecycle state machine across every driver kind.

use fgstage_lib::config::DriverKind;
use fgstage_lib::driver::{Driver, DriverState, FaultTolerance, Prioritizable};
use fgstage_lib::errors::DriverError;
use rstest::rstest;
use std::sync::Arc;

use crate::helpers::{ALL_KINDS, Lifecycle, test_driver};

#[rstest]
#[case::synchronous(DriverKind::Synchronous)]
#[case::dedicated(DriverKind::Dedicated)]
#[case::thread_pool(DriverKind::ThreadPool)]
#[case::executor(DriverKind::Executor)]
#[case::balanced(DriverKind::Balanced)]
fn test_illegal_start_and_finish(#[case] kind: DriverKind) {
    let handler = Arc::new(Lifecycle::default());
    let driver = test_driver::<u32>(kind, handler.clone(), FaultTolerance::None);

    assert!(matches!(driver.finish(), Err(DriverError::IllegalState { .. })));
    driver.start().unwrap();
    assert!(matches!(driver.start(), Err(DriverError::IllegalState { .. })));
    assert_eq!(driver.state(), DriverState::Running);

    for i in 0..5 {
        driver.feeder().feed(i).unwrap();
    }
    driver.finish().unwrap();

    assert_eq!(driver.state(), DriverState::Stopped);
    assert_eq!(Lifecycle::count(&handler.preprocessed), 1);
    assert_eq!(Lifecycle::count(&handler.processed), 5);
    assert_eq!(Lifecycle::count(&handler.postprocessed), 1);
    assert_eq!(Lifecycle::count(&handler.released), 1);

    // single use
    assert!(driver.start().is_err());
    assert!(driver.feeder().feed(9).is_err());
}

#[test]
fn test_preprocess_failure_is_fatal_for_every_kind() {
    for kind in ALL_KINDS {
        let handler = Arc::new(Lifecycle { fail_preprocess: true, ..Lifecycle::default() });
        let driver = test_driver::<u32>(kind, handler.clone(), FaultTolerance::All);

        assert!(matches!(driver.start(), Err(DriverError::Startup { .. })), "{kind:?}");
        assert_eq!(driver.state(), DriverState::Error, "{kind:?}");
        assert_eq!(driver.fatal_errors().len(), 1, "{kind:?}");
        assert_eq!(Lifecycle::count(&handler.released), 1, "{kind:?}");
        assert!(matches!(driver.feeder().feed(1), Err(DriverError::IllegalState { .. })));

        driver.finish().unwrap();
        assert_eq!(driver.state(), DriverState::Error, "{kind:?}");
        assert_eq!(Lifecycle::count(&handler.processed), 0, "{kind:?}");
        assert_eq!(Lifecycle::count(&handler.postprocessed), 0, "{kind:?}");
        assert_eq!(Lifecycle::count(&handler.released), 1, "{kind:?}");
    }
}

#[test]
fn test_postprocess_failure_still_releases() {
    for kind in ALL_KINDS {
        let handler = Arc::new(Lifecycle { fail_postprocess: true, ..Lifecycle::default() });
        let driver = test_driver::<u32>(kind, handler.clone(), FaultTolerance::None);

        driver.start().unwrap();
        for i in 0..3 {
            driver.feeder().feed(i).unwrap();
        }
        driver.finish().unwrap();

        assert_eq!(driver.state(), DriverState::Error, "{kind:?}");
        assert_eq!(driver.fatal_errors().len(), 1, "{kind:?}");
        assert_eq!(driver.processed_count(), 3, "{kind:?}");
        assert_eq!(Lifecycle::count(&handler.released), 1, "{kind:?}");
    }
}

#[rstest]
#[case::executor(DriverKind::Executor)]
#[case::balanced(DriverKind::Balanced)]
fn test_resizing_is_illegal_once_finished(#[case] kind: DriverKind) {
    let driver = test_driver::<u32>(kind, Arc::new(Lifecycle::default()), FaultTolerance::None);
    let Some(resizable) = driver.prioritizable() else { panic!("{kind:?} should be prioritizable") };
    driver.start().unwrap();
    resizable.increase_priority(1).unwrap();
    driver.finish().unwrap();

    assert!(matches!(resizable.increase_priority(1), Err(DriverError::IllegalState { .. })));
    assert!(matches!(resizable.decrease_priority(1), Err(DriverError::IllegalState { .. })));
}
