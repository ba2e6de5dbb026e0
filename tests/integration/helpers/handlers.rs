//! Handlers and sinks shared by the integration tests.

use fgstage_lib::driver::Feeder;
use fgstage_lib::errors::{DriverError, HandlerError};
use fgstage_lib::Handler;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Downstream sink that keeps everything fed to it, in arrival order.
pub struct Collector<T> {
    items: Mutex<Vec<T>>,
}

impl<T: Clone> Collector<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { items: Mutex::new(Vec::new()) })
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T: Send> Feeder<T> for Collector<T> {
    fn feed(&self, item: T) -> Result<(), DriverError> {
        self.items.lock().push(item);
        Ok(())
    }
}

/// How [`Forwarding`] fails on its poisoned item.
#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    Declared,
    Undeclared,
    Panic,
}

/// Forwards every item downstream except `fail_on`, which fails.
pub struct Forwarding<T> {
    pub name: String,
    pub downstream: Arc<dyn Feeder<T>>,
    pub fail_on: Option<(T, FailureKind)>,
    pub latency: Duration,
}

impl<T> Forwarding<T> {
    pub fn new(name: &str, downstream: Arc<dyn Feeder<T>>) -> Self {
        Self { name: name.to_string(), downstream, fail_on: None, latency: Duration::ZERO }
    }

    pub fn failing_on(mut self, item: T, kind: FailureKind) -> Self {
        self.fail_on = Some((item, kind));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl<T: PartialEq + std::fmt::Debug + Send + Sync> Handler<T> for Forwarding<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, item: T) -> Result<(), HandlerError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match &self.fail_on {
            Some((bad, FailureKind::Declared)) if *bad == item => {
                Err(HandlerError::processing(format!("cannot handle {item:?}")))
            }
            Some((bad, FailureKind::Undeclared)) if *bad == item => {
                Err(HandlerError::runtime(format!("broke on {item:?}")))
            }
            Some((bad, FailureKind::Panic)) if *bad == item => panic!("panicked on {item:?}"),
            _ => self.downstream.feed(item).map_err(|e| HandlerError::Runtime(e.into())),
        }
    }
}

/// Counts lifecycle calls; can fail `preprocess` or `postprocess` on demand.
#[derive(Default)]
pub struct Lifecycle {
    pub fail_preprocess: bool,
    pub fail_postprocess: bool,
    pub latency: Duration,
    pub preprocessed: AtomicUsize,
    pub processed: AtomicUsize,
    pub postprocessed: AtomicUsize,
    /// `process` calls that returned after `postprocess` had run.
    pub processed_late: AtomicUsize,
    pub released: AtomicUsize,
}

impl Lifecycle {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Handler<u32> for Lifecycle {
    fn name(&self) -> &str {
        "lifecycle"
    }

    fn preprocess(&self) -> Result<(), HandlerError> {
        self.preprocessed.fetch_add(1, Ordering::SeqCst);
        if self.fail_preprocess { Err(HandlerError::runtime("cannot open input")) } else { Ok(()) }
    }

    fn process(&self, _item: u32) -> Result<(), HandlerError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.postprocessed.load(Ordering::SeqCst) > 0 {
            self.processed_late.fetch_add(1, Ordering::SeqCst);
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn postprocess(&self) -> Result<(), HandlerError> {
        self.postprocessed.fetch_add(1, Ordering::SeqCst);
        if self.fail_postprocess { Err(HandlerError::runtime("cannot flush")) } else { Ok(()) }
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Blocks in `process` until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    pub processed: AtomicUsize,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl Handler<u32> for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn process(&self, _item: u32) -> Result<(), HandlerError> {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
