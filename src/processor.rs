use crate::clock::SharedClock;
use crate::config::ConfigError;
use crate::event::Event;
use crate::grouping::{GroupAssignment, GroupedGapDetector};
use crate::logging::SessionLogger;
use crate::stats::StatsTracker;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Downstream stage receiving delivered events, one at a time, in increasing id order.
///
/// Only `process` is required. The hooks default to no-ops so simple processors stay
/// small; closures of the right shape implement the trait directly.
pub trait EventProcessor<P>: Send {
    fn process(&mut self, event: &Event<P>) -> Result<(), ProcessingError>;

    /// Receives configuration keys the collector itself does not recognize.
    fn configure(&mut self, _patch: &Map<String, Value>) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn reset_stats(&mut self) {}

    fn stats(&self) -> Value {
        Value::Null
    }
}

impl<P, F> EventProcessor<P> for F
where
    F: FnMut(&Event<P>) -> Result<(), ProcessingError> + Send,
{
    fn process(&mut self, event: &Event<P>) -> Result<(), ProcessingError> {
        self(event)
    }
}

/// Accepts everything and counts what it saw.
#[derive(Debug, Default, Clone)]
pub struct NoopProcessor {
    seen: u64,
    last_id: Option<u64>,
}

impl NoopProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P> EventProcessor<P> for NoopProcessor {
    fn process(&mut self, event: &Event<P>) -> Result<(), ProcessingError> {
        self.seen += 1;
        self.last_id = Some(event.id);
        Ok(())
    }

    fn reset_stats(&mut self) {
        self.seen = 0;
    }

    fn stats(&self) -> Value {
        json!({ "seen": self.seen, "lastId": self.last_id })
    }
}

/// Errors raised by a processor. None of them stop the drain loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("processing failed: {0}")]
    Failed(String),
    #[error("processor panicked: {0}")]
    Panicked(String),
    #[error("processor rejected configuration: {0}")]
    Configuration(String),
}

impl ProcessingError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ProcessingError::Failed(reason.into())
    }
}

pub type ProcessorFactory<P> = Arc<dyn Fn() -> Box<dyn EventProcessor<P>> + Send + Sync>;

/// Processors addressable by a stable identifier, resolved when a session starts.
pub struct ProcessorRegistry<P> {
    factories: BTreeMap<String, ProcessorFactory<P>>,
}

impl<P> Default for ProcessorRegistry<P> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<P: 'static> ProcessorRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in `noop` processor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("noop", || {
            Box::new(NoopProcessor::new()) as Box<dyn EventProcessor<P>>
        });
        registry
    }

    /// Registers or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn EventProcessor<P>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn EventProcessor<P>>, ConfigError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::UnknownProcessor(name.to_string()))
    }
}

impl<P> fmt::Debug for ProcessorRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Processed, errored, and group-missed counters of the downstream stage.
#[derive(Debug, Default)]
pub struct ProcessingCounters {
    processed: AtomicU64,
    errors: AtomicU64,
    group_missed: AtomicU64,
    window: Mutex<StatsTracker>,
}

impl ProcessingCounters {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn group_missed(&self) -> u64 {
        self.group_missed.load(Ordering::Relaxed)
    }

    pub fn window(&self) -> StatsTracker {
        *self.window.lock()
    }

    fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.group_missed.store(0, Ordering::Relaxed);
        self.window.lock().reset();
    }
}

/// Wraps the user processor with gap detection and error isolation.
pub struct ProcessingController<P> {
    processor: Mutex<Box<dyn EventProcessor<P>>>,
    detector: Mutex<Option<GroupedGapDetector>>,
    counters: ProcessingCounters,
    clock: SharedClock,
    logger: SessionLogger,
}

impl<P> ProcessingController<P> {
    pub fn new(
        processor: Box<dyn EventProcessor<P>>,
        grouping: Option<GroupAssignment>,
        clock: SharedClock,
        logger: SessionLogger,
    ) -> Self {
        Self {
            processor: Mutex::new(processor),
            detector: Mutex::new(grouping.map(GroupedGapDetector::new)),
            counters: ProcessingCounters::default(),
            clock,
            logger,
        }
    }

    pub fn counters(&self) -> &ProcessingCounters {
        &self.counters
    }

    pub fn grouping(&self) -> Option<GroupAssignment> {
        self.detector
            .lock()
            .as_ref()
            .map(GroupedGapDetector::assignment)
    }

    /// Switches gap detection on, off, or to a new distribution shape. An existing
    /// detector keeps its watermark so the next id is judged against it.
    pub fn set_grouping(&self, grouping: Option<GroupAssignment>) {
        let mut detector = self.detector.lock();
        *detector = match (detector.take(), grouping) {
            (Some(mut current), Some(assignment)) => {
                current.reassign(assignment);
                Some(current)
            }
            (None, Some(assignment)) => Some(GroupedGapDetector::new(assignment)),
            (_, None) => None,
        };
    }

    pub fn start(&self) -> Result<(), ProcessingError> {
        self.processor.lock().start()
    }

    pub fn stop(&self) {
        let mut processor = self.processor.lock();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| processor.stop())) {
            self.logger.error(
                "processor",
                &format!("processor panicked while stopping: {}", panic_message(&*payload)),
            );
        }
    }

    pub fn configure(&self, patch: &Map<String, Value>) -> Result<(), ProcessingError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.processor.lock().configure(patch)
    }

    /// Hands one event to the processor. Failures and panics are counted and logged;
    /// the returned error is informational only.
    pub fn deliver(&self, event: &Event<P>) -> Result<(), ProcessingError> {
        if let Some(detector) = self.detector.lock().as_mut() {
            let estimate = detector.observe(event.id);
            if estimate.missed > 0 {
                self.counters
                    .group_missed
                    .fetch_add(estimate.missed, Ordering::Relaxed);
                self.logger.debug(
                    "processor",
                    &format!(
                        "group gap before id {}: missed {} ({} rotations)",
                        event.id, estimate.missed, estimate.missed_rotations
                    ),
                );
            }
        }

        let result = {
            let mut processor = self.processor.lock();
            match panic::catch_unwind(AssertUnwindSafe(|| processor.process(event))) {
                Ok(result) => result,
                Err(payload) => Err(ProcessingError::Panicked(panic_message(&*payload))),
            }
        };
        self.counters.window.lock().record(self.clock.now_ns());
        match &result {
            Ok(()) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.logger
                    .warn("processor", &format!("object {}: {err}", event.id));
            }
        }
        result
    }

    /// Zeroes counters and the processor's own stats. The gap detector keeps its history.
    pub fn reset_stats(&self) {
        self.counters.reset();
        self.processor.lock().reset_stats();
    }

    pub fn processor_stats(&self) -> Value {
        self.processor.lock().stats()
    }
}

impl<P> fmt::Debug for ProcessingController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingController")
            .field("grouping", &self.grouping())
            .field("counters", &self.counters)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
