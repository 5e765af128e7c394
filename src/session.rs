use crate::clock::{system_clock, SharedClock};
use crate::collector::{CollectionCoordinator, DrainControl, DrainLoop, DrainState};
use crate::config::{
    CollectorConfig, ConfigError, ConfigPatchResult, ConfigService, KEY_CACHE_SIZE,
    KEY_CLIENT_QUEUE_SIZE, KEY_FILL_TIMEOUT_MS, KEY_OBJECT_ID_OFFSET,
    KEY_QUEUE_POLL_TIMEOUT_MS, KEY_SEQUENTIAL_UPDATES,
};
use crate::event::ProducerId;
use crate::grouping::GroupAssignment;
use crate::logging::SessionLogger;
use crate::processor::{
    EventProcessor, NoopProcessor, ProcessingController, ProcessingError, ProcessorRegistry,
};
use crate::producer::{EventSource, ProducerChannel, ProducerMode, ProducerSink, SourceError};
use crate::stats::CollectorStats;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

const NS_PER_SEC: f64 = 1_000_000_000.0;

/// Errors surfaced by session construction and control operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Processor(#[from] ProcessingError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to spawn drain loop: {0}")]
    Spawn(#[source] io::Error),
    #[error("drain loop panicked")]
    DrainLoopPanicked,
}

/// Assembles a collection session: producers, sources, processor, and collaborators.
pub struct SessionBuilder<P> {
    session_id: String,
    config: CollectorConfig,
    producers: Vec<ProducerId>,
    sources: Vec<Box<dyn EventSource<P>>>,
    processor: Option<Result<Box<dyn EventProcessor<P>>, ConfigError>>,
    clock: Option<SharedClock>,
    logger: Option<SessionLogger>,
}

impl<P: Send + 'static> SessionBuilder<P> {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            config: CollectorConfig::default(),
            producers: Vec::new(),
            sources: Vec::new(),
            processor: None,
            clock: None,
            logger: None,
        }
    }

    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a producer fed through `CollectionSession::sink`.
    pub fn producer(mut self, id: impl Into<ProducerId>) -> Self {
        self.producers.push(id.into());
        self
    }

    /// Registers a source; it is subscribed once the drain loop is running.
    pub fn source(mut self, source: Box<dyn EventSource<P>>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn processor(mut self, processor: impl EventProcessor<P> + 'static) -> Self {
        self.processor = Some(Ok(Box::new(processor)));
        self
    }

    /// Resolves the processor by name; an unknown name fails `start`.
    pub fn processor_from_registry(mut self, registry: &ProcessorRegistry<P>, name: &str) -> Self {
        self.processor = Some(registry.resolve(name));
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn logger(mut self, logger: SessionLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validates the configuration, spawns the drain loop, and subscribes every source.
    pub fn start(self) -> Result<CollectionSession<P>, SessionError> {
        let mut producers = self.producers;
        for source in &self.sources {
            producers.push(source.producer_id());
        }
        let mut seen = BTreeSet::new();
        producers.retain(|id| seen.insert(id.clone()));

        let config_service = ConfigService::new(self.config, producers.len())?;
        let config = config_service.current().clone();
        let grouping = grouping_for(&config)?;
        let processor: Box<dyn EventProcessor<P>> = match self.processor {
            Some(resolved) => resolved?,
            None => Box::new(NoopProcessor::new()),
        };

        let clock = self.clock.unwrap_or_else(system_clock);
        let logger = self
            .logger
            .unwrap_or_else(|| SessionLogger::new(&self.session_id, clock.clone()));
        let coordinator = Arc::new(CollectionCoordinator::new(
            &producers,
            config.cache_size,
            config.object_id_offset,
            clock.clone(),
            logger.clone(),
        )?);

        let mode = match config.effective_queue_size(producers.len()) {
            Some(capacity) => ProducerMode::Queue {
                capacity: usize::try_from(capacity).unwrap_or(usize::MAX),
            },
            None => ProducerMode::Push,
        };
        let channels: Vec<Arc<ProducerChannel<P>>> = producers
            .iter()
            .map(|id| {
                Arc::new(ProducerChannel::new(
                    id.clone(),
                    mode,
                    coordinator.clone(),
                    clock.clone(),
                    logger.clone(),
                ))
            })
            .collect();

        let controller = Arc::new(ProcessingController::new(
            processor,
            grouping,
            clock.clone(),
            logger.clone(),
        ));
        controller.start()?;

        let control = Arc::new(DrainControl::new(
            config.fill_timeout(),
            config.queue_poll_timeout(),
        ));
        let drain = DrainLoop::new(
            coordinator.clone(),
            channels.clone(),
            controller.clone(),
            control.clone(),
            logger.clone(),
        )
        .spawn(format!("{}_drain", self.session_id))
        .map_err(SessionError::Spawn)?;

        let session = CollectionSession {
            id: Arc::from(self.session_id.as_str()),
            config: Mutex::new(config_service),
            coordinator,
            channels,
            controller,
            control,
            sources: Mutex::new(Vec::new()),
            drain: Mutex::new(Some(drain)),
            started_ns: clock.now_ns(),
            clock,
            logger,
        };
        session.logger.info(
            "session",
            &format!(
                "session started: {} producers, {} mode, cache size {}",
                session.channels.len(),
                match mode {
                    ProducerMode::Push => "push",
                    ProducerMode::Queue { .. } => "queue",
                },
                session.coordinator.cache_size()
            ),
        );

        for mut source in self.sources {
            let producer = source.producer_id();
            let Some(sink) = session.sink(producer.as_str()) else {
                continue;
            };
            if let Err(err) = source.subscribe(sink) {
                session.logger.error("session", &err.to_string());
                let _ = session.stop();
                return Err(err.into());
            }
            session.sources.lock().push(source);
        }
        Ok(session)
    }
}

impl<P> fmt::Debug for SessionBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("producers", &self.producers)
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// A running collection: one reorder cache, one drain loop, and the control surface
/// (`configure`, `reset_stats`, `get_stats`, `stop`).
pub struct CollectionSession<P: Send + 'static> {
    id: Arc<str>,
    config: Mutex<ConfigService>,
    coordinator: Arc<CollectionCoordinator<P>>,
    channels: Vec<Arc<ProducerChannel<P>>>,
    controller: Arc<ProcessingController<P>>,
    control: Arc<DrainControl>,
    sources: Mutex<Vec<Box<dyn EventSource<P>>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    started_ns: u128,
    clock: SharedClock,
    logger: SessionLogger,
}

impl<P: Send + 'static> CollectionSession<P> {
    pub fn builder(session_id: impl Into<String>) -> SessionBuilder<P> {
        SessionBuilder::new(session_id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn logger(&self) -> &SessionLogger {
        &self.logger
    }

    pub fn config(&self) -> CollectorConfig {
        self.config.lock().current().clone()
    }

    pub fn config_version(&self) -> u64 {
        self.config.lock().version()
    }

    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.channels
            .iter()
            .map(|channel| channel.id().clone())
            .collect()
    }

    /// Handle for delivering events on behalf of producer `id`.
    pub fn sink(&self, id: &str) -> Option<ProducerSink<P>> {
        self.channels
            .iter()
            .find(|channel| channel.id().as_str() == id)
            .map(|channel| ProducerSink::new(channel.clone()))
    }

    pub fn drain_state(&self) -> DrainState {
        self.control.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.drain.lock().is_none()
    }

    /// Applies a runtime configuration patch. Collector keys take effect first; keys the
    /// collector does not recognize are then forwarded to the processor.
    pub fn configure(&self, patch: &Value) -> Result<ConfigPatchResult, SessionError> {
        let (result, config) = {
            let mut service = self.config.lock();
            let result = service.patch(patch)?;
            (result, service.current().clone())
        };
        let changed = |key: &str| result.changed_keys.iter().any(|changed| changed == key);

        if changed(KEY_CACHE_SIZE) {
            self.coordinator.configure(config.cache_size)?;
        }
        if changed(KEY_CACHE_SIZE) || changed(KEY_CLIENT_QUEUE_SIZE) {
            if let Some(capacity) = config.effective_queue_size(self.channels.len()) {
                let capacity = usize::try_from(capacity).unwrap_or(usize::MAX);
                for channel in &self.channels {
                    channel.resize_queue(capacity);
                }
            }
        }
        if changed(KEY_OBJECT_ID_OFFSET) || changed(KEY_SEQUENTIAL_UPDATES) {
            self.coordinator
                .set_object_id_offset(config.object_id_offset)?;
            self.controller.set_grouping(grouping_for(&config)?);
        }
        if changed(KEY_FILL_TIMEOUT_MS) {
            self.control.set_fill_timeout(config.fill_timeout());
        }
        if changed(KEY_QUEUE_POLL_TIMEOUT_MS) {
            self.control.set_poll_timeout(config.queue_poll_timeout());
        }
        if !result.changed_keys.is_empty() {
            self.logger.info(
                "config",
                &format!(
                    "configuration v{} applied: {}",
                    result.version,
                    result.changed_keys.join(", ")
                ),
            );
        }
        self.controller.configure(&result.passthrough)?;
        Ok(result)
    }

    /// Zeroes every counter and rate window. The cache and its watermark are untouched.
    pub fn reset_stats(&self) {
        self.coordinator.reset_stats();
        self.controller.reset_stats();
        self.logger.info("session", "statistics reset");
    }

    pub fn get_stats(&self) -> CollectorStats {
        let counters = self.coordinator.counters();
        let window = counters.window();
        let processing = self.controller.counters();
        let processing_window = processing.window();
        let (n_collected, n_rejected, n_missed) =
            (counters.collected(), counters.rejected(), counters.missed());
        let (n_processed, n_errors) = (processing.processed(), processing.errors());
        CollectorStats {
            n_collected,
            collected_rate: window.rate(n_collected),
            n_rejected,
            rejected_rate: window.rate(n_rejected),
            n_missed,
            missed_rate: window.rate(n_missed),
            n_processed,
            processed_rate: processing_window.rate(n_processed),
            n_errors,
            error_rate: processing_window.rate(n_errors),
            n_group_missed: processing.group_missed(),
            cache_size: self.coordinator.cache_size(),
            cache_len: self.coordinator.cache_len(),
            last_delivered_id: self.coordinator.last_delivered_id(),
            runtime_s: self.clock.now_ns().saturating_sub(self.started_ns) as f64 / NS_PER_SEC,
            producers: self.channels.iter().map(|channel| channel.stats()).collect(),
            processor: self.controller.processor_stats(),
        }
    }

    /// Whether everything accepted so far has been handed to the processor.
    pub fn is_drained(&self) -> bool {
        let processing = self.controller.counters();
        self.coordinator.cache_len() == 0
            && self.channels.iter().all(|channel| channel.queued() == 0)
            && self.coordinator.counters().collected()
                == processing.processed() + processing.errors()
    }

    /// Blocks until `is_drained` holds or `timeout` elapses.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let progress = self.control.progress();
        loop {
            let generation = progress.generation();
            if self.is_drained() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            progress.wait_for_generation(generation, deadline - now);
        }
    }

    /// Unsubscribes sources, flushes every buffered event through the processor, joins
    /// the drain loop, and returns the final statistics. Later calls only report stats.
    pub fn stop(&self) -> Result<CollectorStats, SessionError> {
        let Some(handle) = self.drain.lock().take() else {
            return Ok(self.get_stats());
        };
        for source in self.sources.lock().iter_mut() {
            source.unsubscribe();
        }
        // Closing first means every accepted event is buffered before finishing starts.
        for channel in &self.channels {
            channel.close();
        }
        self.control.request_stop();
        self.coordinator.signal().set();

        let joined = handle.join();
        self.controller.stop();
        if joined.is_err() {
            self.logger.error("session", "drain loop panicked");
            return Err(SessionError::DrainLoopPanicked);
        }
        let stats = self.get_stats();
        self.logger.info(
            "session",
            &format!(
                "session stopped: collected {}, processed {}, errors {}, missed {}",
                stats.n_collected, stats.n_processed, stats.n_errors, stats.n_missed
            ),
        );
        Ok(stats)
    }
}

impl<P: Send + 'static> Drop for CollectionSession<P> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl<P: Send + 'static> fmt::Debug for CollectionSession<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSession")
            .field("id", &self.id)
            .field("drain_state", &self.drain_state())
            .field("coordinator", &self.coordinator)
            .field("channels", &self.channels)
            .finish()
    }
}

/// Gap detection is on whenever ids are spread across a group.
fn grouping_for(config: &CollectorConfig) -> Result<Option<GroupAssignment>, ConfigError> {
    let assignment = GroupAssignment::new(config.object_id_offset, config.n_sequential_updates)?;
    Ok(assignment.is_grouped().then_some(assignment))
}
