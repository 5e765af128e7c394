//! Ordered multi-producer event collection: reorders events from independent producers
//! into strict id order, accounts for gaps, and hands them to a single processor.

pub mod clock;
pub mod collector;
pub mod config;
pub mod control;
pub mod event;
pub mod grouping;
pub mod logging;
pub mod processor;
pub mod producer;
pub mod session;
pub mod stats;

pub use clock::{MonotonicClock, SharedClock, SystemMonotonicClock};
pub use collector::{
    CacheInsert, CachedEvent, CollectionCoordinator, CoordinatorCounters, DrainControl,
    DrainLoop, DrainSignal, DrainState, DrainedRun, FillState, ReorderCache,
};
pub use config::{
    CollectorConfig, ConfigError, ConfigPatchResult, ConfigService, DEFAULT_CACHE_SIZE,
    DEFAULT_QUEUE_POLL_TIMEOUT, EVENT_TIMEOUT, KEY_CACHE_SIZE, KEY_CLIENT_QUEUE_SIZE,
    KEY_FILL_TIMEOUT_MS, KEY_OBJECT_ID_OFFSET, KEY_QUEUE_POLL_TIMEOUT_MS,
    KEY_SEQUENTIAL_UPDATES, SCALING_FACTOR,
};
pub use control::{ControlCommand, ControlReply};
pub use event::{Event, ProducerId};
pub use grouping::{GapEstimate, GroupAssignment, GroupedGapDetector};
pub use logging::{
    JsonLineLogger, LogFile, LogLevel, LogRecord, LogRotationPolicy, LoggingError, SessionLogger,
};
pub use processor::{
    EventProcessor, NoopProcessor, ProcessingController, ProcessingCounters, ProcessingError,
    ProcessorFactory, ProcessorRegistry,
};
pub use producer::{
    EventSource, ProcessOutcome, ProducerChannel, ProducerCounters, ProducerMode, ProducerQueue,
    ProducerSink, QueueOverrun, SourceError,
};
pub use session::{CollectionSession, SessionBuilder, SessionError};
pub use stats::{rate_per_sec, CollectorStats, ProducerStats, StatsTracker};
