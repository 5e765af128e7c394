use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Multiplier applied to the producer count (cache floor) and cache size (queue floor).
pub const SCALING_FACTOR: u64 = 10;
/// Quiet period after which a partially filled cache is drained anyway.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_SIZE: u64 = 1_000;
pub const DEFAULT_QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub const KEY_CACHE_SIZE: &str = "collectorCacheSize";
pub const KEY_CLIENT_QUEUE_SIZE: &str = "clientQueueSize";
pub const KEY_OBJECT_ID_OFFSET: &str = "objectIdOffset";
pub const KEY_SEQUENTIAL_UPDATES: &str = "nSequentialUpdates";
pub const KEY_FILL_TIMEOUT_MS: &str = "fillTimeoutMs";
pub const KEY_QUEUE_POLL_TIMEOUT_MS: &str = "queuePollTimeoutMs";

/// Collector knobs recognized by the core. Keys serialize in the control-surface spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    #[serde(rename = "collectorCacheSize")]
    pub cache_size: u64,
    pub client_queue_size: Option<u64>,
    pub object_id_offset: u64,
    pub n_sequential_updates: u64,
    pub fill_timeout_ms: u64,
    pub queue_poll_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            client_queue_size: None,
            object_id_offset: 1,
            n_sequential_updates: 1,
            fill_timeout_ms: millis(EVENT_TIMEOUT),
            queue_poll_timeout_ms: millis(DEFAULT_QUEUE_POLL_TIMEOUT),
        }
    }
}

impl CollectorConfig {
    pub fn with_cache_size(mut self, cache_size: u64) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_client_queue_size(mut self, size: u64) -> Self {
        self.client_queue_size = Some(size);
        self
    }

    pub fn with_object_id_offset(mut self, offset: u64) -> Self {
        self.object_id_offset = offset;
        self
    }

    pub fn with_sequential_updates(mut self, updates: u64) -> Self {
        self.n_sequential_updates = updates;
        self
    }

    pub fn with_fill_timeout(mut self, timeout: Duration) -> Self {
        self.fill_timeout_ms = millis(timeout);
        self
    }

    pub fn with_queue_poll_timeout(mut self, timeout: Duration) -> Self {
        self.queue_poll_timeout_ms = millis(timeout);
        self
    }

    /// Whether producers deliver through bounded client queues.
    pub fn queue_mode(&self) -> bool {
        self.client_queue_size.is_some()
    }

    /// Cache size after applying the per-producer floor.
    pub fn effective_cache_size(&self, n_producers: usize) -> u64 {
        effective_cache_size(self.cache_size, n_producers)
    }

    /// Client queue capacity after applying the cache-size floor, if queue mode is on.
    pub fn effective_queue_size(&self, n_producers: usize) -> Option<u64> {
        self.client_queue_size.map(|configured| {
            configured.max(
                self.effective_cache_size(n_producers)
                    .saturating_mul(SCALING_FACTOR),
            )
        })
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_poll_timeout_ms.max(1))
    }

    /// Validates static configuration for a session with `n_producers` producers.
    pub fn validate(&self, n_producers: usize) -> Result<(), ConfigError> {
        if n_producers == 0 {
            return Err(ConfigError::NoProducers);
        }
        if self.cache_size == 0 {
            return Err(ConfigError::invalid(KEY_CACHE_SIZE, "must be at least 1"));
        }
        if self.object_id_offset == 0 {
            return Err(ConfigError::invalid(KEY_OBJECT_ID_OFFSET, "must be at least 1"));
        }
        if self.n_sequential_updates == 0 {
            return Err(ConfigError::invalid(
                KEY_SEQUENTIAL_UPDATES,
                "must be at least 1",
            ));
        }
        if self.fill_timeout_ms == 0 {
            return Err(ConfigError::invalid(KEY_FILL_TIMEOUT_MS, "must be at least 1"));
        }
        Ok(())
    }
}

pub(crate) fn effective_cache_size(configured: u64, n_producers: usize) -> u64 {
    configured.max((n_producers as u64).saturating_mul(SCALING_FACTOR))
}

/// Tracks the live collector configuration and applies runtime patches.
#[derive(Debug, Clone)]
pub struct ConfigService {
    current: CollectorConfig,
    version: u64,
    n_producers: usize,
    validation_failures_total: u64,
}

impl ConfigService {
    /// Creates a service seeded with a validated configuration.
    pub fn new(initial: CollectorConfig, n_producers: usize) -> Result<Self, ConfigError> {
        initial.validate(n_producers)?;
        Ok(Self {
            current: initial,
            version: 1,
            n_producers,
            validation_failures_total: 0,
        })
    }

    pub fn current(&self) -> &CollectorConfig {
        &self.current
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn validation_failures_total(&self) -> u64 {
        self.validation_failures_total
    }

    /// Applies a JSON object patch. Recognized keys are validated as a whole before any
    /// of them take effect; unrecognized keys are handed back for the processor.
    pub fn patch(&mut self, patch: &Value) -> Result<ConfigPatchResult, ConfigError> {
        let Some(patch_map) = patch.as_object() else {
            return Err(self.reject(ConfigError::InvalidPatch(
                "patch must be a JSON object".into(),
            )));
        };
        let mut next = self.current.clone();
        let mut passthrough = Map::new();
        for (key, value) in patch_map {
            if let Err(err) = apply_key(&mut next, key, value, &mut passthrough) {
                return Err(self.reject(err));
            }
        }
        if next.queue_mode() != self.current.queue_mode() {
            return Err(self.reject(ConfigError::RestartRequired(
                KEY_CLIENT_QUEUE_SIZE.into(),
            )));
        }
        if let Err(err) = next.validate(self.n_producers) {
            return Err(self.reject(err));
        }
        let changed_keys = diff_keys(&self.current, &next);
        if !changed_keys.is_empty() {
            self.version += 1;
            self.current = next;
        }
        Ok(ConfigPatchResult {
            version: self.version,
            changed_keys,
            passthrough,
        })
    }

    fn reject(&mut self, err: ConfigError) -> ConfigError {
        self.validation_failures_total = self.validation_failures_total.saturating_add(1);
        err
    }
}

fn apply_key(
    config: &mut CollectorConfig,
    key: &str,
    value: &Value,
    passthrough: &mut Map<String, Value>,
) -> Result<(), ConfigError> {
    match key {
        KEY_CACHE_SIZE => config.cache_size = read_u64(key, value)?,
        KEY_CLIENT_QUEUE_SIZE => {
            config.client_queue_size = if value.is_null() {
                None
            } else {
                Some(read_u64(key, value)?)
            }
        }
        KEY_OBJECT_ID_OFFSET => config.object_id_offset = read_u64(key, value)?,
        KEY_SEQUENTIAL_UPDATES => config.n_sequential_updates = read_u64(key, value)?,
        KEY_FILL_TIMEOUT_MS => config.fill_timeout_ms = read_u64(key, value)?,
        KEY_QUEUE_POLL_TIMEOUT_MS => config.queue_poll_timeout_ms = read_u64(key, value)?,
        _ => {
            passthrough.insert(key.to_string(), value.clone());
        }
    }
    Ok(())
}

fn read_u64(key: &str, value: &Value) -> Result<u64, ConfigError> {
    if let Some(number) = value.as_u64() {
        return Ok(number);
    }
    // Control clients frequently send numbers as strings.
    value
        .as_str()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .ok_or_else(|| ConfigError::invalid(key, "expected a non-negative integer"))
}

fn diff_keys(current: &CollectorConfig, next: &CollectorConfig) -> Vec<String> {
    let mut keys = BTreeSet::new();
    if current.cache_size != next.cache_size {
        keys.insert(KEY_CACHE_SIZE);
    }
    if current.client_queue_size != next.client_queue_size {
        keys.insert(KEY_CLIENT_QUEUE_SIZE);
    }
    if current.object_id_offset != next.object_id_offset {
        keys.insert(KEY_OBJECT_ID_OFFSET);
    }
    if current.n_sequential_updates != next.n_sequential_updates {
        keys.insert(KEY_SEQUENTIAL_UPDATES);
    }
    if current.fill_timeout_ms != next.fill_timeout_ms {
        keys.insert(KEY_FILL_TIMEOUT_MS);
    }
    if current.queue_poll_timeout_ms != next.queue_poll_timeout_ms {
        keys.insert(KEY_QUEUE_POLL_TIMEOUT_MS);
    }
    keys.into_iter().map(str::to_string).collect()
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Result of applying a configuration patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigPatchResult {
    pub version: u64,
    pub changed_keys: Vec<String>,
    /// Keys the collector does not own, forwarded to the processor.
    #[serde(skip)]
    pub passthrough: Map<String, Value>,
}

impl ConfigPatchResult {
    pub fn is_noop(&self) -> bool {
        self.changed_keys.is_empty() && self.passthrough.is_empty()
    }
}

/// Errors surfaced while validating or patching the collector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("collection session requires at least one producer")]
    NoProducers,
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("invalid config patch: {0}")]
    InvalidPatch(String),
    #[error("changing {0} requires restarting the collection session")]
    RestartRequired(String),
    #[error("unknown processor '{0}'")]
    UnknownProcessor(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: &str) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
