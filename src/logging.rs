use crate::clock::{saturating_u64, SharedClock};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Severity levels accepted by the session logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the canonical uppercase representation.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parses a level name case-insensitively; `WARNING` is accepted for `Warn`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotation policy (default keeps 10 segments of 1 MiB in memory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: usize,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 1 << 20,
            max_files: 10,
        }
    }
}

/// Accumulated log lines for a rotated segment.
#[derive(Debug, Default, Clone)]
pub struct LogFile {
    lines: Vec<String>,
    bytes_written: usize,
}

impl LogFile {
    /// Serialized records held by this segment, oldest first.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Bytes counted against the rotation threshold.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

/// JSON-line logger with deterministic rotation semantics.
#[derive(Debug, Clone)]
pub struct JsonLineLogger {
    policy: LogRotationPolicy,
    current_level: LogLevel,
    files: VecDeque<LogFile>,
    active: LogFile,
}

impl JsonLineLogger {
    /// Creates a logger at `Info` that rotates according to `policy`.
    pub fn new(policy: LogRotationPolicy) -> Self {
        Self {
            policy,
            current_level: LogLevel::Info,
            files: VecDeque::new(),
            active: LogFile::default(),
        }
    }

    /// Minimum level currently written.
    pub fn level(&self) -> LogLevel {
        self.current_level
    }

    /// Changes the minimum level; takes effect for the next record.
    pub fn set_level(&mut self, level: LogLevel) {
        self.current_level = level;
    }

    /// Whether a record at `level` would be written.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.current_level
    }

    /// Emits a JSON-line log entry; entries below the current level are dropped.
    pub fn log(&mut self, record: &LogRecord<'_>) -> Result<bool, LoggingError> {
        if !self.enabled(record.level) {
            return Ok(false);
        }
        let line = serde_json::to_string(record)?;
        self.rotate_if_needed(line.len());
        self.active.bytes_written = self.active.bytes_written.saturating_add(line.len());
        self.active.lines.push(line);
        Ok(true)
    }

    /// Returns rotated segments followed by the active one.
    pub fn files(&self) -> impl Iterator<Item = &LogFile> {
        self.files.iter().chain(std::iter::once(&self.active))
    }

    /// Every retained line across rotated and active segments.
    pub fn lines(&self) -> Vec<String> {
        self.files()
            .flat_map(|file| file.lines().iter().cloned())
            .collect()
    }

    fn rotate_if_needed(&mut self, next_line_len: usize) {
        if self.active.bytes_written + next_line_len <= self.policy.max_bytes {
            return;
        }
        if !self.active.lines.is_empty() {
            self.files.push_back(std::mem::take(&mut self.active));
            while self.files.len() > self.policy.max_files {
                self.files.pop_front();
            }
        }
        self.active = LogFile::default();
    }
}

/// Serialized shape of a single log line.
#[derive(Debug, Serialize)]
pub struct LogRecord<'a> {
    pub ts_ms: u64,
    #[serde(serialize_with = "serialize_level")]
    pub level: LogLevel,
    pub module: &'a str,
    pub session: &'a str,
    pub seq: u64,
    pub message: &'a str,
}

fn serialize_level<S: serde::Serializer>(level: &LogLevel, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

/// Per-session logger handle. Cloned into every component of one collection session;
/// each record lands in the session's JSON-line buffer and is mirrored to `tracing`.
#[derive(Clone)]
pub struct SessionLogger {
    session: Arc<str>,
    clock: SharedClock,
    seq: Arc<AtomicU64>,
    sink: Arc<Mutex<JsonLineLogger>>,
}

impl SessionLogger {
    pub fn new(session: impl AsRef<str>, clock: SharedClock) -> Self {
        Self::with_policy(session, clock, LogRotationPolicy::default())
    }

    pub fn with_policy(
        session: impl AsRef<str>,
        clock: SharedClock,
        policy: LogRotationPolicy,
    ) -> Self {
        Self {
            session: Arc::from(session.as_ref()),
            clock,
            seq: Arc::new(AtomicU64::new(0)),
            sink: Arc::new(Mutex::new(JsonLineLogger::new(policy))),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn level(&self) -> LogLevel {
        self.sink.lock().level()
    }

    pub fn set_level(&self, level: LogLevel) {
        self.sink.lock().set_level(level);
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.sink.lock().enabled(level)
    }

    pub fn log(&self, level: LogLevel, module: &str, message: &str) {
        mirror_to_tracing(level, &self.session, module, message);
        let mut sink = self.sink.lock();
        if !sink.enabled(level) {
            return;
        }
        let record = LogRecord {
            ts_ms: saturating_u64(self.clock.now_ns() / 1_000_000),
            level,
            module,
            session: &self.session,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            message,
        };
        if let Err(err) = sink.log(&record) {
            tracing::error!(session = %self.session, error = %err, "dropping log record");
        }
    }

    pub fn debug(&self, module: &str, message: &str) {
        self.log(LogLevel::Debug, module, message);
    }

    pub fn info(&self, module: &str, message: &str) {
        self.log(LogLevel::Info, module, message);
    }

    pub fn warn(&self, module: &str, message: &str) {
        self.log(LogLevel::Warn, module, message);
    }

    pub fn error(&self, module: &str, message: &str) {
        self.log(LogLevel::Error, module, message);
    }

    /// Copies the buffered JSON lines (rotated segments first).
    pub fn lines(&self) -> Vec<String> {
        self.sink.lock().lines()
    }
}

impl fmt::Debug for SessionLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLogger")
            .field("session", &self.session)
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish()
    }
}

fn mirror_to_tracing(level: LogLevel, session: &str, module: &str, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(session, module, "{message}"),
        LogLevel::Debug => tracing::debug!(session, module, "{message}"),
        LogLevel::Info => tracing::info!(session, module, "{message}"),
        LogLevel::Warn => tracing::warn!(session, module, "{message}"),
        LogLevel::Error => tracing::error!(session, module, "{message}"),
    }
}

/// Errors surfaced while serializing JSON-line logs.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),
}
