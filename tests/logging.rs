use ordered_collector::{
    JsonLineLogger, LogLevel, LogRecord, LogRotationPolicy, MonotonicClock, SessionLogger,
    SharedClock,
};
use serde_json::Value;
use std::sync::Arc;

struct FixedClock(u128);

impl MonotonicClock for FixedClock {
    fn now_ns(&self) -> u128 {
        self.0
    }
}

fn record<'a>(level: LogLevel, seq: u64, message: &'a str) -> LogRecord<'a> {
    LogRecord {
        ts_ms: 100,
        level,
        module: "collector",
        session: "s0",
        seq,
        message,
    }
}

#[test]
fn json_logger_serializes_entries() {
    let policy = LogRotationPolicy {
        max_bytes: 256,
        max_files: 2,
    };
    let mut logger = JsonLineLogger::new(policy);
    assert!(logger.log(&record(LogLevel::Info, 1, "first entry")).unwrap());
    let lines = logger.lines();
    assert_eq!(lines.len(), 1);
    let parsed: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(parsed["level"], "INFO");
    assert_eq!(parsed["module"], "collector");
    assert_eq!(parsed["session"], "s0");
    assert_eq!(parsed["ts_ms"], 100);
}

#[test]
fn level_override_filters_entries() {
    let mut logger = JsonLineLogger::new(LogRotationPolicy::default());
    logger.set_level(LogLevel::Warn);
    assert!(!logger.log(&record(LogLevel::Info, 1, "info suppressed")).unwrap());
    assert!(logger.log(&record(LogLevel::Warn, 2, "warn visible")).unwrap());
    let lines = logger.lines();
    assert_eq!(lines.len(), 1);
    let parsed: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(parsed["level"], "WARN");
    assert_eq!(parsed["message"], "warn visible");
}

#[test]
fn rotation_discards_old_segments() {
    let policy = LogRotationPolicy {
        max_bytes: 64,
        max_files: 2,
    };
    let mut logger = JsonLineLogger::new(policy);
    for seq in 0..10 {
        logger.log(&record(LogLevel::Info, seq, "payload")).unwrap();
    }
    let segments: Vec<_> = logger.files().collect();
    assert!(segments.len() <= 3, "active + rotated segments retained");
    assert!(segments.iter().any(|file| !file.lines().is_empty()));
    assert!(logger.lines().len() < 10);
}

#[test]
fn level_names_parse_case_insensitively() {
    assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
    assert_eq!(LogLevel::parse(" Warning "), Some(LogLevel::Warn));
    assert_eq!(LogLevel::parse("verbose"), None);
    assert_eq!(LogLevel::Error.to_string(), "ERROR");
}

#[test]
fn session_logger_stamps_session_and_sequence() {
    let clock: SharedClock = Arc::new(FixedClock(7_000_000));
    let logger = SessionLogger::new("collector-7", clock);
    let clone = logger.clone();
    logger.info("session", "started");
    clone.debug("collector", "hidden at default level");
    clone.warn("processor", "object 3 failed");

    let lines = logger.lines();
    assert_eq!(lines.len(), 2);
    let first: Value = serde_json::from_str(&lines[0]).unwrap();
    let second: Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(first["session"], "collector-7");
    assert_eq!(first["ts_ms"], 7);
    assert_eq!(second["level"], "WARN");
    assert!(second["seq"].as_u64() > first["seq"].as_u64());

    logger.set_level(LogLevel::Debug);
    assert!(clone.enabled(LogLevel::Debug));
    clone.debug("collector", "now visible");
    assert_eq!(logger.lines().len(), 3);
}
