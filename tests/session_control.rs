use ordered_collector::{
    CollectorConfig, ConfigError, ControlCommand, ControlReply, Event, EventProcessor,
    EventSource, ProcessingError, ProcessorRegistry, ProducerId, ProducerSink, SessionBuilder,
    SessionError, SourceError,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct ProbeState {
    ids: Vec<u64>,
    patches: Vec<Map<String, Value>>,
    started: bool,
    stopped: bool,
}

struct ProbeProcessor {
    state: Arc<Mutex<ProbeState>>,
    resets: u64,
}

impl EventProcessor<String> for ProbeProcessor {
    fn process(&mut self, event: &Event<String>) -> Result<(), ProcessingError> {
        self.state.lock().unwrap().ids.push(event.id);
        Ok(())
    }

    fn configure(&mut self, patch: &Map<String, Value>) -> Result<(), ProcessingError> {
        if patch.contains_key("explode") {
            return Err(ProcessingError::Configuration("explode".into()));
        }
        self.state.lock().unwrap().patches.push(patch.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), ProcessingError> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().stopped = true;
    }

    fn reset_stats(&mut self) {
        self.resets += 1;
    }

    fn stats(&self) -> Value {
        json!({ "resets": self.resets })
    }
}

fn probe() -> (ProbeProcessor, Arc<Mutex<ProbeState>>) {
    let state = Arc::new(Mutex::new(ProbeState::default()));
    (
        ProbeProcessor {
            state: state.clone(),
            resets: 0,
        },
        state,
    )
}

fn config() -> CollectorConfig {
    CollectorConfig::default().with_fill_timeout(Duration::from_millis(100))
}

/// Delivers a fixed id range from its own thread once subscribed.
struct RangeSource {
    id: ProducerId,
    ids: Vec<u64>,
    worker: Option<thread::JoinHandle<()>>,
    unsubscribed: Arc<AtomicBool>,
}

impl RangeSource {
    fn new(id: &str, ids: Vec<u64>) -> (Self, Arc<AtomicBool>) {
        let unsubscribed = Arc::new(AtomicBool::new(false));
        (
            Self {
                id: ProducerId::new(id),
                ids,
                worker: None,
                unsubscribed: unsubscribed.clone(),
            },
            unsubscribed,
        )
    }
}

impl EventSource<String> for RangeSource {
    fn producer_id(&self) -> ProducerId {
        self.id.clone()
    }

    fn subscribe(&mut self, sink: ProducerSink<String>) -> Result<(), SourceError> {
        let ids = std::mem::take(&mut self.ids);
        self.worker = Some(thread::spawn(move || {
            for id in ids {
                sink.send(id, format!("event-{id}"));
            }
        }));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.unsubscribed.store(true, Ordering::SeqCst);
    }
}

struct BrokenSource;

impl EventSource<String> for BrokenSource {
    fn producer_id(&self) -> ProducerId {
        ProducerId::new("broken")
    }

    fn subscribe(&mut self, _sink: ProducerSink<String>) -> Result<(), SourceError> {
        Err(SourceError::subscribe(&self.producer_id(), "connection refused"))
    }
}

#[test]
fn configure_applies_floor_and_forwards_unknown_keys() {
    let (processor, state) = probe();
    let session = SessionBuilder::new("cfg")
        .config(config())
        .producer("a")
        .producer("b")
        .producer("c")
        .producer("d")
        .processor(processor)
        .start()
        .unwrap();
    assert!(state.lock().unwrap().started);

    let result = session
        .configure(&json!({ "collectorCacheSize": 1, "threshold": 7 }))
        .unwrap();
    assert_eq!(result.version, 2);
    assert_eq!(result.changed_keys, vec!["collectorCacheSize".to_string()]);
    assert_eq!(session.get_stats().cache_size, 40);
    assert_eq!(session.config().cache_size, 1);
    let patches = state.lock().unwrap().patches.clone();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0]["threshold"], 7);

    session.stop().unwrap();
    assert!(state.lock().unwrap().stopped);
}

#[test]
fn configure_rejects_invalid_values_without_side_effects() {
    let session = SessionBuilder::<String>::new("cfg-invalid")
        .config(config())
        .producer("a")
        .start()
        .unwrap();
    let err = session
        .configure(&json!({ "collectorCacheSize": 0 }))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Config(ConfigError::InvalidValue { .. })
    ));
    let err = session
        .configure(&json!({ "clientQueueSize": 64 }))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Config(ConfigError::RestartRequired(_))
    ));
    assert_eq!(session.config_version(), 1);
    assert_eq!(session.get_stats().cache_size, 1_000);
}

#[test]
fn processor_configuration_errors_surface() {
    let (processor, _state) = probe();
    let session = SessionBuilder::new("cfg-processor")
        .config(config())
        .producer("a")
        .processor(processor)
        .start()
        .unwrap();
    let err = session.configure(&json!({ "explode": true })).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Processor(ProcessingError::Configuration(_))
    ));
}

#[test]
fn object_id_offset_enables_group_gap_detection() {
    let (processor, state) = probe();
    let session = SessionBuilder::new("grouped")
        .config(config())
        .producer("a")
        .processor(processor)
        .start()
        .unwrap();
    session
        .configure(&json!({ "objectIdOffset": 4 }))
        .unwrap();
    let sink = session.sink("a").unwrap();
    for id in [1, 5, 13] {
        sink.send(id, String::new());
    }
    assert!(session.wait_drained(Duration::from_secs(5)));
    let stats = session.stop().unwrap();
    assert_eq!(state.lock().unwrap().ids, vec![1, 5, 13]);
    assert_eq!(stats.n_group_missed, 1);
    // Raw distance past one stride: 13 - 5 - 4.
    assert_eq!(stats.n_missed, 4);
}

#[test]
fn control_commands_round_trip() {
    let (processor, _state) = probe();
    let session = SessionBuilder::new("control")
        .config(config())
        .producer("a")
        .processor(processor)
        .start()
        .unwrap();
    let sink = session.sink("a").unwrap();
    sink.send(1, "one".to_string());
    assert!(session.wait_drained(Duration::from_secs(5)));

    let command: ControlCommand = serde_json::from_value(json!({
        "command": "configure",
        "args": { "fillTimeoutMs": 50 }
    }))
    .unwrap();
    let reply = session.handle(command);
    assert!(reply.success, "{}", reply.status);
    assert_eq!(reply.payload["changed_keys"][0], "fillTimeoutMs");

    let stats = session.handle(ControlCommand::GetStats);
    assert!(stats.success);
    assert_eq!(stats.payload["nCollected"], 1);

    let reset = session.handle(ControlCommand::ResetStats);
    assert!(reset.success);
    let stats = session.handle(ControlCommand::GetStats);
    assert_eq!(stats.payload["nCollected"], 0);
    assert_eq!(stats.payload["lastDeliveredId"], 1);
    assert_eq!(stats.payload["processor"]["resets"], 1);

    let failed = session.handle(ControlCommand::Configure(json!("nope")));
    assert!(!failed.success);
    assert!(failed.status.contains("invalid config patch"));

    let stopped = session.handle(ControlCommand::Stop);
    assert!(stopped.success);
    assert_eq!(stopped.status, "stopped");

    let encoded = serde_json::to_value(ControlReply::failed("boom")).unwrap();
    assert_eq!(encoded, json!({ "success": false, "status": "boom" }));
}

#[test]
fn sources_are_subscribed_and_unsubscribed() {
    let (first, first_done) = RangeSource::new("odd", (1..=99).step_by(2).collect());
    let (second, second_done) = RangeSource::new("even", (2..=100).step_by(2).collect());
    let (processor, state) = probe();
    let session = SessionBuilder::new("sources")
        .config(config().with_fill_timeout(Duration::from_secs(60)))
        .source(Box::new(first))
        .source(Box::new(second))
        .processor(processor)
        .start()
        .unwrap();
    assert_eq!(session.producer_ids().len(), 2);

    let stats = session.stop().unwrap();
    assert!(first_done.load(Ordering::SeqCst));
    assert!(second_done.load(Ordering::SeqCst));
    assert_eq!(state.lock().unwrap().ids, (1..=100).collect::<Vec<_>>());
    assert_eq!(stats.n_processed, 100);
}

#[test]
fn failing_source_aborts_start() {
    let err = SessionBuilder::<String>::new("broken")
        .config(config())
        .source(Box::new(BrokenSource))
        .start()
        .unwrap_err();
    assert!(matches!(err, SessionError::Source(SourceError::Subscribe { .. })));
}

#[test]
fn empty_producer_list_is_rejected() {
    let err = SessionBuilder::<String>::new("empty").start().unwrap_err();
    assert!(matches!(err, SessionError::Config(ConfigError::NoProducers)));
}

#[test]
fn registry_resolves_processors_by_name() {
    let mut registry = ProcessorRegistry::<String>::with_defaults();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    registry.register("record", move || {
        let record = record.clone();
        Box::new(move |event: &Event<String>| -> Result<(), ProcessingError> {
            record.lock().unwrap().push(event.payload.clone());
            Ok(())
        }) as Box<dyn EventProcessor<String>>
    });
    assert_eq!(registry.names(), vec!["noop", "record"]);

    let session = SessionBuilder::new("registry")
        .config(config())
        .producer("a")
        .processor_from_registry(&registry, "record")
        .start()
        .unwrap();
    session.sink("a").unwrap().send(1, "hello".to_string());
    session.stop().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);

    let err = SessionBuilder::new("registry-missing")
        .producer("a")
        .processor_from_registry(&registry, "missing")
        .start()
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Config(ConfigError::UnknownProcessor(name)) if name == "missing"
    ));

    let noop = SessionBuilder::new("registry-noop")
        .config(config())
        .producer("a")
        .processor_from_registry(&registry, "noop")
        .start()
        .unwrap();
    noop.sink("a").unwrap().send(1, String::new());
    let stats = noop.stop().unwrap();
    assert_eq!(stats.processor["seen"], 1);
}
