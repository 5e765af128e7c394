use ordered_collector::{CollectorConfig, ConfigError, ConfigService, DrainControl};
use serde_json::{json, Value};
use std::time::Duration;

#[test]
fn defaults_match_documented_values() {
    let config = CollectorConfig::default();
    assert_eq!(config.cache_size, 1_000);
    assert_eq!(config.client_queue_size, None);
    assert_eq!(config.object_id_offset, 1);
    assert_eq!(config.n_sequential_updates, 1);
    assert_eq!(config.fill_timeout(), Duration::from_secs(5));
    assert_eq!(config.queue_poll_timeout(), Duration::from_millis(100));
    assert!(!config.queue_mode());
}

#[test]
fn floors_scale_with_producers() {
    let config = CollectorConfig::default()
        .with_cache_size(1)
        .with_client_queue_size(5);
    assert_eq!(config.effective_cache_size(4), 40);
    assert_eq!(config.effective_queue_size(4), Some(400));
    let roomy = config.with_client_queue_size(10_000);
    assert_eq!(roomy.effective_queue_size(4), Some(10_000));
}

#[test]
fn serializes_with_control_surface_keys() {
    let config = CollectorConfig::default().with_client_queue_size(64);
    let encoded = serde_json::to_value(&config).unwrap();
    assert_eq!(encoded["collectorCacheSize"], 1_000);
    assert_eq!(encoded["clientQueueSize"], 64);
    assert_eq!(encoded["objectIdOffset"], 1);
    assert_eq!(encoded["nSequentialUpdates"], 1);

    let decoded: CollectorConfig =
        serde_json::from_value(json!({ "collectorCacheSize": 50 })).unwrap();
    assert_eq!(decoded.cache_size, 50);
    assert_eq!(decoded.fill_timeout_ms, 5_000);
}

#[test]
fn validate_rejects_zero_values_and_missing_producers() {
    assert_eq!(
        CollectorConfig::default().validate(0),
        Err(ConfigError::NoProducers)
    );
    let err = CollectorConfig::default()
        .with_object_id_offset(0)
        .validate(1)
        .unwrap_err();
    assert!(err.to_string().contains("objectIdOffset"));
    assert!(CollectorConfig::default()
        .with_sequential_updates(0)
        .validate(1)
        .is_err());
    assert!(CollectorConfig::default().with_cache_size(0).validate(1).is_err());
}

#[test]
fn patch_bumps_version_and_reports_changes() {
    let mut service = ConfigService::new(CollectorConfig::default(), 2).unwrap();
    let result = service
        .patch(&json!({
            "collectorCacheSize": "250",
            "nSequentialUpdates": 3,
            "operator": "alice"
        }))
        .unwrap();
    assert_eq!(result.version, 2);
    assert_eq!(
        result.changed_keys,
        vec!["collectorCacheSize".to_string(), "nSequentialUpdates".to_string()]
    );
    assert_eq!(result.passthrough["operator"], "alice");
    assert_eq!(service.current().cache_size, 250);

    let noop = service.patch(&json!({ "collectorCacheSize": 250 })).unwrap();
    assert!(noop.is_noop());
    assert_eq!(noop.version, 2);
}

#[test]
fn rejected_patches_leave_config_untouched() {
    let mut service = ConfigService::new(CollectorConfig::default(), 1).unwrap();
    let err = service
        .patch(&Value::String("invalid".to_string()))
        .unwrap_err();
    match err {
        ConfigError::InvalidPatch(_) => {}
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(matches!(
        service.patch(&json!({ "objectIdOffset": -3 })),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
        service.patch(&json!({ "collectorCacheSize": 10, "objectIdOffset": 0 })),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
        service.patch(&json!({ "clientQueueSize": 8 })),
        Err(ConfigError::RestartRequired(_))
    ));
    assert_eq!(service.validation_failures_total(), 4);
    assert_eq!(service.version(), 1);
    assert_eq!(service.current(), &CollectorConfig::default());
}

#[test]
fn queue_mode_sessions_may_resize_but_not_disable() {
    let initial = CollectorConfig::default().with_client_queue_size(16);
    let mut service = ConfigService::new(initial, 1).unwrap();
    let result = service.patch(&json!({ "clientQueueSize": 32 })).unwrap();
    assert_eq!(result.changed_keys, vec!["clientQueueSize".to_string()]);
    assert!(matches!(
        service.patch(&json!({ "clientQueueSize": null })),
        Err(ConfigError::RestartRequired(_))
    ));
}

#[test]
fn zero_fill_timeout_is_rejected() {
    let err = CollectorConfig::default()
        .with_fill_timeout(Duration::ZERO)
        .validate(1)
        .unwrap_err();
    assert!(err.to_string().contains("fillTimeoutMs"));

    let mut service = ConfigService::new(CollectorConfig::default(), 1).unwrap();
    assert!(matches!(
        service.patch(&json!({ "fillTimeoutMs": 0 })),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert_eq!(service.current().fill_timeout(), Duration::from_secs(5));
    assert_eq!(service.version(), 1);
}

#[test]
fn drain_control_never_waits_zero() {
    let control = DrainControl::new(Duration::ZERO, Duration::ZERO);
    assert_eq!(control.fill_timeout(), Duration::from_millis(1));
    assert_eq!(control.poll_timeout(), Duration::from_millis(1));
    control.set_fill_timeout(Duration::ZERO);
    assert_eq!(control.fill_timeout(), Duration::from_millis(1));
    control.set_fill_timeout(Duration::from_millis(250));
    assert_eq!(control.fill_timeout(), Duration::from_millis(250));
}
