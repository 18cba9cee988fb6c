use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::{HubSettings, Settings};
use super::{load_config, load_config_from};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.identity_param, "player_id");
    assert_eq!(settings.hub.max_connections, 1000);
    assert_eq!(settings.hub.liveness_timeout_multiple, 2);
    assert_eq!(settings.hub.outbound_queue_capacity, 256);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn derived_durations_follow_heartbeat() {
    let hub = HubSettings {
        heartbeat_interval_ms: 250,
        liveness_timeout_multiple: 3,
        ..HubSettings::default()
    };
    assert_eq!(hub.heartbeat_interval(), Duration::from_millis(250));
    assert_eq!(hub.liveness_timeout(), Duration::from_millis(750));
    assert_eq!(hub.liveness_scan_interval(), Duration::from_millis(250));

    let hub = HubSettings {
        liveness_scan_interval_ms: Some(40),
        ..hub
    };
    assert_eq!(hub.liveness_scan_interval(), Duration::from_millis(40));
}

#[test]
fn validate_rejects_unusable_values() {
    let zero_heartbeat = HubSettings {
        heartbeat_interval_ms: 0,
        ..HubSettings::default()
    };
    assert!(zero_heartbeat.validate().is_err());

    let zero_queue = HubSettings {
        outbound_queue_capacity: 0,
        ..HubSettings::default()
    };
    assert!(zero_queue.validate().is_err());

    let zero_multiple = HubSettings {
        liveness_timeout_multiple: 0,
        ..HubSettings::default()
    };
    assert!(zero_multiple.validate().is_err());

    assert!(HubSettings::default().validate().is_ok());
}

#[test]
#[serial]
fn load_config_without_sources_uses_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let missing = tmp.path().join("absent");

    let cfg = load_config_from(missing.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg, Settings::default());
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("hub.toml");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [hub]
        heartbeat_interval_ms = 1000
        outbound_queue_capacity = 8
        max_connections = 10

        [logging]
        json = true
    "#;
    fs::write(&path, toml).expect("write config file");

    let cfg = load_config_from(path.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.identity_param, "player_id");
    assert_eq!(cfg.hub.heartbeat_interval_ms, 1000);
    assert_eq!(cfg.hub.outbound_queue_capacity, 8);
    assert_eq!(cfg.hub.max_connections, 10);
    assert_eq!(cfg.hub.resource_alert_ceiling, 10_000);
    assert!(cfg.logging.json);
}

#[test]
#[serial]
fn environment_overrides_nested_keys() {
    temp_env::with_vars(
        [
            ("CONNHUB_HUB__MAX_CONNECTIONS", Some("42")),
            ("CONNHUB_HUB__LIVENESS_TIMEOUT_MULTIPLE", Some("3")),
            ("CONNHUB_SERVER__PORT", Some("7001")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.hub.max_connections, 42);
            assert_eq!(cfg.hub.liveness_timeout_multiple, 3);
            assert_eq!(cfg.server.port, 7001);
        },
    );
}

#[test]
#[serial]
fn invalid_environment_value_is_rejected() {
    temp_env::with_var("CONNHUB_HUB__OUTBOUND_QUEUE_CAPACITY", Some("0"), || {
        assert!(load_config().is_err());
    });
}
