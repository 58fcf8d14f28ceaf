//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use menu_pipeline::config::{ConfigError, PipelineConfig, QueueBackend, StoreBackend};
use menu_pipeline::worker::WorkerOptions;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[queue]
broker_url = "mqtt://broker.internal:1883"
client_id = "menu-worker-2"
share_group = "menu-workers"

[store]
path = "/tmp/menu-pipeline.db"

[worker]
max_retries = 5
backoff_unit_ms = 250
status_event_max_requeues = 20

[api]
host = "127.0.0.1"
port = 9090
"#
    )
    .unwrap();

    let config = PipelineConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.queue.backend, QueueBackend::Mqtt);
    assert_eq!(config.queue.broker_url, "mqtt://broker.internal:1883");
    assert_eq!(config.queue.client_id, "menu-worker-2");
    assert_eq!(config.queue.share_group, "menu-workers");
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(config.worker.max_retries, 5);
    assert_eq!(config.api.socket_addr().unwrap().port(), 9090);

    let options = WorkerOptions::from(&config.worker);
    assert_eq!(options.retry.max_retries, 5);
    assert_eq!(options.retry.backoff_unit, Duration::from_millis(250));
    assert_eq!(options.retry.status_event_max_requeues, Some(20));
}

#[test]
fn test_partial_file_keeps_defaults_for_missing_sections() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[store]
backend = "memory"
"#
    )
    .unwrap();

    let config = PipelineConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.queue, PipelineConfig::default().queue);
    assert_eq!(config.worker, PipelineConfig::default().worker);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = PipelineConfig::load_from_file(std::path::Path::new(
        "/nonexistent/menu-pipeline.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[worker\nmax_retries = ").unwrap();

    let result = PipelineConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_fail_validation_on_load() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[queue]
menu_parsing_channel = "work"
product_status_channel = "work"
"#
    )
    .unwrap();

    let result = PipelineConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_shown_configuration_loads_back_unchanged() {
    let mut config = PipelineConfig::default();
    config.worker.status_event_max_requeues = Some(7);
    config.queue.username_env = Some("MQTT_USERNAME".to_string());

    let rendered = toml::to_string_pretty(&config).unwrap();
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{rendered}").unwrap();

    let reloaded = PipelineConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(reloaded, config);
}
