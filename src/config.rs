//! Configuration for the menu pipeline
//!
//! Loaded from TOML. Every section has defaults so a missing file or a
//! partial one still yields a runnable setup. Credentials are never stored
//! in the file; fields ending in `_env` name the environment variable that
//! holds the secret and are resolved when a component is built.

use crate::sheets::GoogleSheetsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Paths tried when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/menu-pipeline.toml", "menu-pipeline.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub sheets: SheetsSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub api: ApiSection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Mqtt,
    /// In-process queue; only useful when API and worker share a process
    Memory,
}

/// Queue transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,
    /// MQTT broker URL with protocol and port
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Base client id. Worker connections append the channel name and keep a
    /// persistent session under it; publishers append a random suffix.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Shared subscription group; empty disables sharing
    #[serde(default = "default_share_group")]
    pub share_group: String,
    #[serde(default = "default_menu_parsing_channel")]
    pub menu_parsing_channel: String,
    #[serde(default = "default_product_status_channel")]
    pub product_status_channel: String,
    #[serde(default = "default_dead_letter_channel")]
    pub dead_letter_channel: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            broker_url: default_broker_url(),
            client_id: default_client_id(),
            username_env: None,
            password_env: None,
            share_group: default_share_group(),
            menu_parsing_channel: default_menu_parsing_channel(),
            product_status_channel: default_product_status_channel(),
            dead_letter_channel: default_dead_letter_channel(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Mqtt
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "menu-pipeline".to_string()
}

fn default_share_group() -> String {
    "menu-workers".to_string()
}

fn default_menu_parsing_channel() -> String {
    "menu-parsing".to_string()
}

fn default_product_status_channel() -> String {
    "product-status".to_string()
}

fn default_dead_letter_channel() -> String {
    "dlq".to_string()
}

fn default_topic_prefix() -> String {
    "menu-pipeline".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    /// SQLite database file, created with its parent directory if missing
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/menu-pipeline.db")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetsSection {
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
    /// Environment variable containing the API key
    #[serde(default = "default_sheets_api_key_env")]
    pub api_key_env: Option<String>,
    /// Environment variable containing an OAuth bearer token
    pub access_token_env: Option<String>,
    #[serde(default = "default_sheets_timeout")]
    pub timeout_secs: u64,
}

impl Default for SheetsSection {
    fn default() -> Self {
        Self {
            base_url: default_sheets_base_url(),
            api_key_env: default_sheets_api_key_env(),
            access_token_env: None,
            timeout_secs: default_sheets_timeout(),
        }
    }
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_sheets_api_key_env() -> Option<String> {
    Some("GOOGLE_SHEETS_API_KEY".to_string())
}

fn default_sheets_timeout() -> u64 {
    30
}

impl SheetsSection {
    /// Client settings with credentials read from the environment
    pub fn client_config(&self) -> GoogleSheetsConfig {
        GoogleSheetsConfig {
            base_url: self.base_url.clone(),
            api_key: PipelineConfig::get_env_var_optional(self.api_key_env.as_ref()),
            access_token: PipelineConfig::get_env_var_optional(self.access_token_env.as_ref()),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSection {
    /// Failed attempts before a parsing task is failed for good
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// One backoff unit; the n-th retry waits 2^n units
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// How long in-flight handling may run after shutdown is requested
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_event_timeout")]
    pub event_timeout_secs: u64,
    /// Unset means status events are requeued until they apply
    pub status_event_max_requeues: Option<u32>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
            shutdown_grace_secs: default_shutdown_grace(),
            task_timeout_secs: default_task_timeout(),
            event_timeout_secs: default_event_timeout(),
            status_event_max_requeues: None,
        }
    }
}

impl WorkerSection {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_task_timeout() -> u64 {
    30
}

fn default_event_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSection {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl ApiSection {
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| {
                ConfigError::InvalidConfig(format!(
                    "api address '{}:{}' is not a valid socket address",
                    self.host, self.port
                ))
            })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among [`DEFAULT_CONFIG_PATHS`]
    pub fn find_default_path() -> Option<PathBuf> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let channels = [
            ("menu_parsing_channel", &self.queue.menu_parsing_channel),
            ("product_status_channel", &self.queue.product_status_channel),
            ("dead_letter_channel", &self.queue.dead_letter_channel),
        ];
        for (field, value) in channels {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "queue.{field} must not be empty"
                )));
            }
        }

        if self.queue.menu_parsing_channel == self.queue.product_status_channel {
            return Err(ConfigError::InvalidConfig(
                "menu parsing and product status must use different channels".to_string(),
            ));
        }
        if self.queue.dead_letter_channel == self.queue.menu_parsing_channel
            || self.queue.dead_letter_channel == self.queue.product_status_channel
        {
            return Err(ConfigError::InvalidConfig(
                "dead letter channel must differ from the work channels".to_string(),
            ));
        }

        if self.worker.max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker.max_retries must be at least 1".to_string(),
            ));
        }
        if self.api.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "api.port must not be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Helper method to get environment variable with error propagation
    pub fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.queue.username_env.as_ref())
    }

    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.queue.password_env.as_ref())
    }

    /// In-memory everything, for tests that wire real components together
    pub fn test_config() -> Self {
        let mut config = Self::default();
        config.queue.backend = QueueBackend::Memory;
        config.store.backend = StoreBackend::Memory;
        config.worker.backoff_unit_ms = 1;
        config.worker.shutdown_grace_secs = 1;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[queue]
backend = "mqtt"
broker_url = "mqtts://broker.example.com:8883"
client_id = "menu-worker-1"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
share_group = ""

[store]
backend = "sqlite"
path = "/var/lib/menu/pipeline.db"

[sheets]
api_key_env = "SHEETS_KEY"
access_token_env = "SHEETS_TOKEN"
timeout_secs = 15

[worker]
max_retries = 5
backoff_unit_ms = 250
status_event_max_requeues = 20

[api]
host = "127.0.0.1"
port = 9090
"#;

        let config = PipelineConfig::from_toml(toml_content).unwrap();
        assert_eq!(config.queue.client_id, "menu-worker-1");
        assert_eq!(config.queue.share_group, "");
        assert_eq!(config.queue.menu_parsing_channel, "menu-parsing");
        assert_eq!(config.store.path, PathBuf::from("/var/lib/menu/pipeline.db"));
        assert_eq!(config.sheets.api_key_env.as_deref(), Some("SHEETS_KEY"));
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.worker.status_event_max_requeues, Some(20));
        assert_eq!(config.worker.task_timeout_secs, 30);
        assert_eq!(config.api.port, 9090);
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            PipelineConfig::from_toml(include_str!("../config/menu-pipeline.example.toml")).unwrap();
        assert_eq!(config.queue.client_id, "menu-pipeline");
        assert_eq!(config.worker.status_event_max_requeues, None);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.queue.backend, QueueBackend::Mqtt);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.worker.backoff_unit_ms, 1000);
        assert_eq!(config.worker.status_event_max_requeues, None);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_dead_letter_channel_must_differ() {
        let result = PipelineConfig::from_toml(
            r#"
[queue]
dead_letter_channel = "menu-parsing"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_channel_rejected() {
        let result = PipelineConfig::from_toml(
            r#"
[queue]
product_status_channel = "  "
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let result = PipelineConfig::from_toml("[worker]\nmax_retries = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_port_rejected() {
        let result = PipelineConfig::from_toml("[api]\nport = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let result = PipelineConfig::from_toml("[store]\nbackend = \"postgres\"\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_socket_addr() {
        let api = ApiSection::default();
        assert_eq!(api.socket_addr().unwrap().port(), 8080);

        let bad = ApiSection {
            host: "not a host".to_string(),
            port: 80,
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_sheets_client_config_reads_env() {
        std::env::set_var("MENU_PIPELINE_TEST_SHEETS_KEY", "k-123");
        let section = SheetsSection {
            api_key_env: Some("MENU_PIPELINE_TEST_SHEETS_KEY".to_string()),
            access_token_env: Some("MENU_PIPELINE_TEST_UNSET_TOKEN".to_string()),
            ..Default::default()
        };
        let client_config = section.client_config();
        assert_eq!(client_config.api_key.as_deref(), Some("k-123"));
        assert_eq!(client_config.access_token, None);
        assert_eq!(client_config.timeout, Duration::from_secs(30));
        std::env::remove_var("MENU_PIPELINE_TEST_SHEETS_KEY");
    }

    #[test]
    fn test_required_env_var_missing() {
        let result = PipelineConfig::get_env_var_required("MENU_PIPELINE_TEST_MISSING_VAR");
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_test_config_is_valid_and_in_memory() {
        let config = PipelineConfig::test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }
}
