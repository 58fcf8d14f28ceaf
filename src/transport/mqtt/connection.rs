//! Pure connection state management for the MQTT queue
//!
//! Connection options, reconnection backoff and the mapping between queue
//! channels and broker topics. Nothing here touches the network.

use crate::config::QueueSection;
use crate::protocol::{channel_topic, subscription_filter};
use crate::transport::QueueChannel;
use rumqttc::v5::mqttbytes::v5::ConnectProperties;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Broker-side session lifetime; unacknowledged deliveries survive a
/// reconnect within this window
const SESSION_EXPIRY_SECS: u32 = 3600;

/// What a broker connection is used for
///
/// Receive-maximum is a per-connection limit, so each consumed channel gets
/// its own connection. Consumers keep a stable id and a persistent session;
/// publishers take a fresh id on every start so they never take over a
/// consumer's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Consumer(QueueChannel),
    Publisher,
}

impl ConnectionRole {
    pub fn client_id(&self, config: &QueueSection) -> String {
        match self {
            ConnectionRole::Consumer(channel) => format!("{}-{}", config.client_id, channel),
            ConnectionRole::Publisher => {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("{}-pub-{}", config.client_id, &suffix[..12])
            }
        }
    }

    pub fn persistent_session(&self) -> bool {
        matches!(self, ConnectionRole::Consumer(_))
    }
}

/// Connection state for the MQTT queue
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// ConnAck received, ready to publish and consume
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![100, 250, 500, 1000, 2500],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given (1-based) reconnection attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Acknowledgement failed")]
    AckFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build client options for one connection of the queue
///
/// Consumer connections resume a persistent session so that a worker
/// restarting under the same id gets its unacknowledged deliveries back.
/// Acks are manual and the broker may only have one unacknowledged message
/// outstanding per consumer connection.
pub fn configure_mqtt_options(
    config: &QueueSection,
    role: ConnectionRole,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(role.client_id(config), host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    // Properties first; the per-field setters below amend them
    let persistent = role.persistent_session();
    mqtt_options.set_connect_properties(ConnectProperties {
        session_expiry_interval: persistent.then_some(SESSION_EXPIRY_SECS),
        ..ConnectProperties::new()
    });
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_max_packet_size(Some(256 * 1024));
    mqtt_options.set_manual_acks(true);
    mqtt_options.set_clean_start(!persistent);
    if persistent {
        mqtt_options.set_receive_maximum(Some(1));
    }

    Ok(mqtt_options)
}

/// Broker topics for the work channels and the dead-letter channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopics {
    pub menu_parsing: String,
    pub product_status: String,
    pub dead_letter: String,
    share_group: String,
}

impl QueueTopics {
    pub fn from_config(config: &QueueSection) -> Self {
        Self {
            menu_parsing: channel_topic(&config.topic_prefix, &config.menu_parsing_channel),
            product_status: channel_topic(&config.topic_prefix, &config.product_status_channel),
            dead_letter: channel_topic(&config.topic_prefix, &config.dead_letter_channel),
            share_group: config.share_group.clone(),
        }
    }

    pub fn for_channel(&self, channel: QueueChannel) -> &str {
        match channel {
            QueueChannel::MenuParsing => &self.menu_parsing,
            QueueChannel::ProductStatus => &self.product_status,
        }
    }

    /// Reverse lookup for incoming publishes
    pub fn channel_for_topic(&self, topic: &str) -> Option<QueueChannel> {
        QueueChannel::ALL
            .into_iter()
            .find(|channel| self.for_channel(*channel) == topic)
    }

    pub fn subscription(&self, channel: QueueChannel) -> String {
        subscription_filter(self.for_channel(channel), Some(&self.share_group))
    }
}
