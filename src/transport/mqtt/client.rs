//! Impure I/O for the MQTT queue
//!
//! Owns the rumqttc event loops, turns incoming publishes into [`Delivery`]
//! values and maps ack/reject onto the broker. MQTT has no negative
//! acknowledgement, so a reject republishes the payload (to its own channel
//! or to the dead-letter topic) and then acknowledges the original.
//!
//! A queue holds one publishing connection plus one connection per consumed
//! channel, so a slow message on one channel never holds back the other.

use super::connection::{
    configure_mqtt_options, ConnectionRole, ConnectionState, MqttError, QueueTopics,
    ReconnectConfig,
};
use super::message_handler::{EventRoute, MessageHandler, PublishDecision};
use crate::config::QueueSection;
use crate::observability::metrics;
use crate::transport::{
    Delivery, DeliveryHandle, DeliveryStream, QueueChannel, QueueTransport, TransportError,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Publish;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Consumers = Arc<Mutex<HashMap<QueueChannel, mpsc::UnboundedSender<Delivery>>>>;
type PendingAcks = Arc<Mutex<HashMap<u64, Publish>>>;

/// State shared between a connection handle and its event loop task
#[derive(Clone)]
struct Shared {
    client: AsyncClient,
    topics: QueueTopics,
    consumers: Consumers,
    pending: PendingAcks,
    subscriptions: Arc<Mutex<Vec<String>>>,
    next_tag: Arc<AtomicU64>,
}

/// One broker connection with its own client id and event loop
struct MqttConnection {
    role: ConnectionRole,
    shared: Shared,
    event_loop: Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl MqttConnection {
    fn new(
        config: &QueueSection,
        role: ConnectionRole,
        next_tag: Arc<AtomicU64>,
    ) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(config, role)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            role,
            shared: Shared {
                client,
                topics: QueueTopics::from_config(config),
                consumers: Arc::new(Mutex::new(HashMap::new())),
                pending: Arc::new(Mutex::new(HashMap::new())),
                subscriptions: Arc::new(Mutex::new(Vec::new())),
                next_tag,
            },
            event_loop: Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            state_tx,
            state_rx,
            shutdown_tx,
        })
    }

    fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    async fn connect(&self, reconnect_config: ReconnectConfig) -> Result<(), MqttError> {
        let event_loop = self.event_loop.lock().await.take().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Event loop already started".to_string())
        })?;

        let shared = self.shared.clone();
        let state_tx = self.state_tx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            run_event_loop(event_loop, shared, state_tx, shutdown_rx, reconnect_config).await;
        });
        *self.event_loop_handle.lock().await = Some(handle);

        wait_for_connection_confirmation(self.state_rx.clone(), CONNECT_TIMEOUT).await?;
        debug!(target: "mqtt_transport", "Connection {:?} established", self.role);
        Ok(())
    }

    async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.shared.client.disconnect().await {
            warn!("MQTT disconnect request failed: {}", e);
        }
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected("Client disconnected".to_string()));

        let handle = self.event_loop_handle.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!(target: "mqtt_transport", "Event loop {:?} shut down", self.role),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop ended with error: {}", e),
                Err(_) => warn!("MQTT event loop didn't shut down in time"),
                _ => {}
            }
        }

        self.shared.consumers.lock().await.clear();
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self.state();
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }

    async fn take_pending(&self, handle: DeliveryHandle) -> Result<Publish, TransportError> {
        self.shared
            .pending
            .lock()
            .await
            .remove(&handle.tag)
            .ok_or(TransportError::UnknownDelivery(handle.tag))
    }

    async fn ack_publish(&self, publish: &Publish) -> Result<(), TransportError> {
        self.shared
            .client
            .ack(publish)
            .await
            .map_err(|e| MqttError::AckFailed(Box::new(e)).into())
    }

    async fn publish_to(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.check_connection_state()?;
        self.shared
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)).into())
    }

    async fn subscribe(&self, channel: QueueChannel) -> Result<DeliveryStream, TransportError> {
        let mut consumers = self.shared.consumers.lock().await;
        if consumers
            .get(&channel)
            .is_some_and(|sender| !sender.is_closed())
        {
            return Err(TransportError::AlreadyConsuming(channel));
        }

        let filter = self.shared.topics.subscription(channel);
        self.shared
            .client
            .subscribe(filter.clone(), QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        let mut subscriptions = self.shared.subscriptions.lock().await;
        if !subscriptions.contains(&filter) {
            subscriptions.push(filter.clone());
        }
        info!("Subscribed to {}", filter);

        let (sender, receiver) = mpsc::unbounded_channel();
        consumers.insert(channel, sender);
        Ok(receiver)
    }
}

async fn wait_for_connection_confirmation(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), MqttError> {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match &*state_rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::PermanentlyDisconnected(reason) => {
                    return Err(MqttError::ConnectionFailedStr(format!(
                        "Permanently disconnected: {reason}"
                    )));
                }
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(MqttError::ConnectionFailedStr(
                    "State channel closed".to_string(),
                ));
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        Err(MqttError::ConnectionFailedStr(
            "ConnAck timeout - no connection confirmation received".to_string(),
        ))
    })
}

pub struct MqttQueue {
    publisher: MqttConnection,
    consumers: HashMap<QueueChannel, MqttConnection>,
    reconnect_config: ReconnectConfig,
}

impl MqttQueue {
    /// Queue that only publishes, for the API and `submit`
    pub fn publisher(config: &QueueSection) -> Result<Self, MqttError> {
        Self::new(config, &[])
    }

    /// Queue that publishes and consumes every work channel
    pub fn consumer(config: &QueueSection) -> Result<Self, MqttError> {
        Self::new(config, &QueueChannel::ALL)
    }

    pub fn new(config: &QueueSection, channels: &[QueueChannel]) -> Result<Self, MqttError> {
        let next_tag = Arc::new(AtomicU64::new(1));
        let publisher = MqttConnection::new(config, ConnectionRole::Publisher, next_tag.clone())?;
        let mut consumers = HashMap::new();
        for channel in channels {
            let connection =
                MqttConnection::new(config, ConnectionRole::Consumer(*channel), next_tag.clone())?;
            consumers.insert(*channel, connection);
        }

        Ok(Self {
            publisher,
            consumers,
            reconnect_config: ReconnectConfig::default(),
        })
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn topics(&self) -> &QueueTopics {
        &self.publisher.shared.topics
    }

    /// Channels this queue holds a consumer connection for
    pub fn consumed_channels(&self) -> Vec<QueueChannel> {
        QueueChannel::ALL
            .into_iter()
            .filter(|channel| self.consumers.contains_key(channel))
            .collect()
    }

    /// State of the least healthy connection
    pub fn connection_state(&self) -> ConnectionState {
        self.connections()
            .map(MqttConnection::state)
            .find(|state| *state != ConnectionState::Connected)
            .unwrap_or(ConnectionState::Connected)
    }

    fn connections(&self) -> impl Iterator<Item = &MqttConnection> {
        std::iter::once(&self.publisher).chain(self.consumers.values())
    }

    /// Start every event loop and wait for each broker ConnAck
    pub async fn connect(&self) -> Result<(), MqttError> {
        for connection in self.connections() {
            connection.connect(self.reconnect_config.clone()).await?;
        }
        metrics().queue_connection_changed(true);
        Ok(())
    }

    /// Stop the event loops and disconnect. Unsettled deliveries stay with
    /// the consumer sessions and are redelivered on the next connect.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        for connection in self.consumers.values() {
            connection.disconnect().await;
        }
        self.publisher.disconnect().await;
        metrics().queue_connection_changed(false);
        info!("MQTT queue disconnected");
        Ok(())
    }

    fn consumer_for(&self, channel: QueueChannel) -> Result<&MqttConnection, TransportError> {
        self.consumers
            .get(&channel)
            .ok_or(TransportError::NotConsuming(channel))
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    shared: Shared,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
) {
    info!("Starting MQTT queue event loop");
    let mut reconnect_attempts = 0u32;

    loop {
        let event = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            event = event_loop.poll() => event,
        };

        let lost_connection = match event {
            Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    reconnect_attempts = 0;
                    let _ = state_tx.send(ConnectionState::Connected);
                    metrics().queue_connection_changed(true);
                    resubscribe(&shared).await;
                    None
                }
                EventRoute::MessageReceived(publish) => {
                    handle_publish(&shared, publish).await;
                    None
                }
                EventRoute::Disconnected => Some("Disconnected by broker".to_string()),
                EventRoute::SubscriptionConfirmed { packet_id } => {
                    debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                    None
                }
                EventRoute::InfrastructureEvent(event) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", event);
                    None
                }
                EventRoute::OutgoingEvent => None,
            },
            Err(e) => {
                error!("MQTT event loop error: {}", e);
                Some(e.to_string())
            }
        };

        let Some(reason) = lost_connection else {
            continue;
        };

        let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
        metrics().queue_connection_changed(false);
        // Deliveries from the old connection can no longer be acked on it;
        // the persistent session hands them out again after reconnect.
        shared.pending.lock().await.clear();

        reconnect_attempts += 1;
        if reconnect_config.attempts_exhausted(reconnect_attempts) {
            let _ = state_tx.send(ConnectionState::PermanentlyDisconnected(format!(
                "Max reconnection attempts exceeded: {reason}"
            )));
            break;
        }

        let delay_ms = reconnect_config.calculate_backoff_delay(reconnect_attempts);
        let _ = state_tx.send(ConnectionState::Reconnecting(reconnect_attempts));
        info!(
            "Attempting reconnection {} after {}ms delay",
            reconnect_attempts, delay_ms
        );
        if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
            break;
        }
    }

    info!("MQTT queue event loop stopped");
}

/// Returns false if shutdown was requested during the sleep
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

async fn resubscribe(shared: &Shared) {
    let subscriptions = shared.subscriptions.lock().await.clone();
    for filter in subscriptions {
        if let Err(e) = shared.client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
            error!("Failed to re-subscribe to {}: {}", filter, e);
        } else {
            debug!(target: "mqtt_transport", "Re-subscribed to: {}", filter);
        }
    }
}

async fn handle_publish(shared: &Shared, publish: Publish) {
    let channel = match MessageHandler::classify_publish(&publish, &shared.topics) {
        PublishDecision::Deliver(channel) => channel,
        PublishDecision::Discard(reason) => {
            warn!("Discarding MQTT message: {}", reason);
            if let Err(e) = shared.client.ack(&publish).await {
                error!("Failed to ack discarded message: {}", e);
            }
            return;
        }
    };

    let tag = shared.next_tag.fetch_add(1, Ordering::Relaxed);
    let delivery = Delivery {
        payload: publish.payload.clone(),
        handle: DeliveryHandle { channel, tag },
        redelivered: publish.dup,
    };

    let consumers = shared.consumers.lock().await;
    let Some(sender) = consumers.get(&channel) else {
        warn!(channel = %channel, "Message arrived with no consumer; leaving it unacknowledged");
        return;
    };

    shared.pending.lock().await.insert(tag, publish);
    if sender.send(delivery).is_err() {
        warn!(channel = %channel, "Consumer dropped; leaving message unacknowledged");
        shared.pending.lock().await.remove(&tag);
        return;
    }
    metrics().message_received();
}

#[async_trait]
impl QueueTransport for MqttQueue {
    async fn publish(&self, channel: QueueChannel, payload: Vec<u8>) -> Result<(), TransportError> {
        self.publisher
            .publish_to(self.topics().for_channel(channel), payload)
            .await?;
        metrics().message_published();
        Ok(())
    }

    async fn consume(&self, channel: QueueChannel) -> Result<DeliveryStream, TransportError> {
        self.consumer_for(channel)?.subscribe(channel).await
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), TransportError> {
        let connection = self.consumer_for(handle.channel)?;
        let publish = connection.take_pending(handle).await?;
        connection.ack_publish(&publish).await?;
        metrics().message_acked();
        Ok(())
    }

    async fn reject(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), TransportError> {
        let connection = self.consumer_for(handle.channel)?;
        let publish = connection.take_pending(handle).await?;
        let target = if requeue {
            self.topics().for_channel(handle.channel).to_string()
        } else {
            self.topics().dead_letter.clone()
        };

        self.publisher
            .publish_to(&target, publish.payload.to_vec())
            .await?;
        connection.ack_publish(&publish).await?;

        if requeue {
            metrics().message_requeued();
        } else {
            metrics().message_dead_lettered();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}
