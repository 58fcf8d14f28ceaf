//! In-process queue with broker semantics
//!
//! Mirrors what the pipeline expects from a real broker: messages survive
//! until acknowledged, each channel hands out one unacknowledged delivery at
//! a time, requeued messages go to the back flagged as redelivered and
//! rejected messages land in a dead-letter list.

use super::{Delivery, DeliveryHandle, DeliveryStream, QueueChannel, QueueTransport, TransportError};
use crate::observability::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// A message moved to the dead-letter channel
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub channel: QueueChannel,
    pub payload: Bytes,
}

#[derive(Debug)]
struct QueuedMessage {
    tag: u64,
    payload: Bytes,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct ChannelState {
    ready: VecDeque<QueuedMessage>,
    in_flight: Option<QueuedMessage>,
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
}

#[derive(Debug, Default)]
struct QueueState {
    channels: HashMap<QueueChannel, ChannelState>,
    dead_letters: Vec<DeadLetter>,
    next_tag: u64,
    acked: usize,
}

impl QueueState {
    fn channel(&mut self, channel: QueueChannel) -> &mut ChannelState {
        self.channels.entry(channel).or_default()
    }

    /// Hand the next ready message to the consumer if nothing is in flight
    fn dispatch(&mut self, channel: QueueChannel) {
        let state = self.channel(channel);
        if state.in_flight.is_some() {
            return;
        }
        let Some(sender) = state.consumer.clone() else {
            return;
        };
        let Some(message) = state.ready.pop_front() else {
            return;
        };

        let delivery = Delivery {
            payload: message.payload.clone(),
            handle: DeliveryHandle {
                channel,
                tag: message.tag,
            },
            redelivered: message.redelivered,
        };

        if sender.send(delivery).is_err() {
            debug!(channel = %channel, "Consumer went away, keeping message queued");
            state.consumer = None;
            state.ready.push_front(message);
            return;
        }

        state.in_flight = Some(message);
        metrics().message_received();
    }

    fn take_in_flight(
        &mut self,
        handle: DeliveryHandle,
    ) -> Result<QueuedMessage, TransportError> {
        let state = self.channel(handle.channel);
        match state.in_flight.take() {
            Some(message) if message.tag == handle.tag => Ok(message),
            other => {
                state.in_flight = other;
                Err(TransportError::UnknownDelivery(handle.tag))
            }
        }
    }
}

/// Cloneable handle to one shared in-memory broker
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    connected: Arc<AtomicBool>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    pub async fn acked_count(&self) -> usize {
        self.state.lock().await.acked
    }

    /// Messages waiting or in flight on a channel
    pub async fn pending(&self, channel: QueueChannel) -> usize {
        let mut state = self.state.lock().await;
        let channel = state.channel(channel);
        channel.ready.len() + usize::from(channel.in_flight.is_some())
    }

    /// Drop every consumer and refuse further publishes. Unsettled messages
    /// go back to the front of their channel.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        metrics().queue_connection_changed(false);
        let mut state = self.state.lock().await;
        for channel in state.channels.values_mut() {
            channel.consumer = None;
            if let Some(mut message) = channel.in_flight.take() {
                message.redelivered = true;
                channel.ready.push_front(message);
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn publish(&self, channel: QueueChannel, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.channel(channel).ready.push_back(QueuedMessage {
            tag,
            payload: Bytes::from(payload),
            redelivered: false,
        });
        metrics().message_published();
        state.dispatch(channel);
        Ok(())
    }

    async fn consume(&self, channel: QueueChannel) -> Result<DeliveryStream, TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        let slot = state.channel(channel);
        if slot
            .consumer
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
        {
            return Err(TransportError::AlreadyConsuming(channel));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        slot.consumer = Some(sender);
        // A previous consumer may have left a delivery unsettled
        if let Some(mut message) = slot.in_flight.take() {
            message.redelivered = true;
            slot.ready.push_front(message);
        }
        state.dispatch(channel);
        Ok(receiver)
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.take_in_flight(handle)?;
        state.acked += 1;
        metrics().message_acked();
        state.dispatch(handle.channel);
        Ok(())
    }

    async fn reject(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let mut message = state.take_in_flight(handle)?;
        if requeue {
            message.redelivered = true;
            state.channel(handle.channel).ready.push_back(message);
            metrics().message_requeued();
        } else {
            state.dead_letters.push(DeadLetter {
                channel: handle.channel,
                payload: message.payload,
            });
            metrics().message_dead_lettered();
        }
        state.dispatch(handle.channel);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
