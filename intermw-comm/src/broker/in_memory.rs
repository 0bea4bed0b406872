/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! In-process broker backend.

use super::{Broker, Channel, EnvelopeListener, ListenerIdentityKey};
use crate::delivery::DeliveryQueue;
use crate::envelope::Envelope;
use crate::error::MiddlewareError;
use crate::observability::{events, fields, fields::FormattedEnvelopeFields};
use crate::runtime::worker_runtime::{spawn_worker, WorkerHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn, Level};

const COMPONENT: &str = "in_memory_broker";

struct ChannelDelivery {
    envelope: Envelope,
    listeners: Vec<Arc<dyn EnvelopeListener>>,
}

struct ChannelBinding {
    listeners: Vec<ListenerIdentityKey>,
    sender: UnboundedSender<ChannelDelivery>,
    // Detached on drop; the task ends once the sender is gone and pending deliveries are done.
    _worker: WorkerHandle,
}

#[derive(Default)]
struct BrokerState {
    closed: bool,
    channels: HashMap<Channel, ChannelBinding>,
    queues: HashMap<String, Arc<DeliveryQueue>>,
}

/// Broker held entirely in process memory.
///
/// Every channel has one delivery task, so listeners observe envelopes in publish order.
/// Listeners see only envelopes published after they registered.
pub struct InMemoryBroker {
    name: String,
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(BrokerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> MiddlewareError {
        MiddlewareError::transport(format!("broker {} is closed", self.name))
    }

    /// Number of listeners currently registered on `channel`.
    pub fn listener_count(&self, channel: &Channel) -> usize {
        self.state()
            .channels
            .get(channel)
            .map(|binding| binding.listeners.len())
            .unwrap_or(0)
    }

    fn bind_channel(&self, channel: &Channel) -> ChannelBinding {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker_id = format!("{}:{}", self.name, channel);
        let worker = spawn_worker(
            worker_id.clone(),
            Self::channel_delivery_loop(worker_id, receiver),
        );

        ChannelBinding {
            listeners: Vec::new(),
            sender,
            _worker: worker,
        }
    }

    async fn channel_delivery_loop(
        worker_id: String,
        mut receiver: UnboundedReceiver<ChannelDelivery>,
    ) {
        while let Some(delivery) = receiver.recv().await {
            for listener in delivery.listeners {
                listener.on_receive(delivery.envelope.clone()).await;
            }
        }

        debug!(
            event = events::BROKER_CHANNEL_DELIVERY_STOPPED,
            component = COMPONENT,
            worker_id = worker_id.as_str(),
            "channel delivery loop stopped"
        );
    }

    fn close_now(&self) {
        let (channels, queues) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.channels),
                std::mem::take(&mut state.queues),
            )
        };

        for queue in queues.values() {
            queue.close();
        }

        info!(
            event = events::BROKER_CLOSED,
            component = COMPONENT,
            broker = self.name.as_str(),
            channels = channels.len(),
            queues = queues.len(),
            "broker closed"
        );
    }

    fn queue(&self, name: &str) -> Result<Arc<DeliveryQueue>, MiddlewareError> {
        let mut state = self.state();
        if state.closed {
            return Err(self.closed_error());
        }
        Ok(state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DeliveryQueue::new()))
            .clone())
    }
}

impl Drop for InMemoryBroker {
    fn drop(&mut self) {
        self.close_now();
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &Channel, envelope: Envelope) -> Result<(), MiddlewareError> {
        if tracing::enabled!(Level::DEBUG) {
            let fields = FormattedEnvelopeFields::from_envelope(&envelope);
            debug!(
                event = events::BROKER_PUBLISH,
                component = COMPONENT,
                channel = channel.as_str(),
                msg_id = fields.msg_id.as_str(),
                msg_types = fields.msg_types.as_str(),
                conversation_id = fields.conversation_id.as_str(),
                "publishing envelope"
            );
        }

        let state = self.state();
        if state.closed {
            warn!(
                event = events::BROKER_PUBLISH_REJECTED,
                component = COMPONENT,
                channel = channel.as_str(),
                reason = fields::REASON_CHANNEL_CLOSED,
                "broker is closed"
            );
            return Err(self.closed_error());
        }

        let Some(binding) = state.channels.get(channel) else {
            return Ok(());
        };
        if binding.listeners.is_empty() {
            return Ok(());
        }

        let listeners = binding
            .listeners
            .iter()
            .map(|key| key.listener().clone())
            .collect();

        binding
            .sender
            .send(ChannelDelivery {
                envelope,
                listeners,
            })
            .map_err(|_| {
                warn!(
                    event = events::BROKER_PUBLISH_REJECTED,
                    component = COMPONENT,
                    channel = channel.as_str(),
                    reason = fields::REASON_CHANNEL_CLOSED,
                    "channel delivery task is gone"
                );
                MiddlewareError::transport(format!("delivery task of channel {channel} is gone"))
            })
    }

    async fn register_listener(
        &self,
        channel: &Channel,
        listener: Arc<dyn EnvelopeListener>,
    ) -> Result<(), MiddlewareError> {
        let key = ListenerIdentityKey::new(listener);
        let mut state = self.state();
        if state.closed {
            return Err(self.closed_error());
        }

        if !state.channels.contains_key(channel) {
            let binding = self.bind_channel(channel);
            state.channels.insert(channel.clone(), binding);
        }

        if let Some(binding) = state.channels.get_mut(channel) {
            if !binding.listeners.contains(&key) {
                binding.listeners.push(key);
            }
        }

        debug!(
            event = events::BROKER_LISTENER_REGISTERED,
            component = COMPONENT,
            channel = channel.as_str(),
            "listener registered"
        );
        Ok(())
    }

    async fn unregister_listener(
        &self,
        channel: &Channel,
        listener: Arc<dyn EnvelopeListener>,
    ) -> Result<(), MiddlewareError> {
        let key = ListenerIdentityKey::new(listener);
        let mut state = self.state();
        if state.closed {
            return Err(self.closed_error());
        }

        let binding = state.channels.get_mut(channel).ok_or_else(|| {
            MiddlewareError::not_found(format!("no listeners registered on channel {channel}"))
        })?;
        let before = binding.listeners.len();
        binding.listeners.retain(|existing| existing != &key);

        if binding.listeners.len() == before {
            return Err(MiddlewareError::not_found(format!(
                "listener is not registered on channel {channel}"
            )));
        }

        debug!(
            event = events::BROKER_LISTENER_UNREGISTERED,
            component = COMPONENT,
            channel = channel.as_str(),
            "listener unregistered"
        );
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, envelope: Envelope) -> Result<(), MiddlewareError> {
        self.queue(queue)?
            .push(envelope)
            .map_err(|e| MiddlewareError::transport_with_source(format!("queue {queue}"), e))
    }

    async fn receive_from_queue(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, MiddlewareError> {
        let queue = self.queue(queue)?;
        match queue.pop(timeout).await {
            Some(envelope) => Ok(Some(envelope)),
            None if queue.is_closed() => Err(self.closed_error()),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.close_now();
    }
}
