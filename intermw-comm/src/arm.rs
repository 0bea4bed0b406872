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

//! API Request Manager: the single choke point for downstream sends and upstream dispatch.

use crate::broker::{Broker, Channel, EnvelopeListener};
use crate::config::MiddlewareConfig;
use crate::control_plane::callback_registry::CallbackRegistry;
use crate::data_plane::inbound_listener::InboundDispatchListener;
use crate::delivery::{build_callback, DeliveryCallback, PushSink};
use crate::envelope::{ConversationId, Envelope, EnvelopeMetadata, MessageType};
use crate::error::{ErrorKind, MiddlewareError};
use crate::model::Client;
use crate::observability::{events, fields, fields::FormattedEnvelopeFields};
use crate::registry::Registry;
use crate::requests;
use crate::routing::conversation_table::{ConversationKind, ConversationTable, Correlation};
use crate::routing::platform_partition::{device_ids, partition_by_platform};
use crate::routing::query_responses::QueryResponseStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "arm";

/// State shared between the ARM facade and its upstream listener.
#[derive(Default)]
pub(crate) struct ArmState {
    callbacks: CallbackRegistry,
    conversations: ConversationTable,
    query_responses: QueryResponseStore,
    last_metadata: Mutex<HashMap<String, EnvelopeMetadata>>,
}

impl ArmState {
    fn log_dropped(formatted: &FormattedEnvelopeFields, reason: &'static str) {
        warn!(
            event = events::ARM_DISPATCH_DROPPED,
            component = COMPONENT,
            msg_id = formatted.msg_id.as_str(),
            msg_types = formatted.msg_types.as_str(),
            client_id = formatted.client_id.as_str(),
            conversation_id = formatted.conversation_id.as_str(),
            sender = formatted.sender.as_str(),
            reason,
            "dropping upstream envelope"
        );
    }

    /// Routes one upstream envelope. Never fails: problems are logged and the envelope dropped.
    pub(crate) async fn dispatch_inbound(&self, envelope: Envelope) {
        let formatted = FormattedEnvelopeFields::from_envelope(&envelope);

        if let Some(sender) = envelope.sender_platform_id() {
            self.last_metadata
                .lock()
                .await
                .insert(sender.to_string(), envelope.metadata());
        }

        if !envelope.has_any_type(&MessageType::UPSTREAM_DELIVERABLE) {
            Self::log_dropped(&formatted, fields::REASON_NOT_UPSTREAM);
            return;
        }

        if envelope.has_type(MessageType::Query) {
            let Some(conversation_id) = envelope.conversation_id().cloned() else {
                Self::log_dropped(&formatted, fields::REASON_UNCORRELATED);
                return;
            };
            // Answers to abandoned or unknown queries are never picked up.
            if self.query_responses.store(envelope).await.is_err() {
                Self::log_dropped(&formatted, fields::REASON_UNCORRELATED);
                return;
            }
            self.conversations.close(&conversation_id).await;
            debug!(
                event = events::ARM_QUERY_RESPONSE_STORED,
                component = COMPONENT,
                conversation_id = formatted.conversation_id.as_str(),
                "stored query response"
            );
            return;
        }

        let client_id = match self.conversations.correlate(&envelope).await {
            Correlation::Client(client_id) => client_id,
            Correlation::Uncorrelated => {
                Self::log_dropped(&formatted, fields::REASON_UNCORRELATED);
                return;
            }
        };

        let Some(callback) = self.callbacks.get(&client_id).await else {
            Self::log_dropped(&formatted, fields::REASON_NO_CALLBACK);
            return;
        };

        let mut outcome = callback.handle(envelope.clone()).await;
        if outcome.is_err() {
            // The callback may have been swapped out while this envelope was in hand.
            if let Some(current) = self.callbacks.get(&client_id).await {
                if !Arc::ptr_eq(&current, &callback) {
                    outcome = current.handle(envelope).await;
                }
            }
        }

        match outcome {
            Ok(()) => debug!(
                event = events::ARM_DISPATCH_OK,
                component = COMPONENT,
                msg_id = formatted.msg_id.as_str(),
                client_id = client_id.as_str(),
                conversation_id = formatted.conversation_id.as_str(),
                "dispatched upstream envelope"
            ),
            Err(err) => error!(
                event = events::ARM_DISPATCH_FAILED,
                component = COMPONENT,
                msg_id = formatted.msg_id.as_str(),
                client_id = client_id.as_str(),
                conversation_id = formatted.conversation_id.as_str(),
                err = %err,
                "callback rejected upstream envelope"
            ),
        }
    }
}

/// Sends client operations downstream and delivers correlated upstream envelopes to the
/// owning client's callback.
pub struct ApiRequestManager {
    state: Arc<ArmState>,
    broker: Arc<dyn Broker>,
    push_sink: Arc<dyn PushSink>,
    config: MiddlewareConfig,
    inbound_listener: Arc<dyn EnvelopeListener>,
}

impl ApiRequestManager {
    /// Subscribes to the upstream channel and returns a running ARM.
    pub async fn start(
        broker: Arc<dyn Broker>,
        push_sink: Arc<dyn PushSink>,
        config: MiddlewareConfig,
    ) -> Result<Self, MiddlewareError> {
        let state = Arc::new(ArmState::default());
        let inbound_listener: Arc<dyn EnvelopeListener> =
            Arc::new(InboundDispatchListener::new(state.clone()));

        broker
            .register_listener(&Channel::upstream(), inbound_listener.clone())
            .await?;

        info!(
            event = events::ARM_START,
            component = COMPONENT,
            channel = Channel::upstream().as_str(),
            "API request manager listening for upstream envelopes"
        );

        Ok(Self {
            state,
            broker,
            push_sink,
            config,
            inbound_listener,
        })
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    /// Publishes `envelope` towards its receiver platform (or every platform when it has none)
    /// and returns its conversation id, assigning a fresh one if unset.
    pub async fn process_downstream(
        &self,
        mut envelope: Envelope,
    ) -> Result<ConversationId, MiddlewareError> {
        let conversation_id = envelope.ensure_conversation_id();

        if envelope.has_any_type(&[MessageType::Unsubscribe, MessageType::VirtualUnsubscribe]) {
            if let Some(subscription_id) = envelope.subscription_id() {
                self.state
                    .conversations
                    .close(&ConversationId::from(subscription_id))
                    .await;
            }
        }

        let opened = match envelope.client_id() {
            Some(client_id) => {
                self.state
                    .conversations
                    .open(
                        &conversation_id,
                        client_id,
                        ConversationKind::for_downstream(&envelope),
                    )
                    .await;
                true
            }
            None => false,
        };

        let query = envelope.has_type(MessageType::Query);
        if query {
            self.state.query_responses.expect(&conversation_id).await;
        }

        let channel = Channel::downstream_for(&envelope);
        let formatted = FormattedEnvelopeFields::from_envelope(&envelope);

        match self.broker.publish(&channel, envelope).await {
            Ok(()) => {
                debug!(
                    event = events::ARM_DOWNSTREAM_PUBLISH_OK,
                    component = COMPONENT,
                    channel = channel.as_str(),
                    msg_id = formatted.msg_id.as_str(),
                    msg_types = formatted.msg_types.as_str(),
                    client_id = formatted.client_id.as_str(),
                    conversation_id = formatted.conversation_id.as_str(),
                    "published downstream envelope"
                );
                Ok(conversation_id)
            }
            Err(err) => {
                if opened {
                    self.state.conversations.cancel_one(&conversation_id).await;
                }
                if query {
                    self.state.query_responses.discard(&conversation_id).await;
                }
                warn!(
                    event = events::ARM_DOWNSTREAM_PUBLISH_FAILED,
                    component = COMPONENT,
                    channel = channel.as_str(),
                    msg_id = formatted.msg_id.as_str(),
                    conversation_id = formatted.conversation_id.as_str(),
                    receiver = formatted.receiver.as_str(),
                    err = %err,
                    "unable to publish downstream envelope"
                );
                if err.kind() == ErrorKind::Transport {
                    Err(err)
                } else {
                    Err(MiddlewareError::transport_with_source(
                        format!("unable to publish on {channel}"),
                        err,
                    ))
                }
            }
        }
    }

    /// Installs `callback` for `client_id`, stopping the callback it replaces.
    pub async fn register_callback(&self, client_id: &str, callback: Arc<dyn DeliveryCallback>) {
        let replaced = self.state.callbacks.install(client_id, callback).await;

        match replaced {
            Some(previous) => {
                info!(
                    event = events::CALLBACK_REPLACED,
                    component = COMPONENT,
                    client_id,
                    "replaced delivery callback"
                );
                previous.stop().await;
            }
            None => info!(
                event = events::CALLBACK_REGISTERED,
                component = COMPONENT,
                client_id,
                "registered delivery callback"
            ),
        }
    }

    /// Builds and installs the callback matching the client's delivery settings.
    pub async fn register_client_callback(&self, client: &Client) -> Result<(), MiddlewareError> {
        let callback = build_callback(client, self.push_sink.clone(), &self.config)?;
        self.register_callback(&client.client_id, callback).await;
        Ok(())
    }

    /// Removes the client's callback and forgets its conversations. Undelivered envelopes
    /// are discarded. Returns whether a callback was registered.
    pub async fn unregister_callback(&self, client_id: &str) -> bool {
        let closed = self.state.conversations.close_client(client_id).await;
        let Some(callback) = self.state.callbacks.remove(client_id).await else {
            return false;
        };
        callback.stop().await;

        info!(
            event = events::CALLBACK_UNREGISTERED,
            component = COMPONENT,
            client_id,
            closed_conversations = closed,
            "unregistered delivery callback"
        );
        true
    }

    /// Applies the client's current delivery settings. Same-mode changes update the callback
    /// in place; mode switches move undelivered envelopes to a new callback first.
    pub async fn update_callback(&self, client: &Client) -> Result<(), MiddlewareError> {
        let client_id = client.client_id.as_str();

        match self.state.callbacks.get(client_id).await {
            Some(callback) if callback.delivery_mode() == client.response_delivery => {
                callback.update(client).await?;
                info!(
                    event = events::CALLBACK_UPDATED,
                    component = COMPONENT,
                    client_id,
                    "updated delivery callback in place"
                );
            }
            _ => {
                let callback = build_callback(client, self.push_sink.clone(), &self.config)?;
                let replaced = self
                    .state
                    .callbacks
                    .install_transferring(client_id, callback)
                    .await;
                if let Some(previous) = replaced {
                    previous.stop().await;
                }
                info!(
                    event = events::CALLBACK_REPLACED,
                    component = COMPONENT,
                    client_id,
                    delivery_mode = ?client.response_delivery,
                    "swapped delivery callback"
                );
            }
        }
        Ok(())
    }

    pub async fn callback(&self, client_id: &str) -> Option<Arc<dyn DeliveryCallback>> {
        self.state.callbacks.get(client_id).await
    }

    pub async fn callback_count(&self) -> usize {
        self.state.callbacks.len().await
    }

    async fn pull_callback(
        &self,
        client_id: &str,
    ) -> Result<Arc<dyn DeliveryCallback>, MiddlewareError> {
        self.callback(client_id).await.ok_or_else(|| {
            MiddlewareError::not_found(format!("no delivery callback for client {client_id}"))
        })
    }

    /// Pops one envelope for a pull client, waiting up to `timeout` (`None` waits indefinitely).
    pub async fn consume_message(
        &self,
        client_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, MiddlewareError> {
        self.pull_callback(client_id)
            .await?
            .consume_message(timeout)
            .await
    }

    /// Pops up to `max` immediately available envelopes for a pull client.
    pub async fn consume_messages(
        &self,
        client_id: &str,
        max: usize,
    ) -> Result<Vec<Envelope>, MiddlewareError> {
        self.pull_callback(client_id)
            .await?
            .consume_messages(max)
            .await
    }

    /// Takes the answer to a query conversation if it already arrived. Never waits.
    pub async fn get_query_response_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<Envelope> {
        self.state.query_responses.take(conversation_id).await
    }

    /// Forgets a query conversation whose caller stopped waiting.
    pub async fn abandon_query(&self, conversation_id: &ConversationId) {
        self.state.query_responses.discard(conversation_id).await;
        self.state.conversations.close(conversation_id).await;
    }

    /// Stops correlating upstream envelopes with `conversation_id`.
    pub async fn close_conversation(&self, conversation_id: &ConversationId) -> bool {
        self.state.conversations.close(conversation_id).await
    }

    pub async fn is_conversation_open(&self, conversation_id: &ConversationId) -> bool {
        self.state.conversations.is_open(conversation_id).await
    }

    /// Routing metadata of the last upstream envelope sent by `platform_id`.
    pub async fn last_message_metadata(&self, platform_id: &str) -> Option<EnvelopeMetadata> {
        self.state
            .last_metadata
            .lock()
            .await
            .get(platform_id)
            .cloned()
    }

    /// Recreates every registered client's callback and re-sends every stored subscription,
    /// tagged `SYS_INIT`, under its original conversation id.
    pub async fn restore_state(&self, registry: &dyn Registry) -> Result<(), MiddlewareError> {
        info!(
            event = events::RESTORE_STATE_START,
            component = COMPONENT,
            "restoring callbacks and subscriptions"
        );

        let clients = registry.list_clients().await?;
        for client in &clients {
            if let Err(err) = self.register_client_callback(client).await {
                warn!(
                    event = events::RESTORE_STATE_FAILED,
                    component = COMPONENT,
                    client_id = client.client_id.as_str(),
                    err = %err,
                    "unable to restore delivery callback"
                );
            }
        }

        let subscriptions = registry.list_subscriptions(None).await?;
        let mut resent = 0usize;
        for subscription in &subscriptions {
            let devices = registry.get_devices(&subscription.device_ids).await?;
            for (platform_id, platform_devices) in partition_by_platform(&devices) {
                let envelope = requests::subscribe(
                    &subscription.client_id,
                    &subscription.conversation_id,
                    &platform_id,
                    &device_ids(&platform_devices),
                )
                .with_message_type(MessageType::SysInit);

                match self.process_downstream(envelope).await {
                    Ok(_) => resent += 1,
                    Err(err) => warn!(
                        event = events::RESTORE_STATE_FAILED,
                        component = COMPONENT,
                        client_id = subscription.client_id.as_str(),
                        conversation_id = subscription.conversation_id.as_str(),
                        receiver = platform_id.as_str(),
                        err = %err,
                        "unable to re-send subscription"
                    ),
                }
            }
        }

        info!(
            event = events::RESTORE_STATE_OK,
            component = COMPONENT,
            clients = clients.len(),
            subscriptions = subscriptions.len(),
            resent_envelopes = resent,
            "restored middleware state"
        );
        Ok(())
    }

    /// Stops listening upstream and stops every callback (push callbacks flush first).
    pub async fn shutdown(&self) {
        if let Err(err) = self
            .broker
            .unregister_listener(&Channel::upstream(), self.inbound_listener.clone())
            .await
        {
            debug!(
                event = events::ARM_SHUTDOWN,
                component = COMPONENT,
                err = %err,
                "upstream listener was already gone"
            );
        }

        let callbacks = self.state.callbacks.clear().await;
        let stopped = callbacks.len();
        futures::future::join_all(callbacks.iter().map(|callback| callback.stop())).await;

        info!(
            event = events::ARM_SHUTDOWN,
            component = COMPONENT,
            stopped_callbacks = stopped,
            "API request manager stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::ApiRequestManager;
    use crate::broker::{Broker, Channel, EnvelopeListener, InMemoryBroker};
    use crate::config::MiddlewareConfig;
    use crate::delivery::{PushError, PushSink};
    use crate::envelope::{ConversationId, Envelope, MessageType};
    use crate::error::ErrorKind;
    use crate::model::{Client, DeliveryMode};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct NullSink;

    #[async_trait]
    impl PushSink for NullSink {
        async fn post(
            &self,
            _url: &str,
            _content_type: &str,
            _body: String,
        ) -> Result<(), PushError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct DownstreamRecorder {
        received: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl EnvelopeListener for DownstreamRecorder {
        async fn on_receive(&self, envelope: Envelope) {
            self.received.lock().await.push(envelope);
        }
    }

    async fn start_arm(broker: Arc<InMemoryBroker>) -> ApiRequestManager {
        ApiRequestManager::start(broker, Arc::new(NullSink), MiddlewareConfig::default())
            .await
            .unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn process_downstream_assigns_and_keeps_conversation_ids() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        let recorder = Arc::new(DownstreamRecorder::default());
        broker
            .register_listener(&Channel::downstream_platform("p1"), recorder.clone())
            .await
            .unwrap();

        let generated = arm
            .process_downstream(
                Envelope::new([MessageType::SyncDevices]).with_receiver_platform_id("p1"),
            )
            .await
            .unwrap();
        let preset = ConversationId::from("conv-preset");
        let kept = arm
            .process_downstream(
                Envelope::new([MessageType::SyncDevices])
                    .with_receiver_platform_id("p1")
                    .with_conversation_id(preset.clone()),
            )
            .await
            .unwrap();

        settle().await;
        let received = recorder.received.lock().await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].conversation_id(), Some(&generated));
        assert_eq!(kept, preset);
    }

    #[tokio::test]
    async fn responses_reach_the_registered_pull_client() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        arm.register_client_callback(&Client::pull("app", 5))
            .await
            .unwrap();

        let request = Envelope::new([MessageType::SyncDevices])
            .with_client_id("app")
            .with_receiver_platform_id("p1");
        let conversation = arm.process_downstream(request.clone()).await.unwrap();
        let request = request.with_conversation_id(conversation.clone());

        broker
            .publish(
                &Channel::upstream(),
                Envelope::reply_to(&request, [MessageType::Response, MessageType::SyncDevices]),
            )
            .await
            .unwrap();

        let delivered = arm
            .consume_message("app", Some(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.conversation_id(), Some(&conversation));
        assert!(!arm.is_conversation_open(&conversation).await);
        assert_eq!(
            arm.last_message_metadata("p1")
                .await
                .and_then(|metadata| metadata.conversation_id),
            Some(conversation)
        );
    }

    #[tokio::test]
    async fn non_upstream_and_query_envelopes_bypass_callbacks() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        arm.register_client_callback(&Client::pull("app", 5))
            .await
            .unwrap();
        let conversation = arm
            .process_downstream(
                Envelope::new([MessageType::Query])
                    .with_client_id("app")
                    .with_receiver_platform_id("p1"),
            )
            .await
            .unwrap();

        broker
            .publish(
                &Channel::upstream(),
                Envelope::new([MessageType::Subscribe]).with_client_id("app"),
            )
            .await
            .unwrap();
        broker
            .publish(
                &Channel::upstream(),
                Envelope::new([MessageType::Query, MessageType::Response])
                    .with_client_id("app")
                    .with_conversation_id(conversation.clone()),
            )
            .await
            .unwrap();
        settle().await;

        assert!(arm.consume_messages("app", 5).await.unwrap().is_empty());
        assert!(arm.get_query_response_message(&conversation).await.is_some());
        assert!(arm.get_query_response_message(&conversation).await.is_none());
        assert!(!arm.is_conversation_open(&conversation).await);
    }

    #[tokio::test]
    async fn query_answers_without_an_open_conversation_are_dropped() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        let stale = ConversationId::from("conv-stale");

        broker
            .publish(
                &Channel::upstream(),
                Envelope::new([MessageType::Query, MessageType::Response])
                    .with_client_id("app")
                    .with_conversation_id(stale.clone()),
            )
            .await
            .unwrap();
        settle().await;

        assert!(arm.get_query_response_message(&stale).await.is_none());
    }

    #[tokio::test]
    async fn answer_to_an_abandoned_query_is_never_stored() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        let conversation = arm
            .process_downstream(
                Envelope::new([MessageType::Query])
                    .with_client_id("app")
                    .with_receiver_platform_id("p1"),
            )
            .await
            .unwrap();

        arm.abandon_query(&conversation).await;
        broker
            .publish(
                &Channel::upstream(),
                Envelope::new([MessageType::Query, MessageType::Response])
                    .with_client_id("app")
                    .with_conversation_id(conversation.clone()),
            )
            .await
            .unwrap();
        settle().await;

        assert!(arm.get_query_response_message(&conversation).await.is_none());
        assert!(!arm.is_conversation_open(&conversation).await);
    }

    #[tokio::test]
    async fn mode_switch_moves_undelivered_envelopes() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        arm.register_client_callback(&Client::push("app", "http://cb", 100))
            .await
            .unwrap();
        let push = arm.callback("app").await.unwrap();
        push.handle(Envelope::new([MessageType::Response]).with_client_id("app"))
            .await
            .unwrap();

        arm.update_callback(&Client::pull("app", 5)).await.unwrap();

        let callback = arm.callback("app").await.unwrap();
        assert_eq!(callback.delivery_mode(), DeliveryMode::Pull);
        assert_eq!(callback.consume_messages(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pull_retrieval_from_unknown_or_push_client_fails() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker).await;
        arm.register_client_callback(&Client::push("pusher", "http://cb", 1))
            .await
            .unwrap();

        assert_eq!(
            arm.consume_messages("ghost", 1).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            arm.consume_messages("pusher", 1).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn publish_failure_is_a_transport_error_and_rolls_back_correlation() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        broker.close().await;
        let conversation = ConversationId::from("conv-fail");

        let err = arm
            .process_downstream(
                Envelope::new([MessageType::SyncDevices])
                    .with_client_id("app")
                    .with_conversation_id(conversation.clone()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!arm.is_conversation_open(&conversation).await);
    }

    #[tokio::test]
    async fn shutdown_stops_every_callback() {
        let broker = Arc::new(InMemoryBroker::new("arm-test"));
        let arm = start_arm(broker.clone()).await;
        arm.register_client_callback(&Client::pull("a", 1)).await.unwrap();
        arm.register_client_callback(&Client::pull("b", 1)).await.unwrap();

        arm.shutdown().await;

        assert_eq!(arm.callback_count().await, 0);
        assert_eq!(broker.listener_count(&Channel::upstream()), 0);
    }
}
