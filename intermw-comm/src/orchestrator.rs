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

//! Client-facing operations: validation against the registry, partitioning by platform and
//! fan-out through the ARM under one conversation id per operation.
//!
//! Every accepted operation returns its conversation id immediately; completion shows up
//! later as correlated envelopes in the client's callback. Single-target operations fail
//! fast on transport errors. Multi-target operations keep going and report
//! [`MiddlewareError::PartialFanOut`] if any platform could not be reached.

use crate::arm::ApiRequestManager;
use crate::broker::Broker;
use crate::config::MiddlewareConfig;
use crate::delivery::{timeout_from_millis, PushSink};
use crate::envelope::{ConversationId, Envelope};
use crate::error::{FailedTarget, MiddlewareError};
use crate::model::{
    ActuationInput, Client, DeliveryMode, IoTDevice, Plat2PlatSubscribeInput,
    Plat2PlatSubscription, Platform, Subscription, UpdateClientInput,
};
use crate::observability::{events, fields};
use crate::query_bridge::SyncQueryBridge;
use crate::registry::Registry;
use crate::requests;
use crate::routing::platform_partition::{device_ids, partition_by_platform};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

const COMPONENT: &str = "orchestrator";

/// Facade over the middleware core used by the API layer.
pub struct InterMwApi {
    arm: Arc<ApiRequestManager>,
    registry: Arc<dyn Registry>,
    query_bridge: SyncQueryBridge,
    config: MiddlewareConfig,
}

impl InterMwApi {
    /// Starts the ARM on `broker` and restores callbacks and subscriptions from `registry`.
    pub async fn start(
        broker: Arc<dyn Broker>,
        registry: Arc<dyn Registry>,
        push_sink: Arc<dyn PushSink>,
        config: MiddlewareConfig,
    ) -> Result<Self, MiddlewareError> {
        config.validate()?;
        let arm = Arc::new(ApiRequestManager::start(broker, push_sink, config).await?);
        arm.restore_state(registry.as_ref()).await?;
        Ok(Self::with_arm(arm, registry))
    }

    pub fn with_arm(arm: Arc<ApiRequestManager>, registry: Arc<dyn Registry>) -> Self {
        let config = arm.config().clone();
        Self {
            query_bridge: SyncQueryBridge::new(arm.clone()),
            arm,
            registry,
            config,
        }
    }

    pub fn arm(&self) -> &Arc<ApiRequestManager> {
        &self.arm
    }

    pub fn query_bridge(&self) -> &SyncQueryBridge {
        &self.query_bridge
    }

    pub async fn shutdown(&self) {
        self.arm.shutdown().await;
    }

    // ---- clients -------------------------------------------------------------------------

    fn validate_client(client: &Client) -> Result<(), MiddlewareError> {
        if client.client_id.trim().is_empty() {
            return Err(MiddlewareError::validation("client id must not be empty"));
        }
        if client.receiving_capacity == Some(0) {
            return Err(MiddlewareError::validation(
                "receiving capacity must be at least 1",
            ));
        }
        if client.response_delivery == DeliveryMode::Push && client.callback_url.is_none() {
            return Err(MiddlewareError::validation(format!(
                "client {} uses push delivery but has no callback URL",
                client.client_id
            )));
        }
        Ok(())
    }

    async fn ensure_client(&self, client_id: &str) -> Result<Client, MiddlewareError> {
        self.registry
            .get_client(client_id)
            .await?
            .ok_or_else(|| {
                MiddlewareError::not_found(format!("client {client_id} is not registered"))
            })
    }

    /// Registers a client and installs its delivery callback. Returns the stored client.
    pub async fn register_client(&self, mut client: Client) -> Result<Client, MiddlewareError> {
        Self::validate_client(&client)?;
        if self.registry.client_exists(&client.client_id).await? {
            return Err(MiddlewareError::conflict(format!(
                "client {} is already registered",
                client.client_id
            )));
        }

        client
            .receiving_capacity
            .get_or_insert(self.config.client_receiving_capacity_default);
        self.registry.register_client(client.clone()).await?;

        if let Err(err) = self.arm.register_client_callback(&client).await {
            self.registry.remove_client(&client.client_id).await?;
            return Err(err);
        }
        Ok(client)
    }

    /// Applies `input` to a registered client and swaps its callback without losing envelopes.
    pub async fn update_client(
        &self,
        client_id: &str,
        input: UpdateClientInput,
    ) -> Result<Client, MiddlewareError> {
        let existing = self.ensure_client(client_id).await?;
        let updated = existing.updated_with(&input);
        Self::validate_client(&updated)?;

        self.registry.update_client(updated.clone()).await?;
        self.arm.update_callback(&updated).await?;
        Ok(updated)
    }

    /// Removes a client, its callback and its conversations. Undelivered envelopes are lost.
    pub async fn remove_client(&self, client_id: &str) -> Result<(), MiddlewareError> {
        self.ensure_client(client_id).await?;
        self.registry.remove_client(client_id).await?;
        self.arm.unregister_callback(client_id).await;
        Ok(())
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Client, MiddlewareError> {
        self.ensure_client(client_id).await
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>, MiddlewareError> {
        self.registry.list_clients().await
    }

    /// Long-polls one envelope for a pull client. A negative timeout waits indefinitely.
    pub async fn retrieve_response_message(
        &self,
        client_id: &str,
        timeout_millis: i64,
    ) -> Result<Option<Envelope>, MiddlewareError> {
        self.ensure_client(client_id).await?;
        self.arm
            .consume_message(client_id, timeout_from_millis(timeout_millis))
            .await
    }

    /// Drains up to the client's receiving capacity of ready envelopes without waiting.
    pub async fn retrieve_response_messages(
        &self,
        client_id: &str,
    ) -> Result<Vec<Envelope>, MiddlewareError> {
        let client = self.ensure_client(client_id).await?;
        self.arm
            .consume_messages(client_id, client.capacity())
            .await
    }

    // ---- platforms -----------------------------------------------------------------------

    async fn ensure_platform(&self, platform_id: &str) -> Result<Platform, MiddlewareError> {
        self.registry.get_platform(platform_id).await?.ok_or_else(|| {
            MiddlewareError::not_found(format!("platform {platform_id} is not registered"))
        })
    }

    /// Broadcasts a request for supported platform types to every bridge.
    pub async fn list_platform_types(
        &self,
        client_id: &str,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let conversation_id = ConversationId::generate();
        self.arm
            .process_downstream(requests::list_supported_platform_types(
                client_id,
                &conversation_id,
            ))
            .await
    }

    /// Registers a platform and asks its bridge for its devices, under one conversation.
    pub async fn register_platform(
        &self,
        client_id: &str,
        platform: Platform,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        if platform.platform_id.trim().is_empty() || platform.platform_type.trim().is_empty() {
            return Err(MiddlewareError::validation(
                "platform id and platform type must not be empty",
            ));
        }
        if self.registry.get_platform(&platform.platform_id).await?.is_some() {
            return Err(MiddlewareError::conflict(format!(
                "platform {} is already registered",
                platform.platform_id
            )));
        }

        self.registry.register_platform(platform.clone()).await?;

        let conversation_id = ConversationId::generate();
        if let Err(err) = self
            .arm
            .process_downstream(requests::platform_register(
                client_id,
                &conversation_id,
                &platform,
            ))
            .await
        {
            self.registry.remove_platform(&platform.platform_id).await?;
            return Err(err);
        }

        self.arm
            .process_downstream(requests::list_devices(
                client_id,
                &conversation_id,
                &platform.platform_id,
            ))
            .await
    }

    /// Updates a platform's settings. Its type cannot change.
    pub async fn update_platform(
        &self,
        client_id: &str,
        platform: Platform,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let existing = self.ensure_platform(&platform.platform_id).await?;
        if existing.platform_type != platform.platform_type {
            return Err(MiddlewareError::validation(format!(
                "platform type cannot change from {} to {}",
                existing.platform_type, platform.platform_type
            )));
        }

        self.registry.update_platform(platform.clone()).await?;
        let conversation_id = ConversationId::generate();
        self.arm
            .process_downstream(requests::platform_update(
                client_id,
                &conversation_id,
                &platform,
            ))
            .await
    }

    /// Unregisters a platform together with the devices it hosts.
    pub async fn remove_platform(
        &self,
        client_id: &str,
        platform_id: &str,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        self.ensure_platform(platform_id).await?;

        let hosted = self.registry.list_devices(Some(platform_id)).await?;
        if !hosted.is_empty() {
            self.registry.remove_devices(&device_ids(&hosted)).await?;
        }
        self.registry.remove_platform(platform_id).await?;

        let conversation_id = ConversationId::generate();
        self.arm
            .process_downstream(requests::platform_unregister(
                client_id,
                &conversation_id,
                platform_id,
            ))
            .await
    }

    pub async fn get_platform(&self, platform_id: &str) -> Result<Platform, MiddlewareError> {
        self.ensure_platform(platform_id).await
    }

    pub async fn list_platforms(&self) -> Result<Vec<Platform>, MiddlewareError> {
        self.registry.list_platforms().await
    }

    // ---- devices -------------------------------------------------------------------------

    fn ensure_unique_ids(device_ids: &[String]) -> Result<(), MiddlewareError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = device_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(MiddlewareError::validation(format!(
                "device {duplicate} is listed more than once"
            )));
        }
        Ok(())
    }

    async fn ensure_platforms_of(&self, devices: &[IoTDevice]) -> Result<(), MiddlewareError> {
        let platform_ids: BTreeSet<&str> =
            devices.iter().map(|device| device.hosted_by.as_str()).collect();
        for platform_id in platform_ids {
            self.ensure_platform(platform_id).await?;
        }
        Ok(())
    }

    /// Ids in `requested` that are missing from `found`.
    fn missing_ids(requested: &[String], found: &[IoTDevice]) -> Vec<String> {
        let found: HashSet<&str> = found.iter().map(|device| device.device_id.as_str()).collect();
        requested
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Registers devices and asks each owning platform to create its share.
    pub async fn platform_create_devices(
        &self,
        client_id: &str,
        devices: Vec<IoTDevice>,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        if devices.is_empty() {
            return Err(MiddlewareError::validation("device list must not be empty"));
        }
        let ids = device_ids(&devices);
        Self::ensure_unique_ids(&ids)?;
        self.ensure_platforms_of(&devices).await?;

        let already_registered = self.registry.get_devices(&ids).await?;
        if !already_registered.is_empty() {
            return Err(MiddlewareError::conflict(format!(
                "devices already registered: {}",
                device_ids(&already_registered).join(", ")
            )));
        }

        self.registry.register_devices(devices.clone()).await?;

        let conversation_id = ConversationId::generate();
        let envelopes = partition_by_platform(&devices)
            .into_iter()
            .map(|(platform_id, platform_devices)| {
                requests::create_devices(
                    client_id,
                    &conversation_id,
                    &platform_id,
                    &platform_devices,
                )
            })
            .collect();
        self.fan_out(conversation_id, envelopes).await
    }

    /// Updates registered devices. A device cannot move to another platform.
    pub async fn platform_update_devices(
        &self,
        client_id: &str,
        devices: Vec<IoTDevice>,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        if devices.is_empty() {
            return Err(MiddlewareError::validation("device list must not be empty"));
        }
        let ids = device_ids(&devices);
        Self::ensure_unique_ids(&ids)?;

        let existing = self.registry.get_devices(&ids).await?;
        let missing = Self::missing_ids(&ids, &existing);
        if !missing.is_empty() {
            return Err(MiddlewareError::not_found(format!(
                "devices not registered: {}",
                missing.join(", ")
            )));
        }
        for device in &devices {
            let moved = existing
                .iter()
                .any(|old| old.device_id == device.device_id && old.hosted_by != device.hosted_by);
            if moved {
                return Err(MiddlewareError::validation(format!(
                    "device {} cannot change its hosting platform",
                    device.device_id
                )));
            }
        }

        self.registry.update_devices(devices.clone()).await?;

        let conversation_id = ConversationId::generate();
        let envelopes = partition_by_platform(&devices)
            .into_iter()
            .map(|(platform_id, platform_devices)| {
                requests::update_devices(
                    client_id,
                    &conversation_id,
                    &platform_id,
                    &platform_devices,
                )
            })
            .collect();
        self.fan_out(conversation_id, envelopes).await
    }

    /// Deletes registered devices on their owning platforms.
    pub async fn platform_delete_devices(
        &self,
        client_id: &str,
        device_ids_to_delete: Vec<String>,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        if device_ids_to_delete.is_empty() {
            return Err(MiddlewareError::validation("device list must not be empty"));
        }
        Self::ensure_unique_ids(&device_ids_to_delete)?;

        let devices = self.registry.get_devices(&device_ids_to_delete).await?;
        let missing = Self::missing_ids(&device_ids_to_delete, &devices);
        if !missing.is_empty() {
            return Err(MiddlewareError::validation(format!(
                "devices not registered: {}",
                missing.join(", ")
            )));
        }

        self.registry.remove_devices(&device_ids_to_delete).await?;

        let conversation_id = ConversationId::generate();
        let envelopes = partition_by_platform(&devices)
            .into_iter()
            .map(|(platform_id, platform_devices)| {
                requests::delete_devices(
                    client_id,
                    &conversation_id,
                    &platform_id,
                    &device_ids(&platform_devices),
                )
            })
            .collect();
        self.fan_out(conversation_id, envelopes).await
    }

    pub async fn sync_devices(
        &self,
        client_id: &str,
        platform_id: &str,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        self.ensure_platform(platform_id).await?;
        let conversation_id = ConversationId::generate();
        self.arm
            .process_downstream(requests::sync_devices(
                client_id,
                &conversation_id,
                platform_id,
            ))
            .await
    }

    pub async fn list_devices(
        &self,
        platform_id: Option<&str>,
    ) -> Result<Vec<IoTDevice>, MiddlewareError> {
        self.registry.list_devices(platform_id).await
    }

    // ---- subscriptions -------------------------------------------------------------------

    /// Subscribes the client to observations of `device_ids`. The returned conversation id
    /// is also the subscription id carried by every observation of this subscription.
    pub async fn subscribe(
        &self,
        client_id: &str,
        device_ids_to_watch: Vec<String>,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        if device_ids_to_watch.is_empty() {
            return Err(MiddlewareError::validation("device list must not be empty"));
        }
        Self::ensure_unique_ids(&device_ids_to_watch)?;

        let devices = self.registry.get_devices(&device_ids_to_watch).await?;
        let missing = Self::missing_ids(&device_ids_to_watch, &devices);
        if !missing.is_empty() {
            return Err(MiddlewareError::validation(format!(
                "devices not registered: {}",
                missing.join(", ")
            )));
        }

        let conversation_id = ConversationId::generate();
        self.registry
            .add_subscription(Subscription {
                conversation_id: conversation_id.clone(),
                client_id: client_id.to_string(),
                device_ids: device_ids_to_watch,
            })
            .await?;

        let envelopes = partition_by_platform(&devices)
            .into_iter()
            .map(|(platform_id, platform_devices)| {
                requests::subscribe(
                    client_id,
                    &conversation_id,
                    &platform_id,
                    &device_ids(&platform_devices),
                )
            })
            .collect();

        match self.fan_out(conversation_id.clone(), envelopes).await {
            Err(err) if err.reached_no_platform() => {
                self.registry.delete_subscription(&conversation_id).await?;
                self.arm.close_conversation(&conversation_id).await;
                Err(err)
            }
            other => other,
        }
    }

    /// Ends a subscription. No observation of it is dispatched once this returns.
    pub async fn unsubscribe(
        &self,
        client_id: &str,
        subscription_id: &ConversationId,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let subscription = self
            .registry
            .get_subscription(subscription_id)
            .await?
            .filter(|subscription| subscription.client_id == client_id)
            .ok_or_else(|| {
                MiddlewareError::not_found(format!(
                    "subscription {subscription_id} does not exist for client {client_id}"
                ))
            })?;

        self.registry.delete_subscription(subscription_id).await?;
        self.arm.close_conversation(subscription_id).await;

        let devices = self.registry.get_devices(&subscription.device_ids).await?;
        let conversation_id = ConversationId::generate();
        let envelopes: Vec<Envelope> = partition_by_platform(&devices)
            .into_iter()
            .map(|(platform_id, platform_devices)| {
                requests::unsubscribe(
                    client_id,
                    &conversation_id,
                    subscription_id,
                    &platform_id,
                    &device_ids(&platform_devices),
                )
            })
            .collect();

        if envelopes.is_empty() {
            return Ok(conversation_id);
        }
        self.fan_out(conversation_id, envelopes).await
    }

    pub async fn list_subscriptions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<Subscription>, MiddlewareError> {
        self.registry.list_subscriptions(client_id).await
    }

    /// Relays observations of a source device to a target device on another platform.
    pub async fn subscribe_plat2plat(
        &self,
        client_id: &str,
        input: Plat2PlatSubscribeInput,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let devices = self
            .registry
            .get_devices(&[input.source_device_id.clone(), input.target_device_id.clone()])
            .await?;
        let find = |device_id: &str| devices.iter().find(|device| device.device_id == device_id);

        let source = find(&input.source_device_id).ok_or_else(|| {
            MiddlewareError::validation(format!(
                "source device {} is not registered",
                input.source_device_id
            ))
        })?;
        let target = find(&input.target_device_id).ok_or_else(|| {
            MiddlewareError::validation(format!(
                "target device {} is not registered",
                input.target_device_id
            ))
        })?;

        if let Some(existing) = self
            .registry
            .find_plat2plat_subscription(&input.source_device_id, &input.target_device_id)
            .await?
        {
            return Err(MiddlewareError::conflict(format!(
                "source device is already subscribed to target device (conversation {})",
                existing.conversation_id
            )));
        }

        let subscription = Plat2PlatSubscription {
            conversation_id: ConversationId::generate(),
            client_id: client_id.to_string(),
            source_device_id: source.device_id.clone(),
            source_platform_id: source.hosted_by.clone(),
            target_device_id: target.device_id.clone(),
            target_platform_id: target.hosted_by.clone(),
        };
        self.registry
            .add_plat2plat_subscription(subscription.clone())
            .await?;

        match self
            .arm
            .process_downstream(requests::plat2plat_subscribe(client_id, &subscription))
            .await
        {
            Ok(conversation_id) => Ok(conversation_id),
            Err(err) => {
                self.registry
                    .delete_plat2plat_subscription(&subscription.conversation_id)
                    .await?;
                Err(err)
            }
        }
    }

    pub async fn unsubscribe_plat2plat(
        &self,
        client_id: &str,
        subscription_id: &ConversationId,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let subscription = self
            .registry
            .get_plat2plat_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                MiddlewareError::not_found(format!(
                    "platform-to-platform subscription {subscription_id} does not exist"
                ))
            })?;

        self.registry
            .delete_plat2plat_subscription(subscription_id)
            .await?;

        let conversation_id = ConversationId::generate();
        self.arm
            .process_downstream(requests::plat2plat_unsubscribe(
                client_id,
                &conversation_id,
                &subscription,
            ))
            .await
    }

    pub async fn list_plat2plat_subscriptions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<Plat2PlatSubscription>, MiddlewareError> {
        self.registry.list_plat2plat_subscriptions(client_id).await
    }

    // ---- actuation and raw messages ------------------------------------------------------

    pub async fn actuate(
        &self,
        client_id: &str,
        device_id: &str,
        input: ActuationInput,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let device = self
            .registry
            .get_devices(&[device_id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                MiddlewareError::not_found(format!("device {device_id} does not exist"))
            })?;

        let conversation_id = ConversationId::generate();
        self.arm
            .process_downstream(requests::actuation(
                client_id,
                &conversation_id,
                &device,
                &input,
            ))
            .await
    }

    /// Sends a client-built envelope document as is, stamped with the client id.
    pub async fn send_message(
        &self,
        client_id: &str,
        raw_envelope: &str,
    ) -> Result<ConversationId, MiddlewareError> {
        self.ensure_client(client_id).await?;
        let envelope = Envelope::from_json(raw_envelope)?;

        match envelope.client_id() {
            Some(owner) if owner != client_id => Err(MiddlewareError::validation(format!(
                "envelope belongs to client {owner}, not {client_id}"
            ))),
            _ => {
                self.arm
                    .process_downstream(envelope.with_client_id(client_id))
                    .await
            }
        }
    }

    // ---- synchronous queries -------------------------------------------------------------

    /// Reads current values of sensors on one platform and waits for the answer.
    /// Without `device_ids`, every sensor the registry lists for the platform is queried.
    pub async fn get_sensor_data_for_devices(
        &self,
        client_id: &str,
        platform_id: &str,
        device_ids_to_read: Option<Vec<String>>,
    ) -> Result<Envelope, MiddlewareError> {
        self.ensure_client(client_id).await?;
        self.ensure_platform(platform_id).await?;

        let ids = match device_ids_to_read {
            Some(ids) => {
                let devices = self.registry.get_devices(&ids).await?;
                let missing = Self::missing_ids(&ids, &devices);
                if !missing.is_empty() {
                    return Err(MiddlewareError::validation(format!(
                        "devices not registered: {}",
                        missing.join(", ")
                    )));
                }
                if let Some(foreign) = devices.iter().find(|device| device.hosted_by != platform_id)
                {
                    return Err(MiddlewareError::validation(format!(
                        "device {} is not hosted by platform {platform_id}",
                        foreign.device_id
                    )));
                }
                ids
            }
            None => self
                .registry
                .list_devices(Some(platform_id))
                .await?
                .into_iter()
                .filter(IoTDevice::is_sensor)
                .map(|device| device.device_id)
                .collect(),
        };

        let conversation_id = ConversationId::generate();
        self.query_bridge
            .query(requests::sensor_query(
                client_id,
                &conversation_id,
                platform_id,
                &ids,
            ))
            .await
    }

    pub async fn get_all_sensor_data(
        &self,
        client_id: &str,
        platform_id: &str,
    ) -> Result<Envelope, MiddlewareError> {
        self.get_sensor_data_for_devices(client_id, platform_id, None)
            .await
    }

    /// Sends every envelope of one operation and aggregates per-platform outcomes.
    async fn fan_out(
        &self,
        conversation_id: ConversationId,
        envelopes: Vec<Envelope>,
    ) -> Result<ConversationId, MiddlewareError> {
        let targets = envelopes.len();
        info!(
            event = events::FAN_OUT_START,
            component = COMPONENT,
            conversation_id = conversation_id.as_str(),
            targets,
            "sending operation to platforms"
        );

        let mut delivered = Vec::with_capacity(targets);
        let mut failed = Vec::new();
        for envelope in envelopes {
            let platform_id = fields::format_optional(envelope.receiver_platform_id());
            match self.arm.process_downstream(envelope).await {
                Ok(_) => delivered.push(platform_id),
                Err(error) => failed.push(FailedTarget { platform_id, error }),
            }
        }

        if failed.is_empty() {
            info!(
                event = events::FAN_OUT_OK,
                component = COMPONENT,
                conversation_id = conversation_id.as_str(),
                targets,
                "operation sent to every platform"
            );
            return Ok(conversation_id);
        }

        warn!(
            event = events::FAN_OUT_PARTIAL,
            component = COMPONENT,
            conversation_id = conversation_id.as_str(),
            delivered = delivered.len(),
            failed = failed.len(),
            "operation could not be sent to every platform"
        );

        if targets == 1 {
            if let Some(target) = failed.pop() {
                return Err(target.error);
            }
        }
        Err(MiddlewareError::PartialFanOut {
            conversation_id,
            delivered,
            failed,
        })
    }
}
