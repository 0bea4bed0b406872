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

//! In-memory [`Registry`] for tests, demos and single-process deployments.
//!
//! State can be seeded from a static JSON file with `clients`, `platforms` and `devices`
//! arrays.

use async_trait::async_trait;
use intermw_comm::{
    Client, ConversationId, IoTDevice, MiddlewareError, Plat2PlatSubscription, Platform,
    Registry, Subscription,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticRegistry {
    #[serde(default)]
    clients: Vec<Client>,
    #[serde(default)]
    platforms: Vec<Platform>,
    #[serde(default)]
    devices: Vec<IoTDevice>,
}

#[derive(Default)]
struct RegistryState {
    clients: BTreeMap<String, Client>,
    platforms: BTreeMap<String, Platform>,
    devices: BTreeMap<String, IoTDevice>,
    subscriptions: BTreeMap<ConversationId, Subscription>,
    plat2plat_subscriptions: BTreeMap<ConversationId, Plat2PlatSubscription>,
}

#[derive(Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads clients, platforms and devices from a JSON file.
    pub fn from_static_file(path: impl AsRef<Path>) -> Result<Self, MiddlewareError> {
        let path = path.as_ref();
        debug!("loading static registry from {}", path.display());

        let data = fs::read_to_string(path).map_err(|e| {
            MiddlewareError::validation(format!(
                "unable to read static registry {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, MiddlewareError> {
        let seed: StaticRegistry = serde_json::from_str(data).map_err(|e| {
            MiddlewareError::validation(format!("invalid static registry document: {e}"))
        })?;

        let mut state = RegistryState::default();
        for client in seed.clients {
            state.clients.insert(client.client_id.clone(), client);
        }
        for platform in seed.platforms {
            state.platforms.insert(platform.platform_id.clone(), platform);
        }
        for device in seed.devices {
            if !state.platforms.contains_key(&device.hosted_by) {
                return Err(MiddlewareError::validation(format!(
                    "device {} is hosted by unknown platform {}",
                    device.device_id, device.hosted_by
                )));
            }
            state.devices.insert(device.device_id.clone(), device);
        }

        debug!(
            "static registry holds {} clients, {} platforms, {} devices",
            state.clients.len(),
            state.platforms.len(),
            state.devices.len()
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }
}

fn matches_client(owner: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |client_id| client_id == owner)
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn client_exists(&self, client_id: &str) -> Result<bool, MiddlewareError> {
        Ok(self.state.read().await.clients.contains_key(client_id))
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, MiddlewareError> {
        Ok(self.state.read().await.clients.get(client_id).cloned())
    }

    async fn list_clients(&self) -> Result<Vec<Client>, MiddlewareError> {
        Ok(self.state.read().await.clients.values().cloned().collect())
    }

    async fn register_client(&self, client: Client) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        if state.clients.contains_key(&client.client_id) {
            return Err(MiddlewareError::conflict(format!(
                "client {} is already registered",
                client.client_id
            )));
        }
        state.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn update_client(&self, client: Client) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        match state.clients.get_mut(&client.client_id) {
            Some(stored) => {
                *stored = client;
                Ok(())
            }
            None => Err(MiddlewareError::not_found(format!(
                "client {} is not registered",
                client.client_id
            ))),
        }
    }

    async fn remove_client(&self, client_id: &str) -> Result<(), MiddlewareError> {
        self.state
            .write()
            .await
            .clients
            .remove(client_id)
            .map(|_| ())
            .ok_or_else(|| {
                MiddlewareError::not_found(format!("client {client_id} is not registered"))
            })
    }

    async fn get_platform(&self, platform_id: &str) -> Result<Option<Platform>, MiddlewareError> {
        Ok(self.state.read().await.platforms.get(platform_id).cloned())
    }

    async fn list_platforms(&self) -> Result<Vec<Platform>, MiddlewareError> {
        Ok(self.state.read().await.platforms.values().cloned().collect())
    }

    async fn register_platform(&self, platform: Platform) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        if state.platforms.contains_key(&platform.platform_id) {
            return Err(MiddlewareError::conflict(format!(
                "platform {} is already registered",
                platform.platform_id
            )));
        }
        state.platforms.insert(platform.platform_id.clone(), platform);
        Ok(())
    }

    async fn update_platform(&self, platform: Platform) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        match state.platforms.get_mut(&platform.platform_id) {
            Some(stored) => {
                *stored = platform;
                Ok(())
            }
            None => Err(MiddlewareError::not_found(format!(
                "platform {} is not registered",
                platform.platform_id
            ))),
        }
    }

    async fn remove_platform(&self, platform_id: &str) -> Result<(), MiddlewareError> {
        self.state
            .write()
            .await
            .platforms
            .remove(platform_id)
            .map(|_| ())
            .ok_or_else(|| {
                MiddlewareError::not_found(format!("platform {platform_id} is not registered"))
            })
    }

    async fn get_devices(&self, device_ids: &[String]) -> Result<Vec<IoTDevice>, MiddlewareError> {
        let state = self.state.read().await;
        Ok(device_ids
            .iter()
            .filter_map(|device_id| state.devices.get(device_id).cloned())
            .collect())
    }

    async fn list_devices(
        &self,
        platform_id: Option<&str>,
    ) -> Result<Vec<IoTDevice>, MiddlewareError> {
        Ok(self
            .state
            .read()
            .await
            .devices
            .values()
            .filter(|device| platform_id.map_or(true, |id| device.hosted_by == id))
            .cloned()
            .collect())
    }

    async fn register_devices(&self, devices: Vec<IoTDevice>) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        if let Some(existing) = devices
            .iter()
            .find(|device| state.devices.contains_key(&device.device_id))
        {
            return Err(MiddlewareError::conflict(format!(
                "device {} is already registered",
                existing.device_id
            )));
        }
        for device in devices {
            state.devices.insert(device.device_id.clone(), device);
        }
        Ok(())
    }

    async fn update_devices(&self, devices: Vec<IoTDevice>) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        if let Some(missing) = devices
            .iter()
            .find(|device| !state.devices.contains_key(&device.device_id))
        {
            return Err(MiddlewareError::not_found(format!(
                "device {} is not registered",
                missing.device_id
            )));
        }
        for device in devices {
            state.devices.insert(device.device_id.clone(), device);
        }
        Ok(())
    }

    async fn remove_devices(&self, device_ids: &[String]) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        for device_id in device_ids {
            state.devices.remove(device_id);
        }
        Ok(())
    }

    async fn add_subscription(&self, subscription: Subscription) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        if state.subscriptions.contains_key(&subscription.conversation_id) {
            return Err(MiddlewareError::conflict(format!(
                "subscription {} already exists",
                subscription.conversation_id
            )));
        }
        state
            .subscriptions
            .insert(subscription.conversation_id.clone(), subscription);
        Ok(())
    }

    async fn get_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Subscription>, MiddlewareError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(conversation_id)
            .cloned())
    }

    async fn list_subscriptions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<Subscription>, MiddlewareError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|subscription| matches_client(&subscription.client_id, client_id))
            .cloned()
            .collect())
    }

    async fn delete_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), MiddlewareError> {
        self.state
            .write()
            .await
            .subscriptions
            .remove(conversation_id)
            .map(|_| ())
            .ok_or_else(|| {
                MiddlewareError::not_found(format!("subscription {conversation_id} does not exist"))
            })
    }

    async fn add_plat2plat_subscription(
        &self,
        subscription: Plat2PlatSubscription,
    ) -> Result<(), MiddlewareError> {
        let mut state = self.state.write().await;
        let duplicate = state.plat2plat_subscriptions.values().any(|existing| {
            existing.source_device_id == subscription.source_device_id
                && existing.target_device_id == subscription.target_device_id
        });
        if duplicate {
            return Err(MiddlewareError::conflict(format!(
                "device {} is already subscribed to device {}",
                subscription.source_device_id, subscription.target_device_id
            )));
        }
        state
            .plat2plat_subscriptions
            .insert(subscription.conversation_id.clone(), subscription);
        Ok(())
    }

    async fn find_plat2plat_subscription(
        &self,
        source_device_id: &str,
        target_device_id: &str,
    ) -> Result<Option<Plat2PlatSubscription>, MiddlewareError> {
        Ok(self
            .state
            .read()
            .await
            .plat2plat_subscriptions
            .values()
            .find(|subscription| {
                subscription.source_device_id == source_device_id
                    && subscription.target_device_id == target_device_id
            })
            .cloned())
    }

    async fn get_plat2plat_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Plat2PlatSubscription>, MiddlewareError> {
        Ok(self
            .state
            .read()
            .await
            .plat2plat_subscriptions
            .get(conversation_id)
            .cloned())
    }

    async fn list_plat2plat_subscriptions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<Plat2PlatSubscription>, MiddlewareError> {
        Ok(self
            .state
            .read()
            .await
            .plat2plat_subscriptions
            .values()
            .filter(|subscription| matches_client(&subscription.client_id, client_id))
            .cloned()
            .collect())
    }

    async fn delete_plat2plat_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), MiddlewareError> {
        self.state
            .write()
            .await
            .plat2plat_subscriptions
            .remove(conversation_id)
            .map(|_| ())
            .ok_or_else(|| {
                MiddlewareError::not_found(format!(
                    "platform-to-platform subscription {conversation_id} does not exist"
                ))
            })
    }
}
