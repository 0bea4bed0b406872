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

//! Registry collaborator: lookup and mutation of clients, platforms, devices and subscriptions.
//!
//! The middleware consults the registry to validate requests and to resolve which platforms
//! own the devices an operation targets. Implementations live outside this crate.

use crate::envelope::ConversationId;
use crate::error::MiddlewareError;
use crate::model::{Client, IoTDevice, Plat2PlatSubscription, Platform, Subscription};
use async_trait::async_trait;

#[async_trait]
pub trait Registry: Send + Sync {
    async fn client_exists(&self, client_id: &str) -> Result<bool, MiddlewareError>;
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, MiddlewareError>;
    async fn list_clients(&self) -> Result<Vec<Client>, MiddlewareError>;
    async fn register_client(&self, client: Client) -> Result<(), MiddlewareError>;
    async fn update_client(&self, client: Client) -> Result<(), MiddlewareError>;
    async fn remove_client(&self, client_id: &str) -> Result<(), MiddlewareError>;

    async fn get_platform(&self, platform_id: &str) -> Result<Option<Platform>, MiddlewareError>;
    async fn list_platforms(&self) -> Result<Vec<Platform>, MiddlewareError>;
    async fn register_platform(&self, platform: Platform) -> Result<(), MiddlewareError>;
    async fn update_platform(&self, platform: Platform) -> Result<(), MiddlewareError>;
    async fn remove_platform(&self, platform_id: &str) -> Result<(), MiddlewareError>;

    /// Returns the registered subset of `device_ids`; unknown ids are skipped.
    async fn get_devices(&self, device_ids: &[String]) -> Result<Vec<IoTDevice>, MiddlewareError>;
    /// Lists devices, optionally only those hosted by `platform_id`.
    async fn list_devices(
        &self,
        platform_id: Option<&str>,
    ) -> Result<Vec<IoTDevice>, MiddlewareError>;
    async fn register_devices(&self, devices: Vec<IoTDevice>) -> Result<(), MiddlewareError>;
    async fn update_devices(&self, devices: Vec<IoTDevice>) -> Result<(), MiddlewareError>;
    async fn remove_devices(&self, device_ids: &[String]) -> Result<(), MiddlewareError>;

    async fn add_subscription(&self, subscription: Subscription) -> Result<(), MiddlewareError>;
    async fn get_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Subscription>, MiddlewareError>;
    async fn list_subscriptions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<Subscription>, MiddlewareError>;
    async fn delete_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), MiddlewareError>;

    async fn add_plat2plat_subscription(
        &self,
        subscription: Plat2PlatSubscription,
    ) -> Result<(), MiddlewareError>;
    async fn find_plat2plat_subscription(
        &self,
        source_device_id: &str,
        target_device_id: &str,
    ) -> Result<Option<Plat2PlatSubscription>, MiddlewareError>;
    async fn get_plat2plat_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Plat2PlatSubscription>, MiddlewareError>;
    async fn list_plat2plat_subscriptions(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<Plat2PlatSubscription>, MiddlewareError>;
    async fn delete_plat2plat_subscription(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), MiddlewareError>;
}
