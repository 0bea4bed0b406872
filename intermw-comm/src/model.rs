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

//! Registry entities referenced by the middleware: clients, platforms, devices and subscriptions.

use crate::envelope::{ConversationId, ResponseFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How correlated envelopes reach a client.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum DeliveryMode {
    #[default]
    #[serde(rename = "CLIENT_PULL")]
    Pull,
    #[serde(rename = "SERVER_PUSH")]
    Push,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Bounds pull batch size and push batch size. Filled from configuration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiving_capacity: Option<usize>,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub response_delivery: DeliveryMode,
}

impl Client {
    pub fn pull(client_id: impl Into<String>, receiving_capacity: usize) -> Self {
        Self {
            client_id: client_id.into(),
            callback_url: None,
            receiving_capacity: Some(receiving_capacity),
            response_format: ResponseFormat::Json,
            response_delivery: DeliveryMode::Pull,
        }
    }

    pub fn push(
        client_id: impl Into<String>,
        callback_url: impl Into<String>,
        receiving_capacity: usize,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            callback_url: Some(callback_url.into()),
            receiving_capacity: Some(receiving_capacity),
            response_format: ResponseFormat::Json,
            response_delivery: DeliveryMode::Push,
        }
    }

    /// Effective receiving capacity, never below one.
    pub fn capacity(&self) -> usize {
        self.receiving_capacity.unwrap_or(1).max(1)
    }

    /// Returns a copy with every field set in `input` replaced.
    pub fn updated_with(&self, input: &UpdateClientInput) -> Client {
        let mut client = self.clone();
        if let Some(callback_url) = &input.callback_url {
            client.callback_url = Some(callback_url.clone());
        }
        if let Some(receiving_capacity) = input.receiving_capacity {
            client.receiving_capacity = Some(receiving_capacity);
        }
        if let Some(response_format) = input.response_format {
            client.response_format = response_format;
        }
        if let Some(response_delivery) = input.response_delivery {
            client.response_delivery = response_delivery;
        }
        client
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClientInput {
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub receiving_capacity: Option<usize>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub response_delivery: Option<DeliveryMode>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    pub platform_id: String,
    #[serde(rename = "type")]
    pub platform_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Platform {
    pub fn new(platform_id: impl Into<String>, platform_type: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            platform_type: platform_type.into(),
            base_endpoint: None,
            name: None,
            location_id: None,
            client_id: None,
            username: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IoTDeviceType {
    Device,
    Sensor,
    Actuator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoTDevice {
    pub device_id: String,
    /// Id of the platform owning the device.
    pub hosted_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub device_types: BTreeSet<IoTDeviceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub observes: BTreeSet<String>,
}

impl IoTDevice {
    pub fn new(device_id: impl Into<String>, hosted_by: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            hosted_by: hosted_by.into(),
            name: None,
            location: None,
            device_types: BTreeSet::from([IoTDeviceType::Device]),
            hosts: Vec::new(),
            observes: BTreeSet::new(),
        }
    }

    pub fn with_type(mut self, device_type: IoTDeviceType) -> Self {
        self.device_types.insert(device_type);
        self
    }

    pub fn is_sensor(&self) -> bool {
        self.device_types.contains(&IoTDeviceType::Sensor)
    }
}

/// A client subscription to observations of a set of devices. Its id is the conversation id of
/// the subscribe operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub conversation_id: ConversationId,
    pub client_id: String,
    pub device_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plat2PlatSubscription {
    pub conversation_id: ConversationId,
    pub client_id: String,
    pub source_device_id: String,
    pub source_platform_id: String,
    pub target_device_id: String,
    pub target_platform_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plat2PlatSubscribeInput {
    pub source_device_id: String,
    pub target_device_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuationResult {
    pub actuatable_property: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuationInput {
    pub actuator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actuator_local_id: Option<String>,
    #[serde(default)]
    pub actuation_results: Vec<ActuationResult>,
}
