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

//! Builders for the downstream envelope of every middleware operation.
//!
//! Payloads are plain JSON documents; platform bridges read them through the key constants
//! below and [`device_ids_of`].

use crate::envelope::{ConversationId, Envelope, MessageType};
use crate::model::{ActuationInput, IoTDevice, Plat2PlatSubscription, Platform};
use serde_json::{json, Value};

pub const DEVICE_IDS: &str = "deviceIds";
pub const DEVICES: &str = "devices";
pub const PLATFORM: &str = "platform";
pub const SUBSCRIPTION: &str = "subscription";
pub const ACTUATION: &str = "actuation";

fn addressed(
    message_types: &[MessageType],
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
) -> Envelope {
    Envelope::new(message_types.iter().copied())
        .with_client_id(client_id)
        .with_conversation_id(conversation_id.clone())
        .with_receiver_platform_id(platform_id)
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub fn platform_register(
    client_id: &str,
    conversation_id: &ConversationId,
    platform: &Platform,
) -> Envelope {
    addressed(
        &[MessageType::PlatformRegister],
        client_id,
        conversation_id,
        &platform.platform_id,
    )
    .with_payload(json!({ PLATFORM: to_value(platform) }))
}

pub fn platform_update(
    client_id: &str,
    conversation_id: &ConversationId,
    platform: &Platform,
) -> Envelope {
    addressed(
        &[MessageType::PlatformUpdate],
        client_id,
        conversation_id,
        &platform.platform_id,
    )
    .with_payload(json!({ PLATFORM: to_value(platform) }))
}

pub fn platform_unregister(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
) -> Envelope {
    addressed(
        &[MessageType::PlatformUnregister],
        client_id,
        conversation_id,
        platform_id,
    )
}

pub fn list_devices(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
) -> Envelope {
    addressed(&[MessageType::ListDevices], client_id, conversation_id, platform_id)
}

pub fn sync_devices(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
) -> Envelope {
    addressed(&[MessageType::SyncDevices], client_id, conversation_id, platform_id)
}

/// Broadcast to every bridge; no receiver platform.
pub fn list_supported_platform_types(
    client_id: &str,
    conversation_id: &ConversationId,
) -> Envelope {
    Envelope::new([MessageType::ListSupportedPlatformTypes])
        .with_client_id(client_id)
        .with_conversation_id(conversation_id.clone())
}

pub fn create_devices(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
    devices: &[IoTDevice],
) -> Envelope {
    addressed(
        &[MessageType::PlatformCreateDevice],
        client_id,
        conversation_id,
        platform_id,
    )
    .with_payload(json!({ DEVICES: to_value(&devices) }))
}

pub fn update_devices(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
    devices: &[IoTDevice],
) -> Envelope {
    addressed(
        &[MessageType::PlatformUpdateDevice],
        client_id,
        conversation_id,
        platform_id,
    )
    .with_payload(json!({ DEVICES: to_value(&devices) }))
}

pub fn delete_devices(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
    device_ids: &[String],
) -> Envelope {
    addressed(
        &[MessageType::PlatformDeleteDevice],
        client_id,
        conversation_id,
        platform_id,
    )
    .with_payload(json!({ DEVICE_IDS: device_ids }))
}

/// Subscription envelope; the subscription id is the subscribe conversation id.
pub fn subscribe(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
    device_ids: &[String],
) -> Envelope {
    addressed(&[MessageType::Subscribe], client_id, conversation_id, platform_id)
        .with_subscription_id(conversation_id.as_str())
        .with_payload(json!({ DEVICE_IDS: device_ids }))
}

pub fn unsubscribe(
    client_id: &str,
    conversation_id: &ConversationId,
    subscription_id: &ConversationId,
    platform_id: &str,
    device_ids: &[String],
) -> Envelope {
    addressed(&[MessageType::Unsubscribe], client_id, conversation_id, platform_id)
        .with_subscription_id(subscription_id.as_str())
        .with_payload(json!({ DEVICE_IDS: device_ids }))
}

/// Addressed to the source platform, which relays observations to the target platform.
pub fn plat2plat_subscribe(client_id: &str, subscription: &Plat2PlatSubscription) -> Envelope {
    addressed(
        &[MessageType::VirtualSubscribe],
        client_id,
        &subscription.conversation_id,
        &subscription.source_platform_id,
    )
    .with_subscription_id(subscription.conversation_id.as_str())
    .with_payload(json!({ SUBSCRIPTION: to_value(subscription) }))
}

pub fn plat2plat_unsubscribe(
    client_id: &str,
    conversation_id: &ConversationId,
    subscription: &Plat2PlatSubscription,
) -> Envelope {
    addressed(
        &[MessageType::VirtualUnsubscribe],
        client_id,
        conversation_id,
        &subscription.source_platform_id,
    )
    .with_subscription_id(subscription.conversation_id.as_str())
    .with_payload(json!({ SUBSCRIPTION: to_value(subscription) }))
}

pub fn actuation(
    client_id: &str,
    conversation_id: &ConversationId,
    device: &IoTDevice,
    input: &ActuationInput,
) -> Envelope {
    addressed(
        &[MessageType::Actuation],
        client_id,
        conversation_id,
        &device.hosted_by,
    )
    .with_payload(json!({
        DEVICE_IDS: [device.device_id.clone()],
        ACTUATION: to_value(input),
    }))
}

pub fn sensor_query(
    client_id: &str,
    conversation_id: &ConversationId,
    platform_id: &str,
    device_ids: &[String],
) -> Envelope {
    addressed(&[MessageType::Query], client_id, conversation_id, platform_id)
        .with_payload(json!({ DEVICE_IDS: device_ids }))
}

/// Device ids named by a payload, from either `deviceIds` or the ids inside `devices`.
pub fn device_ids_of(envelope: &Envelope) -> Vec<String> {
    let payload = envelope.payload();

    if let Some(ids) = payload.get(DEVICE_IDS).and_then(Value::as_array) {
        return ids
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect();
    }

    payload
        .get(DEVICES)
        .and_then(Value::as_array)
        .map(|devices| {
            devices
                .iter()
                .filter_map(|device| device.get("deviceId").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{create_devices, device_ids_of, subscribe, unsubscribe};
    use crate::envelope::{ConversationId, MessageType};
    use crate::model::IoTDevice;

    #[test]
    fn subscribe_uses_conversation_as_subscription_id() {
        let conversation = ConversationId::from("conv-s");

        let envelope = subscribe("app", &conversation, "p1", &["d1".to_string()]);

        assert_eq!(envelope.subscription_id(), Some("conv-s"));
        assert_eq!(envelope.receiver_platform_id(), Some("p1"));
        assert!(envelope.has_type(MessageType::Subscribe));
        assert_eq!(device_ids_of(&envelope), vec!["d1".to_string()]);
    }

    #[test]
    fn unsubscribe_keeps_fresh_conversation_and_names_subscription() {
        let envelope = unsubscribe(
            "app",
            &ConversationId::from("conv-u"),
            &ConversationId::from("conv-s"),
            "p1",
            &[],
        );

        assert_eq!(envelope.conversation_id().map(|id| id.as_str()), Some("conv-u"));
        assert_eq!(envelope.subscription_id(), Some("conv-s"));
    }

    #[test]
    fn device_ids_are_read_from_device_documents() {
        let devices = vec![IoTDevice::new("d1", "p1"), IoTDevice::new("d2", "p1")];

        let envelope = create_devices("app", &ConversationId::from("c"), "p1", &devices);

        assert_eq!(device_ids_of(&envelope), vec!["d1".to_string(), "d2".to_string()]);
    }
}
