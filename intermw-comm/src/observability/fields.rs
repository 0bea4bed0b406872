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

//! Canonical structured field keys and value-format helpers.

use crate::envelope::{Envelope, MessageType};

pub const EVENT: &str = "event";
pub const COMPONENT: &str = "component";
pub const WORKER_ID: &str = "worker_id";

pub const MSG_ID: &str = "msg_id";
pub const MSG_TYPES: &str = "msg_types";
pub const CLIENT_ID: &str = "client_id";
pub const CONVERSATION_ID: &str = "conversation_id";
pub const SENDER: &str = "sender";
pub const RECEIVER: &str = "receiver";
pub const CHANNEL: &str = "channel";

pub const BATCH_SIZE: &str = "batch_size";
pub const REASON: &str = "reason";
pub const ERR: &str = "err";

pub const NONE: &str = "none";
pub const REASON_NOT_UPSTREAM: &str = "not_upstream_message";
pub const REASON_UNCORRELATED: &str = "uncorrelated_conversation";
pub const REASON_NO_CALLBACK: &str = "no_callback_for_client";
pub const REASON_CHANNEL_CLOSED: &str = "channel_closed";

/// Envelope fields formatted once per log site.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormattedEnvelopeFields {
    pub msg_id: String,
    pub msg_types: String,
    pub client_id: String,
    pub conversation_id: String,
    pub sender: String,
    pub receiver: String,
}

impl FormattedEnvelopeFields {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            msg_id: envelope.message_id().to_string(),
            msg_types: format_message_types(envelope),
            client_id: format_optional(envelope.client_id()),
            conversation_id: format_optional(envelope.conversation_id().map(|id| id.as_str())),
            sender: format_optional(envelope.sender_platform_id()),
            receiver: format_optional(envelope.receiver_platform_id()),
        }
    }
}

pub fn format_optional(value: Option<&str>) -> String {
    value.unwrap_or(NONE).to_string()
}

pub fn format_message_types(envelope: &Envelope) -> String {
    if envelope.message_types().is_empty() {
        return NONE.to_string();
    }

    envelope
        .message_types()
        .iter()
        .map(format_message_type)
        .collect::<Vec<_>>()
        .join(",")
}

fn format_message_type(message_type: &MessageType) -> String {
    serde_json::to_value(message_type)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{message_type:?}"))
}

#[cfg(test)]
mod tests {
    use super::{format_message_types, FormattedEnvelopeFields, NONE};
    use crate::envelope::{ConversationId, Envelope, MessageType};

    #[test]
    fn message_types_are_rendered_with_wire_names() {
        let envelope = Envelope::new([MessageType::Response, MessageType::PlatformCreateDevice]);

        assert_eq!(
            format_message_types(&envelope),
            "RESPONSE,PLATFORM_CREATE_DEVICE"
        );
    }

    #[test]
    fn absent_fields_fall_back_to_none() {
        let envelope = Envelope::new([]).with_conversation_id(ConversationId::from("conv-7"));

        let fields = FormattedEnvelopeFields::from_envelope(&envelope);

        assert_eq!(fields.conversation_id, "conv-7");
        assert_eq!(fields.client_id, NONE);
        assert_eq!(fields.msg_types, NONE);
    }
}
