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

//! Envelope model exchanged between clients, the middleware and platform bridges.

use crate::error::MiddlewareError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

const CONVERSATION_ID_PREFIX: &str = "conv";
const MESSAGE_ID_PREFIX: &str = "msg";
const JSON_LD_VOCAB: &str = "http://inter-iot.eu/message/";

/// Correlation key shared by every envelope of one logical client operation.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generates a fresh, never reused conversation id.
    pub fn generate() -> Self {
        Self(format!("{CONVERSATION_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Intent/outcome tags carried by an envelope. Tags are not mutually exclusive.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Response,
    Observation,
    Error,
    Query,
    Subscribe,
    Unsubscribe,
    VirtualSubscribe,
    VirtualUnsubscribe,
    PlatformRegister,
    PlatformUpdate,
    PlatformUnregister,
    PlatformCreateDevice,
    PlatformUpdateDevice,
    PlatformDeleteDevice,
    ListDevices,
    ListSupportedPlatformTypes,
    SyncDevices,
    Actuation,
    SysInit,
    #[serde(other)]
    Unrecognized,
}

impl MessageType {
    /// Tags an inbound envelope must carry at least one of to be dispatched to a client.
    pub const UPSTREAM_DELIVERABLE: [MessageType; 3] = [
        MessageType::Response,
        MessageType::Observation,
        MessageType::Error,
    ];
}

/// Serialization flavour negotiated by a client for the envelopes it receives.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseFormat {
    #[default]
    Json,
    JsonLd,
}

impl ResponseFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Json => "application/json",
            ResponseFormat::JsonLd => "application/ld+json; charset=utf-8",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    message_types: BTreeSet<MessageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_platform_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receiver_platform_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscription_id: Option<String>,
    #[serde(default)]
    payload: Value,
}

impl Envelope {
    pub fn new(message_types: impl IntoIterator<Item = MessageType>) -> Self {
        Self {
            message_id: format!("{MESSAGE_ID_PREFIX}{}", Uuid::new_v4()),
            conversation_id: None,
            client_id: None,
            message_types: message_types.into_iter().collect(),
            sender_platform_id: None,
            receiver_platform_id: None,
            subscription_id: None,
            payload: Value::Null,
        }
    }

    /// Builds an upstream envelope answering `request`: same conversation, client and
    /// subscription, sent by the platform the request was addressed to.
    pub fn reply_to(
        request: &Envelope,
        message_types: impl IntoIterator<Item = MessageType>,
    ) -> Self {
        let mut reply = Envelope::new(message_types);
        reply.conversation_id = request.conversation_id.clone();
        reply.client_id = request.client_id.clone();
        reply.subscription_id = request.subscription_id.clone();
        reply.sender_platform_id = request.receiver_platform_id.clone();
        reply
    }

    pub fn with_conversation_id(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_types.insert(message_type);
        self
    }

    pub fn with_sender_platform_id(mut self, platform_id: impl Into<String>) -> Self {
        self.sender_platform_id = Some(platform_id.into());
        self
    }

    pub fn with_receiver_platform_id(mut self, platform_id: impl Into<String>) -> Self {
        self.receiver_platform_id = Some(platform_id.into());
        self
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn message_types(&self) -> &BTreeSet<MessageType> {
        &self.message_types
    }

    pub fn has_type(&self, message_type: MessageType) -> bool {
        self.message_types.contains(&message_type)
    }

    pub fn has_any_type(&self, message_types: &[MessageType]) -> bool {
        message_types
            .iter()
            .any(|message_type| self.message_types.contains(message_type))
    }

    pub fn sender_platform_id(&self) -> Option<&str> {
        self.sender_platform_id.as_deref()
    }

    pub fn receiver_platform_id(&self) -> Option<&str> {
        self.receiver_platform_id.as_deref()
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Assigns a conversation id if none is set yet and returns the effective one.
    pub(crate) fn ensure_conversation_id(&mut self) -> ConversationId {
        self.conversation_id
            .get_or_insert_with(ConversationId::generate)
            .clone()
    }

    /// Routing and correlation metadata without the payload.
    pub fn metadata(&self) -> EnvelopeMetadata {
        EnvelopeMetadata {
            message_id: self.message_id.clone(),
            conversation_id: self.conversation_id.clone(),
            client_id: self.client_id.clone(),
            message_types: self.message_types.clone(),
            sender_platform_id: self.sender_platform_id.clone(),
            receiver_platform_id: self.receiver_platform_id.clone(),
            subscription_id: self.subscription_id.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, MiddlewareError> {
        serde_json::to_string(self)
            .map_err(|e| MiddlewareError::internal(format!("unable to serialize envelope: {e}")))
    }

    pub fn from_json(raw: &str) -> Result<Self, MiddlewareError> {
        serde_json::from_str(raw)
            .map_err(|e| MiddlewareError::validation(format!("invalid envelope document: {e}")))
    }

    /// Renders the envelope in the client's negotiated format.
    pub fn to_value(&self, format: ResponseFormat) -> Result<Value, MiddlewareError> {
        let mut document = serde_json::to_value(self)
            .map_err(|e| MiddlewareError::internal(format!("unable to serialize envelope: {e}")))?;

        if format == ResponseFormat::JsonLd {
            if let Value::Object(fields) = &mut document {
                fields.insert(
                    "@context".to_string(),
                    serde_json::json!({ "@vocab": JSON_LD_VOCAB }),
                );
                let types = fields
                    .get("messageTypes")
                    .cloned()
                    .unwrap_or(Value::Array(Vec::new()));
                fields.insert("@type".to_string(), types);
            }
        }

        Ok(document)
    }
}

/// Copy of an envelope's routing and correlation fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub message_id: String,
    pub conversation_id: Option<ConversationId>,
    pub client_id: Option<String>,
    pub message_types: BTreeSet<MessageType>,
    pub sender_platform_id: Option<String>,
    pub receiver_platform_id: Option<String>,
    pub subscription_id: Option<String>,
}

/// Serializes a push batch: a JSON array holding each envelope in `format`.
pub fn serialize_batch(
    format: ResponseFormat,
    envelopes: &[Envelope],
) -> Result<String, MiddlewareError> {
    let documents = envelopes
        .iter()
        .map(|envelope| envelope.to_value(format))
        .collect::<Result<Vec<Value>, MiddlewareError>>()?;

    serde_json::to_string(&documents)
        .map_err(|e| MiddlewareError::internal(format!("unable to serialize batch: {e}")))
}
