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

//! Conversation to client correlation for inbound envelopes.

use crate::envelope::{ConversationId, Envelope, MessageType};
use crate::observability::events;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

const COMPONENT: &str = "conversation_table";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConversationKind {
    /// Closes once every downstream envelope sent under it got a RESPONSE or ERROR.
    Request,
    /// Stays open until explicitly closed by an unsubscribe or client removal.
    Subscription,
}

impl ConversationKind {
    pub(crate) fn for_downstream(envelope: &Envelope) -> Self {
        if envelope.has_any_type(&[MessageType::Subscribe, MessageType::VirtualSubscribe]) {
            ConversationKind::Subscription
        } else {
            ConversationKind::Request
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct ConversationEntry {
    client_id: String,
    kind: ConversationKind,
    outstanding: usize,
}

/// Correlation outcome for one inbound envelope.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Correlation {
    Client(String),
    Uncorrelated,
}

#[derive(Default)]
pub(crate) struct ConversationTable {
    entries: Mutex<HashMap<ConversationId, ConversationEntry>>,
}

impl ConversationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records one downstream envelope sent for `client_id` under `conversation_id`.
    pub(crate) async fn open(
        &self,
        conversation_id: &ConversationId,
        client_id: &str,
        kind: ConversationKind,
    ) {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(conversation_id.clone())
            .or_insert_with(|| ConversationEntry {
                client_id: client_id.to_string(),
                kind,
                outstanding: 0,
            });

        if kind == ConversationKind::Subscription {
            entry.kind = ConversationKind::Subscription;
        }
        entry.outstanding += 1;

        debug!(
            event = events::CONVERSATION_OPEN,
            component = COMPONENT,
            conversation_id = conversation_id.as_str(),
            client_id,
            kind = ?entry.kind,
            outstanding = entry.outstanding,
            "conversation opened"
        );
    }

    /// Undoes one [`open`](Self::open) whose envelope never left the middleware.
    pub(crate) async fn cancel_one(&self, conversation_id: &ConversationId) {
        let mut entries = self.entries.lock().await;
        let now_empty = match entries.get_mut(conversation_id) {
            Some(entry) => {
                entry.outstanding = entry.outstanding.saturating_sub(1);
                entry.outstanding == 0
            }
            None => false,
        };
        if now_empty {
            entries.remove(conversation_id);
        }
    }

    /// Resolves the client an inbound envelope belongs to and retires finished requests.
    ///
    /// Unknown conversations fall back to the envelope's own client id, except for
    /// observations: an observation is only delivered while its subscription is open.
    pub(crate) async fn correlate(&self, envelope: &Envelope) -> Correlation {
        if let Some(conversation_id) = envelope.conversation_id() {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(conversation_id) {
                let client_id = entry.client_id.clone();
                let answered = entry.kind == ConversationKind::Request
                    && envelope.has_any_type(&[MessageType::Response, MessageType::Error]);

                if answered {
                    entry.outstanding = entry.outstanding.saturating_sub(1);
                    if entry.outstanding == 0 {
                        entries.remove(conversation_id);
                        debug!(
                            event = events::CONVERSATION_CLOSE,
                            component = COMPONENT,
                            conversation_id = conversation_id.as_str(),
                            client_id = client_id.as_str(),
                            reason = "all_responses_received",
                            "conversation closed"
                        );
                    }
                }
                return Correlation::Client(client_id);
            }
        }

        if envelope.has_type(MessageType::Observation) {
            return Correlation::Uncorrelated;
        }

        envelope
            .client_id()
            .map(|client_id| Correlation::Client(client_id.to_string()))
            .unwrap_or(Correlation::Uncorrelated)
    }

    /// Closes a conversation regardless of its kind. Returns whether it was open.
    pub(crate) async fn close(&self, conversation_id: &ConversationId) -> bool {
        let removed = self.entries.lock().await.remove(conversation_id);
        if let Some(entry) = removed.as_ref() {
            debug!(
                event = events::CONVERSATION_CLOSE,
                component = COMPONENT,
                conversation_id = conversation_id.as_str(),
                client_id = entry.client_id.as_str(),
                reason = "closed",
                "conversation closed"
            );
        }
        removed.is_some()
    }

    /// Closes every conversation owned by `client_id` and returns how many were open.
    pub(crate) async fn close_client(&self, client_id: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.client_id != client_id);
        before - entries.len()
    }

    pub(crate) async fn is_open(&self, conversation_id: &ConversationId) -> bool {
        self.entries.lock().await.contains_key(conversation_id)
    }
}
