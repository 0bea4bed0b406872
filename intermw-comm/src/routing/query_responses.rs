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

//! Buffer of QUERY answers awaiting pickup by the synchronous query bridge.

use crate::envelope::{ConversationId, Envelope};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

#[derive(Default)]
struct StoreState {
    awaiting: HashSet<ConversationId>,
    responses: HashMap<ConversationId, VecDeque<Envelope>>,
}

/// Answers are accepted only for queries still awaited. Acceptance and abandonment share one
/// lock, so an answer racing a timeout is either picked up or never stored.
#[derive(Default)]
pub(crate) struct QueryResponseStore {
    state: Mutex<StoreState>,
}

impl QueryResponseStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks `conversation_id` as a query whose answer should be kept.
    pub(crate) async fn expect(&self, conversation_id: &ConversationId) {
        self.state
            .lock()
            .await
            .awaiting
            .insert(conversation_id.clone());
    }

    /// Stores the answer to an awaited query. The first answer ends the wait; anything else is
    /// handed back unstored.
    pub(crate) async fn store(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(conversation_id) = envelope.conversation_id().cloned() else {
            return Err(envelope);
        };
        let mut state = self.state.lock().await;
        if !state.awaiting.remove(&conversation_id) {
            return Err(envelope);
        }
        state
            .responses
            .entry(conversation_id)
            .or_default()
            .push_back(envelope);
        Ok(())
    }

    /// Removes and returns the oldest answer for `conversation_id`, if one arrived.
    pub(crate) async fn take(&self, conversation_id: &ConversationId) -> Option<Envelope> {
        let mut state = self.state.lock().await;
        let queue = state.responses.get_mut(conversation_id)?;
        let envelope = queue.pop_front();
        if queue.is_empty() {
            state.responses.remove(conversation_id);
        }
        envelope
    }

    /// Stops awaiting `conversation_id` and drops every answer stored for it.
    pub(crate) async fn discard(&self, conversation_id: &ConversationId) -> usize {
        let mut state = self.state.lock().await;
        state.awaiting.remove(conversation_id);
        state
            .responses
            .remove(conversation_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
