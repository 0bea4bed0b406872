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

//! The client id to delivery callback table consulted by inbound dispatch.

use crate::delivery::DeliveryCallback;
use crate::observability::events;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const COMPONENT: &str = "callback_registry";

/// Holds at most one active callback per client id.
///
/// Lookups see either the old or the new callback for a client, never an intermediate state.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    callbacks: RwLock<HashMap<String, Arc<dyn DeliveryCallback>>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs `callback`, returning the one it replaced.
    pub(crate) async fn install(
        &self,
        client_id: &str,
        callback: Arc<dyn DeliveryCallback>,
    ) -> Option<Arc<dyn DeliveryCallback>> {
        self.callbacks
            .write()
            .await
            .insert(client_id.to_string(), callback)
    }

    /// Installs `callback`, then moves the replaced callback's undelivered envelopes into it.
    ///
    /// Only the swap happens under the write lock. Draining the replaced callback may wait for
    /// an in-flight push, which must not hold up lookups for other clients. Transferred
    /// envelopes are placed ahead of anything dispatched to `callback` meanwhile.
    pub(crate) async fn install_transferring(
        &self,
        client_id: &str,
        callback: Arc<dyn DeliveryCallback>,
    ) -> Option<Arc<dyn DeliveryCallback>> {
        let previous = self
            .callbacks
            .write()
            .await
            .insert(client_id.to_string(), callback.clone())?;

        let pending = previous.take_pending().await;
        debug!(
            event = events::CALLBACK_TRANSFER,
            component = COMPONENT,
            client_id,
            transferred = pending.len(),
            "moving undelivered envelopes to the new callback"
        );
        if let Err(err) = callback.adopt(pending).await {
            warn!(
                event = events::CALLBACK_TRANSFER,
                component = COMPONENT,
                client_id,
                err = %err,
                "new callback rejected transferred envelopes"
            );
        }

        Some(previous)
    }

    pub(crate) async fn remove(&self, client_id: &str) -> Option<Arc<dyn DeliveryCallback>> {
        self.callbacks.write().await.remove(client_id)
    }

    pub(crate) async fn get(&self, client_id: &str) -> Option<Arc<dyn DeliveryCallback>> {
        self.callbacks.read().await.get(client_id).cloned()
    }

    /// Removes and returns every callback.
    pub(crate) async fn clear(&self) -> Vec<Arc<dyn DeliveryCallback>> {
        self.callbacks
            .write()
            .await
            .drain()
            .map(|(_, callback)| callback)
            .collect()
    }

    pub(crate) async fn len(&self) -> usize {
        self.callbacks.read().await.len()
    }
}
