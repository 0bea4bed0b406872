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

use async_trait::async_trait;
use intermw_comm::{Envelope, EnvelopeListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Listener that keeps every envelope it receives.
#[derive(Clone, Default)]
pub struct RecordingListener {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
    arrived: Arc<Notify>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().await.clone()
    }

    /// Waits until at least `count` envelopes arrived or `timeout` elapsed; returns what arrived.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Envelope> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let arrived = self.arrived.notified();
                if self.envelopes.lock().await.len() >= count {
                    return;
                }
                arrived.await;
            }
        })
        .await;
        self.envelopes().await
    }
}

#[async_trait]
impl EnvelopeListener for RecordingListener {
    async fn on_receive(&self, envelope: Envelope) {
        debug!("recording listener received {}", envelope.message_id());
        self.envelopes.lock().await.push(envelope);
        self.arrived.notify_waiters();
    }
}
