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

//! Pull delivery: correlated envelopes wait in the client's queue until retrieved.

use super::{DeliveryCallback, DeliveryQueue};
use crate::envelope::Envelope;
use crate::error::MiddlewareError;
use crate::model::{Client, DeliveryMode};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Maps a caller timeout in milliseconds to a wait bound; negative means wait indefinitely.
pub fn timeout_from_millis(timeout_millis: i64) -> Option<Duration> {
    u64::try_from(timeout_millis).ok().map(Duration::from_millis)
}

pub struct PullCallback {
    client_id: String,
    receiving_capacity: AtomicUsize,
    queue: DeliveryQueue,
}

impl PullCallback {
    pub fn new(client: &Client) -> Self {
        Self {
            client_id: client.client_id.clone(),
            receiving_capacity: AtomicUsize::new(client.capacity()),
            queue: DeliveryQueue::new(),
        }
    }

    pub fn receiving_capacity(&self) -> usize {
        self.receiving_capacity.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl DeliveryCallback for PullCallback {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Pull
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), MiddlewareError> {
        self.queue.push(envelope)
    }

    async fn update(&self, client: &Client) -> Result<(), MiddlewareError> {
        self.receiving_capacity
            .store(client.capacity(), Ordering::Release);
        Ok(())
    }

    async fn take_pending(&self) -> Vec<Envelope> {
        self.queue.close();
        self.queue.drain()
    }

    async fn adopt(&self, earlier: Vec<Envelope>) -> Result<(), MiddlewareError> {
        self.queue.requeue_front(earlier)
    }

    async fn stop(&self) {
        self.queue.close();
        self.queue.drain();
    }

    async fn consume_message(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, MiddlewareError> {
        Ok(self.queue.pop(timeout).await)
    }

    /// Pops at most `min(max, receiving_capacity)` envelopes without waiting.
    async fn consume_messages(&self, max: usize) -> Result<Vec<Envelope>, MiddlewareError> {
        Ok(self.queue.pop_up_to(max.min(self.receiving_capacity())))
    }
}
