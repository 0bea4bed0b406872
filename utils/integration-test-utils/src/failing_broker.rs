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
use intermw_comm::{Broker, Channel, Envelope, EnvelopeListener, MiddlewareError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Broker wrapper that rejects publishes on selected channels and delegates the rest.
pub struct FailingBroker {
    inner: Arc<dyn Broker>,
    failing_channels: Mutex<HashSet<Channel>>,
}

impl FailingBroker {
    pub fn new(inner: Arc<dyn Broker>) -> Self {
        Self {
            inner,
            failing_channels: Mutex::new(HashSet::new()),
        }
    }

    /// Publishes addressed to `platform_id` fail from now on.
    pub fn fail_platform(&self, platform_id: &str) {
        self.failing_channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(Channel::downstream_platform(platform_id));
    }

    pub fn heal(&self) {
        self.failing_channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn is_failing(&self, channel: &Channel) -> bool {
        self.failing_channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(channel)
    }
}

#[async_trait]
impl Broker for FailingBroker {
    async fn publish(&self, channel: &Channel, envelope: Envelope) -> Result<(), MiddlewareError> {
        if self.is_failing(channel) {
            debug!("failing publish of {} on {channel}", envelope.message_id());
            return Err(MiddlewareError::transport(format!(
                "channel {channel} is unavailable"
            )));
        }
        self.inner.publish(channel, envelope).await
    }

    async fn register_listener(
        &self,
        channel: &Channel,
        listener: Arc<dyn EnvelopeListener>,
    ) -> Result<(), MiddlewareError> {
        self.inner.register_listener(channel, listener).await
    }

    async fn unregister_listener(
        &self,
        channel: &Channel,
        listener: Arc<dyn EnvelopeListener>,
    ) -> Result<(), MiddlewareError> {
        self.inner.unregister_listener(channel, listener).await
    }

    async fn send_to_queue(&self, queue: &str, envelope: Envelope) -> Result<(), MiddlewareError> {
        self.inner.send_to_queue(queue, envelope).await
    }

    async fn receive_from_queue(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, MiddlewareError> {
        self.inner.receive_from_queue(queue, timeout).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
