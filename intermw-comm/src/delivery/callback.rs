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

//! Delivery callback contract shared by the pull and push variants.

use super::{PullCallback, PushCallback, PushSink};
use crate::config::MiddlewareConfig;
use crate::envelope::Envelope;
use crate::error::MiddlewareError;
use crate::model::{Client, DeliveryMode};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Owns the delivery side effect for exactly one client.
#[async_trait]
pub trait DeliveryCallback: Send + Sync {
    fn client_id(&self) -> &str;

    fn delivery_mode(&self) -> DeliveryMode;

    /// Accepts a correlated envelope. Must return quickly; it runs on the dispatch path.
    async fn handle(&self, envelope: Envelope) -> Result<(), MiddlewareError>;

    /// Applies the client's current capacity, URL and format without losing buffered envelopes.
    async fn update(&self, client: &Client) -> Result<(), MiddlewareError>;

    /// Stops delivering and hands back every envelope not yet delivered, oldest first.
    async fn take_pending(&self) -> Vec<Envelope>;

    /// Takes over envelopes a replaced callback never delivered. They go ahead of anything
    /// this callback received since it was installed.
    async fn adopt(&self, earlier: Vec<Envelope>) -> Result<(), MiddlewareError>;

    /// Releases the callback's resources. Push callbacks attempt a final flush first.
    async fn stop(&self);

    async fn consume_message(
        &self,
        _timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, MiddlewareError> {
        Err(pull_only(self.client_id()))
    }

    async fn consume_messages(&self, _max: usize) -> Result<Vec<Envelope>, MiddlewareError> {
        Err(pull_only(self.client_id()))
    }
}

fn pull_only(client_id: &str) -> MiddlewareError {
    MiddlewareError::validation(format!(
        "client {client_id} receives messages by push; pull retrieval is not available"
    ))
}

/// Builds the callback variant matching the client's delivery mode.
pub fn build_callback(
    client: &Client,
    sink: Arc<dyn PushSink>,
    config: &MiddlewareConfig,
) -> Result<Arc<dyn DeliveryCallback>, MiddlewareError> {
    match client.response_delivery {
        DeliveryMode::Pull => Ok(Arc::new(PullCallback::new(client))),
        DeliveryMode::Push => Ok(Arc::new(PushCallback::start(
            client,
            sink,
            config.push_flush_interval(),
            config.push_retry_delay(),
        )?)),
    }
}
