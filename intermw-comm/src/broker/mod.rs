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

//! Transport abstraction between the middleware and platform bridges.
//!
//! A [`Broker`] offers publish/subscribe on named [`Channel`]s plus point-to-point queues.
//! Backends are swappable; the middleware only talks to `Arc<dyn Broker>`.

mod in_memory;
mod listener_identity;

pub use in_memory::InMemoryBroker;
pub(crate) use listener_identity::ListenerIdentityKey;

use crate::envelope::Envelope;
use crate::error::MiddlewareError;
use crate::observability::events;
use async_trait::async_trait;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DOWNSTREAM_CHANNEL: &str = "arm_prm";
const UPSTREAM_CHANNEL: &str = "prm_arm";
const COMPONENT: &str = "broker";

/// Named publish/subscribe destination.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Channel(String);

impl Channel {
    /// Middleware to every platform bridge.
    pub fn downstream_broadcast() -> Self {
        Self(DOWNSTREAM_CHANNEL.to_string())
    }

    /// Middleware to the bridge of one platform.
    pub fn downstream_platform(platform_id: &str) -> Self {
        Self(format!("{DOWNSTREAM_CHANNEL}_{}", sanitize_platform_id(platform_id)))
    }

    /// Platform bridges to the middleware.
    pub fn upstream() -> Self {
        Self(UPSTREAM_CHANNEL.to_string())
    }

    /// Downstream channel for an envelope: its receiver platform, or broadcast when unset.
    pub fn downstream_for(envelope: &Envelope) -> Self {
        envelope
            .receiver_platform_id()
            .map(Self::downstream_platform)
            .unwrap_or_else(Self::downstream_broadcast)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replaces every run of `:`, `/` and `#` with a single `_`.
pub fn sanitize_platform_id(platform_id: &str) -> String {
    let mut sanitized = String::with_capacity(platform_id.len());
    let mut in_run = false;

    for ch in platform_id.chars() {
        if matches!(ch, ':' | '/' | '#') {
            if !in_run {
                sanitized.push('_');
                in_run = true;
            }
        } else {
            sanitized.push(ch);
            in_run = false;
        }
    }

    sanitized
}

/// Receiver of envelopes published on a channel.
#[async_trait]
pub trait EnvelopeListener: Send + Sync {
    async fn on_receive(&self, envelope: Envelope);

    async fn on_error(&self, error: MiddlewareError) {
        warn!(
            event = events::BROKER_LISTENER_ERROR,
            component = COMPONENT,
            err = %error,
            "listener reported a transport error"
        );
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &Channel, envelope: Envelope) -> Result<(), MiddlewareError>;

    async fn register_listener(
        &self,
        channel: &Channel,
        listener: Arc<dyn EnvelopeListener>,
    ) -> Result<(), MiddlewareError>;

    /// Removes a listener previously registered with the same `Arc`.
    async fn unregister_listener(
        &self,
        channel: &Channel,
        listener: Arc<dyn EnvelopeListener>,
    ) -> Result<(), MiddlewareError>;

    async fn send_to_queue(&self, queue: &str, envelope: Envelope) -> Result<(), MiddlewareError>;

    /// Takes the oldest envelope of a queue, waiting up to `timeout` (`None` waits indefinitely).
    async fn receive_from_queue(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, MiddlewareError>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::{sanitize_platform_id, Channel};
    use crate::envelope::{Envelope, MessageType};

    #[test]
    fn platform_ids_are_sanitized_into_channel_names() {
        assert_eq!(
            sanitize_platform_id("http://inter-iot.eu/platforms#example"),
            "http_inter-iot.eu_platforms_example"
        );
        assert_eq!(
            Channel::downstream_platform("urn:platform:a").as_str(),
            "arm_prm_urn_platform_a"
        );
    }

    #[test]
    fn downstream_channel_follows_receiver() {
        let broadcast = Envelope::new([MessageType::ListSupportedPlatformTypes]);
        let addressed = Envelope::new([MessageType::SyncDevices]).with_receiver_platform_id("p1");

        assert_eq!(Channel::downstream_for(&broadcast), Channel::downstream_broadcast());
        assert_eq!(Channel::downstream_for(&addressed).as_str(), "arm_prm_p1");
        assert_eq!(Channel::upstream().as_str(), "prm_arm");
    }
}
