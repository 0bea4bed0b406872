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

#![allow(dead_code)]

use bridge_emulator::BridgeEmulator;
use integration_test_utils::{RecordingListener, RecordingPushSink, PLATFORM_TYPE};
use intermw_comm::{
    Broker, Channel, Client, Envelope, InMemoryBroker, InterMwApi, MiddlewareConfig, Platform,
    Registry,
};
use registry_in_memory::InMemoryRegistry;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const OBSERVATION_INTERVAL: Duration = Duration::from_millis(20);
pub(crate) const SETTLE: Duration = Duration::from_secs(5);

pub(crate) fn fast_config() -> MiddlewareConfig {
    MiddlewareConfig {
        client_receiving_capacity_default: 10,
        query_poll_interval_ms: 20,
        query_response_timeout_ms: 2_000,
        push_flush_interval_ms: 50,
        push_retry_delay_ms: 100,
        push_request_timeout_ms: 1_000,
    }
}

/// Middleware wired to an in-memory broker, an in-memory registry and one emulated bridge
/// per platform.
pub(crate) struct Harness {
    pub(crate) broker: Arc<InMemoryBroker>,
    pub(crate) registry: Arc<InMemoryRegistry>,
    pub(crate) push_sink: RecordingPushSink,
    pub(crate) upstream: RecordingListener,
    pub(crate) bridges: Vec<BridgeEmulator>,
    pub(crate) api: InterMwApi,
}

impl Harness {
    pub(crate) async fn start(platform_ids: &[&str], config: MiddlewareConfig) -> Self {
        let broker = Arc::new(InMemoryBroker::new("harness"));
        Self::start_on(
            broker.clone(),
            broker,
            Arc::new(InMemoryRegistry::new()),
            platform_ids,
            config,
        )
        .await
    }

    /// `api_broker` is what the middleware publishes through. Bridges and recorders sit on
    /// `broker`.
    pub(crate) async fn start_on(
        api_broker: Arc<dyn Broker>,
        broker: Arc<InMemoryBroker>,
        registry: Arc<InMemoryRegistry>,
        platform_ids: &[&str],
        config: MiddlewareConfig,
    ) -> Self {
        let mut bridges = Vec::new();
        for platform_id in platform_ids {
            if registry.get_platform(platform_id).await.unwrap().is_none() {
                registry
                    .register_platform(Platform::new(*platform_id, PLATFORM_TYPE))
                    .await
                    .unwrap();
            }
            let bridge = BridgeEmulator::with_observation_interval(
                platform_id,
                PLATFORM_TYPE,
                broker.clone(),
                OBSERVATION_INTERVAL,
            );
            bridge.start().await.unwrap();
            bridges.push(bridge);
        }

        let push_sink = RecordingPushSink::new();
        let api = InterMwApi::start(
            api_broker,
            registry.clone(),
            Arc::new(push_sink.clone()),
            config,
        )
        .await
        .expect("middleware should start");

        // Registered after the ARM: once it has seen an envelope, the ARM has dispatched it.
        let upstream = RecordingListener::new();
        broker
            .register_listener(&Channel::upstream(), Arc::new(upstream.clone()))
            .await
            .unwrap();

        Self {
            broker,
            registry,
            push_sink,
            upstream,
            bridges,
            api,
        }
    }

    pub(crate) fn bridge(&self, platform_id: &str) -> &BridgeEmulator {
        self.bridges
            .iter()
            .find(|bridge| bridge.platform_id() == platform_id)
            .expect("no bridge for platform")
    }

    pub(crate) async fn register_pull_client(&self, client_id: &str, capacity: usize) -> Client {
        self.api
            .register_client(Client::pull(client_id, capacity))
            .await
            .unwrap()
    }

    /// Waits until `count` upstream envelopes have been dispatched by the ARM.
    pub(crate) async fn dispatched(&self, count: usize) -> Vec<Envelope> {
        let seen = self.upstream.wait_for(count, SETTLE).await;
        assert!(
            seen.len() >= count,
            "expected {count} upstream envelopes, saw {}",
            seen.len()
        );
        seen
    }

    pub(crate) async fn stop(self) {
        self.api.shutdown().await;
        for bridge in &self.bridges {
            bridge.stop().await;
        }
        self.broker.close().await;
    }
}
