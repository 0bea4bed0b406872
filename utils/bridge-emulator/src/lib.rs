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

//! Emulated platform bridge.
//!
//! A [`BridgeEmulator`] listens on the downstream channels of one platform, keeps a device
//! list for it, answers every request with a `RESPONSE` on the upstream channel and streams
//! `OBSERVATION` envelopes for each active subscription until it is unsubscribed.

use async_trait::async_trait;
use intermw_comm::envelope::MessageType;
use intermw_comm::requests::{self, DEVICES, DEVICE_IDS};
use intermw_comm::{Broker, Channel, Envelope, EnvelopeListener, IoTDevice, MiddlewareError};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_OBSERVATION_INTERVAL: Duration = Duration::from_millis(100);

struct EmulatorState {
    platform_id: String,
    platform_type: String,
    broker: Weak<dyn Broker>,
    observation_interval: Duration,
    devices: Mutex<BTreeMap<String, IoTDevice>>,
    streams: Mutex<HashMap<String, JoinHandle<()>>>,
    received: Mutex<Vec<Envelope>>,
}

impl EmulatorState {
    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn reply(&self, request: &Envelope, message_types: &[MessageType], payload: Value) {
        let Some(broker) = self.broker.upgrade() else {
            return;
        };
        let reply = Envelope::reply_to(request, message_types.iter().copied())
            .with_sender_platform_id(self.platform_id.as_str())
            .with_payload(payload);
        if let Err(err) = broker.publish(&Channel::upstream(), reply).await {
            warn!("{}: unable to publish reply: {err}", self.platform_id);
        }
    }

    fn devices_payload(&self) -> Value {
        let devices: Vec<IoTDevice> = Self::lock(&self.devices).values().cloned().collect();
        json!({ DEVICES: devices })
    }

    fn apply_device_changes(&self, request: &Envelope) {
        let mut devices = Self::lock(&self.devices);
        if request.has_type(MessageType::PlatformDeleteDevice) {
            for device_id in requests::device_ids_of(request) {
                devices.remove(&device_id);
            }
            return;
        }

        let carried: Vec<IoTDevice> = request
            .payload()
            .get(DEVICES)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        for device in carried {
            devices.insert(device.device_id.clone(), device);
        }
    }

    fn start_stream(self: &Arc<Self>, request: &Envelope) {
        let Some(subscription_id) = request.subscription_id().map(str::to_string) else {
            return;
        };
        let device_ids = requests::device_ids_of(request);
        let state = Arc::clone(self);
        let template = request.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(state.observation_interval);
            let mut sequence: u64 = 0;
            loop {
                ticker.tick().await;
                let Some(broker) = state.broker.upgrade() else {
                    return;
                };
                sequence += 1;
                let observation = Envelope::reply_to(&template, [MessageType::Observation])
                    .with_sender_platform_id(state.platform_id.as_str())
                    .with_payload(json!({
                        DEVICE_IDS: device_ids,
                        "sequence": sequence,
                    }));
                if let Err(err) = broker.publish(&Channel::upstream(), observation).await {
                    debug!("{}: observation stream ended: {err}", state.platform_id);
                    return;
                }
            }
        });

        if let Some(previous) = Self::lock(&self.streams).insert(subscription_id, handle) {
            previous.abort();
        }
    }

    fn stop_stream(&self, subscription_id: Option<&str>) {
        if let Some(handle) = subscription_id.and_then(|id| Self::lock(&self.streams).remove(id)) {
            handle.abort();
        }
    }
}

struct EmulatorListener {
    state: Arc<EmulatorState>,
}

#[async_trait]
impl EnvelopeListener for EmulatorListener {
    async fn on_receive(&self, request: Envelope) {
        let state = &self.state;
        if let Some(receiver) = request.receiver_platform_id() {
            if receiver != state.platform_id {
                return;
            }
        }
        debug!(
            "{}: received {}",
            state.platform_id,
            request.message_id()
        );
        EmulatorState::lock(&state.received).push(request.clone());

        if request.has_type(MessageType::Query) {
            let payload = json!({
                DEVICE_IDS: requests::device_ids_of(&request),
                "observations": requests::device_ids_of(&request)
                    .iter()
                    .map(|device_id| json!({ "deviceId": device_id, "value": 21.5 }))
                    .collect::<Vec<_>>(),
            });
            state
                .reply(&request, &[MessageType::Query, MessageType::Response], payload)
                .await;
            return;
        }

        if request.has_any_type(&[MessageType::Unsubscribe, MessageType::VirtualUnsubscribe]) {
            state.stop_stream(request.subscription_id());
        }
        if request.has_any_type(&[
            MessageType::PlatformCreateDevice,
            MessageType::PlatformUpdateDevice,
            MessageType::PlatformDeleteDevice,
        ]) {
            state.apply_device_changes(&request);
        }

        let lists_devices =
            request.has_any_type(&[MessageType::ListDevices, MessageType::SyncDevices]);
        let payload = if lists_devices {
            state.devices_payload()
        } else if request.has_type(MessageType::ListSupportedPlatformTypes) {
            json!({ "platformTypes": [state.platform_type.as_str()] })
        } else {
            Value::Null
        };
        state.reply(&request, &[MessageType::Response], payload).await;

        if request.has_type(MessageType::Subscribe) {
            state.start_stream(&request);
        }
    }
}

/// Emulated bridge for one platform.
pub struct BridgeEmulator {
    state: Arc<EmulatorState>,
    listener: Arc<dyn EnvelopeListener>,
    broker: Arc<dyn Broker>,
}

impl BridgeEmulator {
    pub fn new(platform_id: &str, platform_type: &str, broker: Arc<dyn Broker>) -> Self {
        Self::with_observation_interval(
            platform_id,
            platform_type,
            broker,
            DEFAULT_OBSERVATION_INTERVAL,
        )
    }

    pub fn with_observation_interval(
        platform_id: &str,
        platform_type: &str,
        broker: Arc<dyn Broker>,
        observation_interval: Duration,
    ) -> Self {
        let state = Arc::new(EmulatorState {
            platform_id: platform_id.to_string(),
            platform_type: platform_type.to_string(),
            broker: Arc::downgrade(&broker),
            observation_interval,
            devices: Mutex::new(BTreeMap::new()),
            streams: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
        });
        let listener: Arc<dyn EnvelopeListener> = Arc::new(EmulatorListener {
            state: state.clone(),
        });
        Self {
            state,
            listener,
            broker,
        }
    }

    pub fn platform_id(&self) -> &str {
        &self.state.platform_id
    }

    fn channels(&self) -> [Channel; 2] {
        [
            Channel::downstream_platform(&self.state.platform_id),
            Channel::downstream_broadcast(),
        ]
    }

    /// Starts listening on this platform's channel and on the broadcast channel.
    pub async fn start(&self) -> Result<(), MiddlewareError> {
        for channel in self.channels() {
            self.broker
                .register_listener(&channel, self.listener.clone())
                .await?;
        }
        Ok(())
    }

    /// Stops listening and ends every observation stream.
    pub async fn stop(&self) {
        for channel in self.channels() {
            if let Err(err) = self
                .broker
                .unregister_listener(&channel, self.listener.clone())
                .await
            {
                debug!("{}: {err}", self.state.platform_id);
            }
        }
        for (_, handle) in EmulatorState::lock(&self.state.streams).drain() {
            handle.abort();
        }
    }

    /// Requests received so far, oldest first.
    pub fn received(&self) -> Vec<Envelope> {
        EmulatorState::lock(&self.state.received).clone()
    }

    pub fn active_streams(&self) -> usize {
        EmulatorState::lock(&self.state.streams).len()
    }

    pub fn devices(&self) -> Vec<IoTDevice> {
        EmulatorState::lock(&self.state.devices).values().cloned().collect()
    }
}
