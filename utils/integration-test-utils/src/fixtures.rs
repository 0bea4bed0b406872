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

use intermw_comm::{IoTDevice, IoTDeviceType, Platform};

pub const PLATFORM_A: &str = "http://test.inter-iot.eu/platform-a";
pub const PLATFORM_B: &str = "http://test.inter-iot.eu/platform-b";
pub const PLATFORM_TYPE: &str = "http://inter-iot.eu/TestPlatform";

pub fn platform_a() -> Platform {
    Platform::new(PLATFORM_A, PLATFORM_TYPE)
}

pub fn platform_b() -> Platform {
    Platform::new(PLATFORM_B, PLATFORM_TYPE)
}

pub fn sensor(device_id: &str, platform_id: &str) -> IoTDevice {
    IoTDevice::new(device_id, platform_id).with_type(IoTDeviceType::Sensor)
}

/// `count` sensors on one platform, with ids prefixed by `prefix`.
pub fn sensors_on(platform_id: &str, prefix: &str, count: usize) -> Vec<IoTDevice> {
    (0..count)
        .map(|index| sensor(&format!("{prefix}-{index}"), platform_id))
        .collect()
}

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
