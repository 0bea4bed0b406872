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

mod failing_broker;
pub use failing_broker::FailingBroker;
mod recording_listener;
pub use recording_listener::RecordingListener;
mod recording_push_sink;
pub use recording_push_sink::{RecordedPost, RecordingPushSink};
mod fixtures;

pub use fixtures::{
    init_logging, platform_a, platform_b, sensor, sensors_on, PLATFORM_A, PLATFORM_B,
    PLATFORM_TYPE,
};
