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

//! Per-client delivery: the pull queue, the pull and push callbacks, and the HTTP push sink.

mod callback;
mod pull_callback;
mod push_callback;
mod push_sink;
mod queue;

pub use callback::{build_callback, DeliveryCallback};
pub use pull_callback::{timeout_from_millis, PullCallback};
pub use push_callback::PushCallback;
pub use push_sink::{HttpPushSink, PushError, PushSink};
pub use queue::DeliveryQueue;
