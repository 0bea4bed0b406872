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

//! Canonical structured event names used across `intermw-comm`.

// Broker events.
pub const BROKER_PUBLISH: &str = "broker_publish";
pub const BROKER_PUBLISH_REJECTED: &str = "broker_publish_rejected";
pub const BROKER_LISTENER_REGISTERED: &str = "broker_listener_registered";
pub const BROKER_LISTENER_UNREGISTERED: &str = "broker_listener_unregistered";
pub const BROKER_CHANNEL_DELIVERY_STOPPED: &str = "broker_channel_delivery_stopped";
pub const BROKER_CLOSED: &str = "broker_closed";
pub const BROKER_LISTENER_ERROR: &str = "broker_listener_error";

// ARM outbound events.
pub const ARM_START: &str = "arm_start";
pub const ARM_SHUTDOWN: &str = "arm_shutdown";
pub const ARM_DOWNSTREAM_PUBLISH_OK: &str = "arm_downstream_publish_ok";
pub const ARM_DOWNSTREAM_PUBLISH_FAILED: &str = "arm_downstream_publish_failed";

// ARM inbound dispatch events.
pub const ARM_INBOUND_RECEIVE: &str = "arm_inbound_receive";
pub const ARM_DISPATCH_OK: &str = "arm_dispatch_ok";
pub const ARM_DISPATCH_DROPPED: &str = "arm_dispatch_dropped";
pub const ARM_DISPATCH_FAILED: &str = "arm_dispatch_failed";
pub const ARM_QUERY_RESPONSE_STORED: &str = "arm_query_response_stored";

// Callback lifecycle events.
pub const CALLBACK_REGISTERED: &str = "callback_registered";
pub const CALLBACK_REPLACED: &str = "callback_replaced";
pub const CALLBACK_UPDATED: &str = "callback_updated";
pub const CALLBACK_UNREGISTERED: &str = "callback_unregistered";
pub const CALLBACK_TRANSFER: &str = "callback_transfer";

// Conversation correlation events.
pub const CONVERSATION_OPEN: &str = "conversation_open";
pub const CONVERSATION_CLOSE: &str = "conversation_close";

// Push worker events.
pub const PUSH_WORKER_START: &str = "push_worker_start";
pub const PUSH_WORKER_STOP: &str = "push_worker_stop";
pub const PUSH_FLUSH_ATTEMPT: &str = "push_flush_attempt";
pub const PUSH_FLUSH_OK: &str = "push_flush_ok";
pub const PUSH_FLUSH_FAILED: &str = "push_flush_failed";
pub const PUSH_FINAL_FLUSH_ABANDONED: &str = "push_final_flush_abandoned";

// Fan-out orchestration and query bridge events.
pub const FAN_OUT_START: &str = "fan_out_start";
pub const FAN_OUT_OK: &str = "fan_out_ok";
pub const FAN_OUT_PARTIAL: &str = "fan_out_partial";
pub const QUERY_START: &str = "query_start";
pub const QUERY_OK: &str = "query_ok";
pub const QUERY_TIMEOUT: &str = "query_timeout";

// State restoration and runtime events.
pub const RESTORE_STATE_START: &str = "restore_state_start";
pub const RESTORE_STATE_OK: &str = "restore_state_ok";
pub const RESTORE_STATE_FAILED: &str = "restore_state_failed";
pub const RUNTIME_SPAWN_OK: &str = "runtime_spawn_ok";
pub const RUNTIME_JOIN_FAILED: &str = "runtime_join_failed";
