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

//! # intermw-comm
//!
//! `intermw-comm` is the messaging core of the InterMW IoT interoperability middleware.
//! Clients talk to heterogeneous IoT platforms through one envelope model; platform bridges
//! sit behind a [`Broker`] and exchange envelopes with the core over named channels.
//!
//! Every client operation runs under a [`ConversationId`]. The [`ApiRequestManager`] (ARM)
//! records which client owns each conversation before anything is published, so upstream
//! responses and observations can be routed back to the right [`DeliveryCallback`]:
//! a pull queue the client polls, or a push worker that POSTs batches to a callback URL.
//!
//! ## Layers
//!
//! - [`orchestrator::InterMwApi`]: validation against the [`Registry`], partitioning by
//!   platform and fan-out of one operation to many platforms.
//! - [`arm::ApiRequestManager`]: downstream sends, upstream dispatch and callback lifecycle.
//! - [`query_bridge::SyncQueryBridge`]: turns an asynchronous query conversation into a
//!   single awaited answer with a deadline.
//! - [`broker`]: the channel abstraction and an in-process implementation.
//! - [`delivery`]: pull and push delivery callbacks.
//!
//! Logging uses `tracing` events with a stable `event` field per occurrence; installing a
//! subscriber is left to the binary.
//!
//! ## Pull delivery
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use intermw_comm::{
//!     ApiRequestManager, Broker, Channel, Client, Envelope, HttpPushSink, InMemoryBroker,
//!     MessageType, MiddlewareConfig,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = Arc::new(InMemoryBroker::new("quick-start"));
//! let config = MiddlewareConfig::default();
//! let sink = Arc::new(HttpPushSink::new(config.push_request_timeout()).unwrap());
//! let arm = ApiRequestManager::start(broker.clone(), sink, config).await.unwrap();
//!
//! arm.register_client_callback(&Client::pull("app", 5)).await.unwrap();
//!
//! let request = Envelope::new([MessageType::SyncDevices])
//!     .with_client_id("app")
//!     .with_receiver_platform_id("platform-a");
//! let conversation_id = arm.process_downstream(request.clone()).await.unwrap();
//!
//! // A bridge answers on the upstream channel.
//! let response = Envelope::reply_to(
//!     &request.with_conversation_id(conversation_id.clone()),
//!     [MessageType::Response],
//! );
//! broker.publish(&Channel::upstream(), response).await.unwrap();
//!
//! let delivered = arm
//!     .consume_message("app", Some(Duration::from_secs(1)))
//!     .await
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(delivered.conversation_id(), Some(&conversation_id));
//! # });
//! ```
//!
//! ## API contract
//!
//! Operations fail with a [`MiddlewareError`] whose [`ErrorKind`] tells the caller what went
//! wrong: bad input, conflicts with registered state, unknown entities, broker failures,
//! query timeouts, or a fan-out that reached only some platforms.

pub mod arm;
pub mod broker;
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod query_bridge;
pub mod registry;
pub mod requests;

#[doc(hidden)]
pub mod observability;

mod control_plane;
mod data_plane;
mod routing;
mod runtime;

pub use arm::ApiRequestManager;
pub use broker::{Broker, Channel, EnvelopeListener, InMemoryBroker};
pub use config::MiddlewareConfig;
pub use delivery::{DeliveryCallback, HttpPushSink, PushSink};
pub use envelope::{ConversationId, Envelope, EnvelopeMetadata, MessageType, ResponseFormat};
pub use error::{ErrorKind, FailedTarget, MiddlewareError};
pub use model::{
    ActuationInput, ActuationResult, Client, DeliveryMode, IoTDevice, IoTDeviceType,
    Plat2PlatSubscribeInput, Plat2PlatSubscription, Platform, Subscription, UpdateClientInput,
};
pub use orchestrator::InterMwApi;
pub use query_bridge::SyncQueryBridge;
pub use registry::Registry;
