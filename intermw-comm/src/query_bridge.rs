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

//! Blocking request/response wrapper over one asynchronous QUERY exchange.
//!
//! The bridge sends a single envelope, then polls the ARM's query-response store on a fixed
//! interval until the answer shows up or the deadline passes. Dropping the returned future
//! cancels the wait and forgets the conversation. Never use it for multi-response flows.

use crate::arm::ApiRequestManager;
use crate::envelope::{ConversationId, Envelope};
use crate::error::MiddlewareError;
use crate::observability::events;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

const COMPONENT: &str = "query_bridge";

/// Forgets the query conversation if the wait ends without collecting the answer.
struct PendingQuery {
    arm: Arc<ApiRequestManager>,
    conversation_id: ConversationId,
    armed: bool,
}

impl PendingQuery {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingQuery {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let arm = self.arm.clone();
            let conversation_id = self.conversation_id.clone();
            runtime.spawn(async move { arm.abandon_query(&conversation_id).await });
        }
    }
}

#[derive(Clone)]
pub struct SyncQueryBridge {
    arm: Arc<ApiRequestManager>,
    poll_interval: Duration,
    deadline: Duration,
}

impl SyncQueryBridge {
    /// Uses the poll interval and deadline configured on the ARM.
    pub fn new(arm: Arc<ApiRequestManager>) -> Self {
        let poll_interval = arm.config().query_poll_interval();
        let deadline = arm.config().query_response_timeout();
        Self::with_timing(arm, poll_interval, deadline)
    }

    pub fn with_timing(
        arm: Arc<ApiRequestManager>,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            arm,
            poll_interval,
            deadline,
        }
    }

    pub async fn query(&self, envelope: Envelope) -> Result<Envelope, MiddlewareError> {
        self.query_with_deadline(envelope, self.deadline).await
    }

    /// Sends `envelope` and waits at most `deadline` for its answer.
    pub async fn query_with_deadline(
        &self,
        envelope: Envelope,
        deadline: Duration,
    ) -> Result<Envelope, MiddlewareError> {
        let conversation_id = self.arm.process_downstream(envelope).await?;
        let mut pending = PendingQuery {
            arm: self.arm.clone(),
            conversation_id: conversation_id.clone(),
            armed: true,
        };
        let started = Instant::now();

        debug!(
            event = events::QUERY_START,
            component = COMPONENT,
            conversation_id = conversation_id.as_str(),
            deadline_ms = deadline.as_millis() as u64,
            "waiting for query response"
        );

        let poll = async {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(response) = self.arm.get_query_response_message(&conversation_id).await
                {
                    return response;
                }
            }
        };

        match tokio::time::timeout(deadline, poll).await {
            Ok(response) => {
                pending.disarm();
                debug!(
                    event = events::QUERY_OK,
                    component = COMPONENT,
                    conversation_id = conversation_id.as_str(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "query answered"
                );
                Ok(response)
            }
            Err(_) => {
                pending.disarm();
                self.arm.abandon_query(&conversation_id).await;
                let waited = started.elapsed();
                warn!(
                    event = events::QUERY_TIMEOUT,
                    component = COMPONENT,
                    conversation_id = conversation_id.as_str(),
                    waited_ms = waited.as_millis() as u64,
                    "query timed out"
                );
                Err(MiddlewareError::QueryTimeout {
                    conversation_id,
                    waited,
                })
            }
        }
    }
}
