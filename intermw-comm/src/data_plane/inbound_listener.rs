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

//! Upstream listener adapter that feeds the ARM's inbound dispatch.

use crate::arm::ArmState;
use crate::broker::EnvelopeListener;
use crate::envelope::Envelope;
use crate::error::MiddlewareError;
use crate::observability::{events, fields::FormattedEnvelopeFields};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, Level};

const COMPONENT: &str = "inbound_listener";

pub(crate) struct InboundDispatchListener {
    state: Arc<ArmState>,
}

impl InboundDispatchListener {
    pub(crate) fn new(state: Arc<ArmState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl EnvelopeListener for InboundDispatchListener {
    async fn on_receive(&self, envelope: Envelope) {
        if tracing::enabled!(Level::DEBUG) {
            let fields = FormattedEnvelopeFields::from_envelope(&envelope);
            debug!(
                event = events::ARM_INBOUND_RECEIVE,
                component = COMPONENT,
                msg_id = fields.msg_id.as_str(),
                msg_types = fields.msg_types.as_str(),
                client_id = fields.client_id.as_str(),
                conversation_id = fields.conversation_id.as_str(),
                sender = fields.sender.as_str(),
                "received upstream envelope"
            );
        }

        self.state.dispatch_inbound(envelope).await;
    }

    async fn on_error(&self, error: MiddlewareError) {
        error!(
            event = events::BROKER_LISTENER_ERROR,
            component = COMPONENT,
            err = %error,
            "upstream channel reported an error"
        );
    }
}
