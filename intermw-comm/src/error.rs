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

//! Closed set of failure kinds surfaced by the middleware core.

use crate::envelope::ConversationId;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Discriminant of [`MiddlewareError`], handy for matching in callers and tests.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Transport,
    QueryTimeout,
    PartialFanOut,
    Delivery,
    Internal,
}

/// One platform-addressed publish that failed during a fan-out.
#[derive(Debug)]
pub struct FailedTarget {
    pub platform_id: String,
    pub error: MiddlewareError,
}

#[derive(Debug)]
pub enum MiddlewareError {
    /// Malformed request, rejected before anything is sent.
    Validation(String),
    /// Duplicate registration or subscription, rejected before anything is sent.
    Conflict(String),
    /// Unknown client, platform, device, subscription or conversation.
    NotFound(String),
    /// The broker could not accept or deliver an envelope.
    Transport {
        message: String,
        source: Option<Box<dyn Error + Send + Sync>>,
    },
    /// No response arrived for a synchronous query before its deadline.
    QueryTimeout {
        conversation_id: ConversationId,
        waited: Duration,
    },
    /// Some platform-addressed envelopes of one operation were published, others were not.
    PartialFanOut {
        conversation_id: ConversationId,
        delivered: Vec<String>,
        failed: Vec<FailedTarget>,
    },
    /// A delivery callback could not accept or hand out an envelope.
    Delivery(String),
    Internal(String),
}

impl MiddlewareError {
    pub fn validation(message: impl Into<String>) -> Self {
        MiddlewareError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        MiddlewareError::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        MiddlewareError::NotFound(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        MiddlewareError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        MiddlewareError::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        MiddlewareError::Delivery(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        MiddlewareError::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MiddlewareError::Validation(_) => ErrorKind::Validation,
            MiddlewareError::Conflict(_) => ErrorKind::Conflict,
            MiddlewareError::NotFound(_) => ErrorKind::NotFound,
            MiddlewareError::Transport { .. } => ErrorKind::Transport,
            MiddlewareError::QueryTimeout { .. } => ErrorKind::QueryTimeout,
            MiddlewareError::PartialFanOut { .. } => ErrorKind::PartialFanOut,
            MiddlewareError::Delivery(_) => ErrorKind::Delivery,
            MiddlewareError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a downstream operation failed before any platform received it.
    pub fn reached_no_platform(&self) -> bool {
        match self {
            MiddlewareError::Transport { .. } => true,
            MiddlewareError::PartialFanOut { delivered, .. } => delivered.is_empty(),
            _ => false,
        }
    }

    /// Conversation id an accepted-but-incomplete operation still produced, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            MiddlewareError::QueryTimeout {
                conversation_id, ..
            }
            | MiddlewareError::PartialFanOut {
                conversation_id, ..
            } => Some(conversation_id),
            _ => None,
        }
    }
}

impl Display for MiddlewareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareError::Validation(message) => write!(f, "invalid request: {message}"),
            MiddlewareError::Conflict(message) => write!(f, "conflict: {message}"),
            MiddlewareError::NotFound(message) => write!(f, "not found: {message}"),
            MiddlewareError::Transport { message, .. } => {
                write!(f, "transport failure: {message}")
            }
            MiddlewareError::QueryTimeout {
                conversation_id,
                waited,
            } => write!(
                f,
                "no response for query conversation {conversation_id} within {}ms",
                waited.as_millis()
            ),
            MiddlewareError::PartialFanOut {
                conversation_id,
                delivered,
                failed,
            } => {
                let failed_platforms: Vec<&str> = failed
                    .iter()
                    .map(|target| target.platform_id.as_str())
                    .collect();
                write!(
                    f,
                    "conversation {conversation_id} was sent to {} platform(s) but failed for {:?}",
                    delivered.len(),
                    failed_platforms
                )
            }
            MiddlewareError::Delivery(message) => write!(f, "delivery failure: {message}"),
            MiddlewareError::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl Error for MiddlewareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MiddlewareError::Transport {
                source: Some(source),
                ..
            } => Some(source.as_ref() as &(dyn Error + 'static)),
            MiddlewareError::PartialFanOut { failed, .. } => failed
                .first()
                .map(|target| &target.error as &(dyn Error + 'static)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, FailedTarget, MiddlewareError};
    use crate::envelope::ConversationId;
    use std::error::Error;
    use std::time::Duration;

    #[test]
    fn transport_error_exposes_source() {
        let io_error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broker went away");
        let error = MiddlewareError::transport_with_source("publish failed", io_error);

        assert_eq!(error.kind(), ErrorKind::Transport);
        assert!(error.to_string().contains("publish failed"));
        assert!(error.source().is_some());
    }

    #[test]
    fn partial_fan_out_reports_failed_platforms_and_conversation() {
        let conversation_id = ConversationId::from("conv-partial");
        let error = MiddlewareError::PartialFanOut {
            conversation_id: conversation_id.clone(),
            delivered: vec!["platform-a".to_string()],
            failed: vec![FailedTarget {
                platform_id: "platform-b".to_string(),
                error: MiddlewareError::transport("closed"),
            }],
        };

        assert_eq!(error.kind(), ErrorKind::PartialFanOut);
        assert!(!error.reached_no_platform());
        assert_eq!(error.conversation_id(), Some(&conversation_id));
        assert!(error.to_string().contains("platform-b"));
        assert!(error.source().is_some());
    }

    #[test]
    fn query_timeout_display_is_stable() {
        let error = MiddlewareError::QueryTimeout {
            conversation_id: ConversationId::from("conv-1"),
            waited: Duration::from_millis(1500),
        };

        assert_eq!(
            error.to_string(),
            "no response for query conversation conv-1 within 1500ms"
        );
        assert!(error.source().is_none());
    }
}
