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

//! Outbound HTTP seam used by push callbacks.

use crate::error::MiddlewareError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Failures of one push POST. Both are retried by the push worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The endpoint answered with a non-2xx status.
    Status(u16),
    /// The request could not be completed.
    Transport(String),
}

impl Display for PushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Status(status) => {
                write!(f, "callback endpoint answered with status {status}")
            }
            PushError::Transport(message) => write!(f, "callback request failed: {message}"),
        }
    }
}

impl Error for PushError {}

#[async_trait]
pub trait PushSink: Send + Sync {
    /// POSTs `body` to `url`; succeeds only on a 2xx answer.
    async fn post(&self, url: &str, content_type: &str, body: String) -> Result<(), PushError>;
}

/// [`PushSink`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpPushSink {
    client: reqwest::Client,
}

impl HttpPushSink {
    pub fn new(request_timeout: Duration) -> Result<Self, MiddlewareError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MiddlewareError::internal(format!("unable to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushSink for HttpPushSink {
    async fn post(&self, url: &str, content_type: &str, body: String) -> Result<(), PushError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PushError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpPushSink, PushError, PushSink};
    use std::time::Duration;

    #[test]
    fn status_errors_name_the_status() {
        assert_eq!(
            PushError::Status(503).to_string(),
            "callback endpoint answered with status 503"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let sink = HttpPushSink::new(Duration::from_millis(500)).unwrap();

        let err = sink
            .post("http://127.0.0.1:9/callback", "application/json", "[]".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::Transport(_)));
    }
}
