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

//! Scalar settings consumed by the middleware core.

use crate::error::MiddlewareError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Middleware settings; every key is optional and falls back to its default.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct MiddlewareConfig {
    /// Receiving capacity assigned to clients that register without one.
    pub client_receiving_capacity_default: usize,
    pub query_poll_interval_ms: u64,
    /// Overall deadline of a synchronous query.
    pub query_response_timeout_ms: u64,
    /// Period of the push worker's latency-bounding flush tick.
    pub push_flush_interval_ms: u64,
    pub push_retry_delay_ms: u64,
    pub push_request_timeout_ms: u64,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            client_receiving_capacity_default: 10,
            query_poll_interval_ms: 500,
            query_response_timeout_ms: 30_000,
            push_flush_interval_ms: 1_000,
            push_retry_delay_ms: 15_000,
            push_request_timeout_ms: 10_000,
        }
    }
}

impl MiddlewareConfig {
    /// Parses a json5 document.
    pub fn from_json5(contents: &str) -> Result<Self, MiddlewareError> {
        let config: MiddlewareConfig = json5::from_str(contents)
            .map_err(|e| MiddlewareError::validation(format!("invalid middleware config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MiddlewareError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MiddlewareError::validation(format!(
                "unable to read middleware config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json5(&contents)
    }

    pub fn validate(&self) -> Result<(), MiddlewareError> {
        if self.client_receiving_capacity_default == 0 {
            return Err(MiddlewareError::validation(
                "client_receiving_capacity_default must be at least 1",
            ));
        }
        if self.query_poll_interval_ms == 0 || self.push_flush_interval_ms == 0 {
            return Err(MiddlewareError::validation(
                "poll and flush intervals must be greater than zero",
            ));
        }
        if self.push_retry_delay_ms == 0 || self.push_request_timeout_ms == 0 {
            return Err(MiddlewareError::validation(
                "push retry delay and push request timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn query_poll_interval(&self) -> Duration {
        Duration::from_millis(self.query_poll_interval_ms)
    }

    pub fn query_response_timeout(&self) -> Duration {
        Duration::from_millis(self.query_response_timeout_ms)
    }

    pub fn push_flush_interval(&self) -> Duration {
        Duration::from_millis(self.push_flush_interval_ms)
    }

    pub fn push_retry_delay(&self) -> Duration {
        Duration::from_millis(self.push_retry_delay_ms)
    }

    pub fn push_request_timeout(&self) -> Duration {
        Duration::from_millis(self.push_request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::MiddlewareConfig;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = MiddlewareConfig::from_json5("{ query_poll_interval_ms: 100, }").unwrap();

        assert_eq!(config.query_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.client_receiving_capacity_default, 10);
        assert_eq!(config.push_retry_delay(), Duration::from_secs(15));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = MiddlewareConfig::from_json5("{ queue_size: 3 }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = MiddlewareConfig::from_json5("{ client_receiving_capacity_default: 0 }")
            .unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn zero_push_retry_delay_or_timeout_is_rejected() {
        for document in ["{ push_retry_delay_ms: 0 }", "{ push_request_timeout_ms: 0 }"] {
            let err = MiddlewareConfig::from_json5(document).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(err.to_string().contains("greater than zero"));
        }
    }
}
