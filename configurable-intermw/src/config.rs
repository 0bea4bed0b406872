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

use intermw_comm::{MiddlewareConfig, MiddlewareError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_OBSERVATION_INTERVAL_MS: u64 = 1000;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub(crate) middleware: MiddlewareConfig,
    #[serde(default)]
    pub(crate) registry: RegistryConfig,
    #[serde(default)]
    pub(crate) bridges: Vec<BridgeConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Static JSON seed; an empty registry is used when absent.
    pub(crate) file_path: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub(crate) platform_id: String,
    pub(crate) platform_type: String,
    pub(crate) observation_interval_ms: Option<u64>,
}

impl BridgeConfig {
    pub(crate) fn observation_interval(&self) -> Duration {
        Duration::from_millis(
            self.observation_interval_ms
                .unwrap_or(DEFAULT_OBSERVATION_INTERVAL_MS)
                .max(1),
        )
    }
}

impl Config {
    pub(crate) fn from_file(path: &str) -> Result<Self, MiddlewareError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MiddlewareError::validation(format!("unable to read config file {path}: {e}"))
        })?;
        Self::from_json5(&contents)
    }

    pub(crate) fn from_json5(contents: &str) -> Result<Self, MiddlewareError> {
        let config: Config = json5::from_str(contents).map_err(|e| {
            MiddlewareError::validation(format!("unable to parse config file: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), MiddlewareError> {
        self.middleware.validate()?;

        let mut platform_ids = HashSet::new();
        for bridge in &self.bridges {
            if !platform_ids.insert(bridge.platform_id.as_str()) {
                return Err(MiddlewareError::validation(format!(
                    "duplicate bridge for platform {}",
                    bridge.platform_id
                )));
            }
        }
        Ok(())
    }
}
