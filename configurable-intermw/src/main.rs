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

mod config;

use crate::config::Config;
use bridge_emulator::BridgeEmulator;
use clap::Parser;
use intermw_comm::{Broker, HttpPushSink, InMemoryBroker, InterMwApi, Registry};
use registry_in_memory::InMemoryRegistry;
use std::error::Error;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command()]
struct IntermwArgs {
    #[arg(short, long, value_name = "FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    info!("Started configurable-intermw");

    let args = IntermwArgs::parse();
    let config = Config::from_file(&args.config)?;

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new("intermw"));
    let registry: Arc<dyn Registry> = match &config.registry.file_path {
        Some(path) => Arc::new(InMemoryRegistry::from_static_file(path)?),
        None => Arc::new(InMemoryRegistry::new()),
    };

    let mut bridges = Vec::with_capacity(config.bridges.len());
    for bridge_config in &config.bridges {
        let bridge = BridgeEmulator::with_observation_interval(
            &bridge_config.platform_id,
            &bridge_config.platform_type,
            broker.clone(),
            bridge_config.observation_interval(),
        );
        bridge.start().await?;
        info!("bridge emulator listening for {}", bridge.platform_id());
        bridges.push(bridge);
    }

    let push_sink = Arc::new(HttpPushSink::new(config.middleware.push_request_timeout())?);
    let api = InterMwApi::start(broker.clone(), registry, push_sink, config.middleware).await?;

    info!(
        "InterMW ready: {} clients, {} platforms",
        api.list_clients().await?.len(),
        api.list_platforms().await?.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down configurable-intermw");

    api.shutdown().await;
    for bridge in &bridges {
        bridge.stop().await;
    }
    broker.close().await;

    Ok(())
}
