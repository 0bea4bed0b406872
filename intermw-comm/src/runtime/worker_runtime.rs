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

//! Runtime helper for spawning long-lived worker tasks.

use crate::observability::events;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const COMPONENT: &str = "worker_runtime";

/// Owned handle of one spawned worker task.
pub(crate) struct WorkerHandle {
    worker_id: String,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Waits for the worker to end. A panicked worker is logged, not propagated.
    pub(crate) async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!(
                event = events::RUNTIME_JOIN_FAILED,
                component = COMPONENT,
                worker_id = self.worker_id.as_str(),
                err = %err,
                "worker task ended abnormally"
            );
        }
    }
}

/// Spawns `work` on the ambient tokio runtime.
pub(crate) fn spawn_worker<F>(worker_id: impl Into<String>, work: F) -> WorkerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let worker_id = worker_id.into();
    let handle = tokio::spawn(work);

    debug!(
        event = events::RUNTIME_SPAWN_OK,
        component = COMPONENT,
        worker_id = worker_id.as_str(),
        "spawned worker task"
    );

    WorkerHandle { worker_id, handle }
}
