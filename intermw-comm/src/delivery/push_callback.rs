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

//! Push delivery: correlated envelopes are buffered and POSTed in batches to the client's
//! callback URL by one worker task per client.
//!
//! A batch is a snapshot of the oldest `min(buffered, capacity)` envelopes and leaves the
//! buffer only after the endpoint answered 2xx. Failed batches are retried unchanged after
//! the retry delay, reading the client's current URL, format and capacity each time, so a
//! persistently failing endpoint stalls only its own client.

use super::{DeliveryCallback, PushSink};
use crate::envelope::{serialize_batch, Envelope, ResponseFormat};
use crate::error::MiddlewareError;
use crate::model::{Client, DeliveryMode};
use crate::observability::events;
use crate::runtime::worker_runtime::{spawn_worker, WorkerHandle};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const COMPONENT: &str = "push_callback";

const RUNNING: u8 = 0;
const STOP_WITH_FLUSH: u8 = 1;
const STOP_WITHOUT_FLUSH: u8 = 2;

#[derive(Clone)]
struct PushTarget {
    callback_url: Option<String>,
    response_format: ResponseFormat,
    capacity: usize,
}

impl PushTarget {
    fn from_client(client: &Client) -> Self {
        Self {
            callback_url: client.callback_url.clone(),
            response_format: client.response_format,
            capacity: client.capacity(),
        }
    }
}

struct PushState {
    buffer: VecDeque<Envelope>,
    /// Length of the buffer prefix currently being posted.
    in_flight: usize,
    target: PushTarget,
    accepting: bool,
}

struct PushShared {
    client_id: String,
    state: Mutex<PushState>,
    wake: Notify,
    stop_mode: AtomicU8,
    sink: Arc<dyn PushSink>,
    flush_interval: Duration,
    retry_delay: Duration,
}

impl PushShared {
    fn state(&self) -> MutexGuard<'_, PushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_mode(&self) -> u8 {
        self.stop_mode.load(Ordering::Acquire)
    }

    /// Posts buffered envelopes batch by batch until the buffer is empty or a post fails.
    async fn flush_buffered(&self) -> Result<(), MiddlewareError> {
        loop {
            if self.stop_mode() == STOP_WITHOUT_FLUSH {
                return Ok(());
            }

            let (target, batch) = {
                let mut state = self.state();
                if state.buffer.is_empty() {
                    return Ok(());
                }
                let count = state.buffer.len().min(state.target.capacity);
                let batch: Vec<Envelope> = state.buffer.iter().take(count).cloned().collect();
                state.in_flight = count;
                (state.target.clone(), batch)
            };

            let posted = self.post_batch(&target, &batch).await;

            {
                let mut state = self.state();
                if posted.is_ok() {
                    state.buffer.drain(..batch.len());
                }
                state.in_flight = 0;
            }
            posted?;
        }
    }

    async fn post_batch(
        &self,
        target: &PushTarget,
        batch: &[Envelope],
    ) -> Result<(), MiddlewareError> {
        let callback_url = target.callback_url.as_deref().ok_or_else(|| {
            MiddlewareError::delivery(format!("client {} has no callback URL", self.client_id))
        })?;
        let body = serialize_batch(target.response_format, batch)?;

        debug!(
            event = events::PUSH_FLUSH_ATTEMPT,
            component = COMPONENT,
            client_id = self.client_id.as_str(),
            callback_url,
            batch_size = batch.len(),
            "posting batch"
        );

        self.sink
            .post(callback_url, target.response_format.content_type(), body)
            .await
            .map_err(|e| {
                MiddlewareError::delivery(format!("push to {callback_url} failed: {e}"))
            })?;

        debug!(
            event = events::PUSH_FLUSH_OK,
            component = COMPONENT,
            client_id = self.client_id.as_str(),
            callback_url,
            batch_size = batch.len(),
            "batch delivered"
        );
        Ok(())
    }

    /// Waits out the retry delay. Returns `false` when a stop was requested meanwhile.
    async fn wait_before_retry(&self) -> bool {
        let retry = tokio::time::sleep(self.retry_delay);
        tokio::pin!(retry);

        loop {
            tokio::select! {
                _ = &mut retry => return self.stop_mode() == RUNNING,
                _ = self.wake.notified() => {
                    if self.stop_mode() != RUNNING {
                        return false;
                    }
                }
            }
        }
    }

    async fn run(self: Arc<Self>) {
        info!(
            event = events::PUSH_WORKER_START,
            component = COMPONENT,
            client_id = self.client_id.as_str(),
            "push worker started"
        );

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        'worker: while self.stop_mode() == RUNNING {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            while self.stop_mode() == RUNNING {
                match self.flush_buffered().await {
                    Ok(()) => break,
                    Err(err) => {
                        warn!(
                            event = events::PUSH_FLUSH_FAILED,
                            component = COMPONENT,
                            client_id = self.client_id.as_str(),
                            retry_in_ms = self.retry_delay.as_millis() as u64,
                            err = %err,
                            "batch delivery failed; keeping batch for retry"
                        );
                        if !self.wait_before_retry().await {
                            break 'worker;
                        }
                    }
                }
            }
        }

        if self.stop_mode() == STOP_WITH_FLUSH {
            if let Err(err) = self.flush_buffered().await {
                warn!(
                    event = events::PUSH_FINAL_FLUSH_ABANDONED,
                    component = COMPONENT,
                    client_id = self.client_id.as_str(),
                    dropped = self.state().buffer.len(),
                    err = %err,
                    "final flush failed; discarding buffered envelopes"
                );
            }
        }

        info!(
            event = events::PUSH_WORKER_STOP,
            component = COMPONENT,
            client_id = self.client_id.as_str(),
            "push worker stopped"
        );
    }
}

pub struct PushCallback {
    shared: Arc<PushShared>,
    worker: tokio::sync::Mutex<Option<WorkerHandle>>,
}

impl PushCallback {
    /// Validates the client's push settings and spawns its flush worker.
    pub fn start(
        client: &Client,
        sink: Arc<dyn PushSink>,
        flush_interval: Duration,
        retry_delay: Duration,
    ) -> Result<Self, MiddlewareError> {
        if client.callback_url.is_none() {
            return Err(MiddlewareError::validation(format!(
                "client {} uses push delivery but has no callback URL",
                client.client_id
            )));
        }

        let shared = Arc::new(PushShared {
            client_id: client.client_id.clone(),
            state: Mutex::new(PushState {
                buffer: VecDeque::new(),
                in_flight: 0,
                target: PushTarget::from_client(client),
                accepting: true,
            }),
            wake: Notify::new(),
            stop_mode: AtomicU8::new(RUNNING),
            sink,
            flush_interval,
            retry_delay,
        });

        let worker = spawn_worker(
            format!("push-{}", client.client_id),
            shared.clone().run(),
        );

        Ok(Self {
            shared,
            worker: tokio::sync::Mutex::new(Some(worker)),
        })
    }

    /// Envelopes accepted but not yet acknowledged by the callback endpoint.
    pub fn buffered(&self) -> usize {
        self.shared.state().buffer.len()
    }

    pub fn callback_url(&self) -> Option<String> {
        self.shared.state().target.callback_url.clone()
    }

    async fn halt(&self, mode: u8) {
        self.shared.state().accepting = false;
        let _ = self
            .shared
            .stop_mode
            .compare_exchange(RUNNING, mode, Ordering::AcqRel, Ordering::Acquire);
        self.shared.wake.notify_one();

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.join().await;
        }
    }
}

#[async_trait]
impl DeliveryCallback for PushCallback {
    fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Push
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), MiddlewareError> {
        let batch_ready = {
            let mut state = self.shared.state();
            if !state.accepting {
                return Err(MiddlewareError::delivery(format!(
                    "push callback of client {} is stopped",
                    self.shared.client_id
                )));
            }
            state.buffer.push_back(envelope);
            state.buffer.len() >= state.target.capacity
        };

        if batch_ready {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    async fn update(&self, client: &Client) -> Result<(), MiddlewareError> {
        if client.callback_url.is_none() {
            return Err(MiddlewareError::validation(format!(
                "client {} uses push delivery but has no callback URL",
                client.client_id
            )));
        }

        let batch_ready = {
            let mut state = self.shared.state();
            state.target = PushTarget::from_client(client);
            state.buffer.len() >= state.target.capacity
        };

        if batch_ready {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    async fn take_pending(&self) -> Vec<Envelope> {
        self.halt(STOP_WITHOUT_FLUSH).await;
        self.shared.state().buffer.drain(..).collect()
    }

    /// Inserts `earlier` right after the batch being posted, if any, so the posted prefix
    /// stays intact.
    async fn adopt(&self, earlier: Vec<Envelope>) -> Result<(), MiddlewareError> {
        if earlier.is_empty() {
            return Ok(());
        }
        let batch_ready = {
            let mut state = self.shared.state();
            if !state.accepting {
                return Err(MiddlewareError::delivery(format!(
                    "push callback of client {} is stopped",
                    self.shared.client_id
                )));
            }
            let at = state.in_flight;
            for (offset, envelope) in earlier.into_iter().enumerate() {
                state.buffer.insert(at + offset, envelope);
            }
            state.buffer.len() >= state.target.capacity
        };

        if batch_ready {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    async fn stop(&self) {
        self.halt(STOP_WITH_FLUSH).await;
    }
}
