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

//! Unbounded FIFO of envelopes with blocking and non-blocking consumption.

use crate::envelope::Envelope;
use crate::error::MiddlewareError;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct QueueState {
    items: VecDeque<Envelope>,
    closed: bool,
}

/// FIFO store of envelopes awaiting pull.
///
/// The store itself is unbounded. Consumers bound how much they take per call.
#[derive(Default)]
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, envelope: Envelope) -> Result<(), MiddlewareError> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(MiddlewareError::delivery("delivery queue is closed"));
            }
            state.items.push_back(envelope);
        }
        self.available.notify_waiters();
        Ok(())
    }

    /// Puts `earlier` ahead of everything already queued, keeping its order.
    pub fn requeue_front(&self, earlier: Vec<Envelope>) -> Result<(), MiddlewareError> {
        if earlier.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.state();
            if state.closed {
                return Err(MiddlewareError::delivery("delivery queue is closed"));
            }
            for envelope in earlier.into_iter().rev() {
                state.items.push_front(envelope);
            }
        }
        self.available.notify_waiters();
        Ok(())
    }

    /// Pops the oldest envelope, waiting up to `timeout` (`None` waits until one arrives or the
    /// queue is closed). Returns `None` on timeout or close.
    pub async fn pop(&self, timeout: Option<Duration>) -> Option<Envelope> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(envelope) = state.items.pop_front() {
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.state().items.pop_front();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Pops up to `max` envelopes that are available right now.
    pub fn pop_up_to(&self, max: usize) -> Vec<Envelope> {
        let mut state = self.state();
        let count = max.min(state.items.len());
        state.items.drain(..count).collect()
    }

    /// Takes every buffered envelope, oldest first.
    pub fn drain(&self) -> Vec<Envelope> {
        self.state().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Rejects further pushes and releases blocked consumers once the buffer is empty.
    pub fn close(&self) {
        self.state().closed = true;
        self.available.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryQueue;
    use crate::envelope::{Envelope, MessageType};
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::time::Duration;

    fn observation(n: usize) -> Envelope {
        Envelope::new([MessageType::Observation]).with_payload(serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn pop_up_to_is_fifo_and_bounded() {
        let queue = DeliveryQueue::new();
        for n in 0..7 {
            queue.push(observation(n)).unwrap();
        }

        let first = queue.pop_up_to(5);
        let second = queue.pop_up_to(5);

        assert_eq!(first.len(), 5);
        assert_eq!(first[0].payload()["n"], 0);
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].payload()["n"], 6);
        assert!(queue.pop_up_to(5).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_with_none() {
        let queue = DeliveryQueue::new();

        let started = tokio::time::Instant::now();
        let popped = queue.pop(Some(Duration::from_millis(250))).await;

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn blocked_pop_wakes_on_push() {
        let queue = Arc::new(DeliveryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(None).await })
        };

        tokio::task::yield_now().await;
        queue.push(observation(1)).unwrap();

        let popped = consumer.await.unwrap();
        assert_eq!(popped.unwrap().payload()["n"], 1);
    }

    #[tokio::test]
    async fn close_releases_waiters_and_rejects_pushes() {
        let queue = Arc::new(DeliveryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(None).await })
        };

        tokio::task::yield_now().await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
        assert_eq!(
            queue.push(observation(2)).unwrap_err().kind(),
            ErrorKind::Delivery
        );
    }

    #[tokio::test]
    async fn drain_takes_everything_in_order() {
        let queue = DeliveryQueue::new();
        queue.push(observation(1)).unwrap();
        queue.push(observation(2)).unwrap();

        let drained = queue.drain();

        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload()["n"], 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn requeued_envelopes_come_before_newer_ones() {
        let queue = DeliveryQueue::new();
        queue.push(observation(3)).unwrap();

        queue
            .requeue_front(vec![observation(1), observation(2)])
            .unwrap();

        let order: Vec<_> = queue
            .pop_up_to(3)
            .iter()
            .map(|envelope| envelope.payload()["n"].clone())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
