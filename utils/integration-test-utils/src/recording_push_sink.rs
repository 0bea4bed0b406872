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

use async_trait::async_trait;
use intermw_comm::delivery::{PushError, PushSink};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One POST seen by a [`RecordingPushSink`].
#[derive(Clone, Debug)]
pub struct RecordedPost {
    pub url: String,
    pub content_type: String,
    pub body: String,
    pub accepted: bool,
}

impl RecordedPost {
    /// Envelope documents of the batch body.
    pub fn documents(&self) -> Vec<Value> {
        match serde_json::from_str(&self.body) {
            Ok(Value::Array(documents)) => documents,
            _ => Vec::new(),
        }
    }
}

/// Push sink that records posts and fails or delays the ones it is told to.
#[derive(Clone, Default)]
pub struct RecordingPushSink {
    posts: Arc<Mutex<Vec<RecordedPost>>>,
    scripted_failures: Arc<Mutex<VecDeque<u16>>>,
    failing_urls: Arc<Mutex<HashMap<String, u16>>>,
    slow_urls: Arc<Mutex<HashMap<String, Duration>>>,
}

impl RecordingPushSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` posts are answered with `status`.
    pub async fn fail_next(&self, count: usize, status: u16) {
        self.scripted_failures
            .lock()
            .await
            .extend(std::iter::repeat(status).take(count));
    }

    /// Every post to `url` is answered with `status`.
    pub async fn fail_url(&self, url: &str, status: u16) {
        self.failing_urls.lock().await.insert(url.to_string(), status);
    }

    /// Posts to `url` are recorded at once but answered only after `delay`.
    pub async fn slow_down(&self, url: &str, delay: Duration) {
        self.slow_urls.lock().await.insert(url.to_string(), delay);
    }

    pub async fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().await.clone()
    }

    /// Message ids of envelopes in accepted posts, in delivery order.
    pub async fn delivered_message_ids(&self) -> Vec<String> {
        self.posts
            .lock()
            .await
            .iter()
            .filter(|post| post.accepted)
            .flat_map(|post| post.documents())
            .filter_map(|document| {
                document
                    .get("messageId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl PushSink for RecordingPushSink {
    async fn post(&self, url: &str, content_type: &str, body: String) -> Result<(), PushError> {
        let failure = match self.failing_urls.lock().await.get(url) {
            Some(status) => Some(*status),
            None => self.scripted_failures.lock().await.pop_front(),
        };
        let delay = self.slow_urls.lock().await.get(url).copied();

        self.posts.lock().await.push(RecordedPost {
            url: url.to_string(),
            content_type: content_type.to_string(),
            body,
            accepted: failure.is_none(),
        });

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(status) => Err(PushError::Status(status)),
            None => Ok(()),
        }
    }
}
