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

mod support;

use integration_test_utils::{RecordingPushSink, PLATFORM_A};
use intermw_comm::{
    Client, DeliveryMode, MiddlewareConfig, ResponseFormat, UpdateClientInput,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use support::{fast_config, Harness, SETTLE};

const URL_A: &str = "http://callback.test/a";
const URL_B: &str = "http://callback.test/b";

async fn wait_delivered(sink: &RecordingPushSink, count: usize) -> Vec<String> {
    let _ = tokio::time::timeout(SETTLE, async {
        while sink.delivered_message_ids().await.len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    sink.delivered_message_ids().await
}

async fn send_requests(harness: &Harness, client_id: &str, count: usize) {
    for _ in 0..count {
        harness
            .api
            .sync_devices(client_id, PLATFORM_A)
            .await
            .unwrap();
    }
}

fn config_with_flush(flush_ms: u64) -> MiddlewareConfig {
    MiddlewareConfig {
        push_flush_interval_ms: flush_ms,
        ..fast_config()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn callback_url_change_loses_and_duplicates_nothing() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], config_with_flush(300)).await;
    harness
        .api
        .register_client(Client::push("pusher", URL_A, 100))
        .await
        .unwrap();

    send_requests(&harness, "pusher", 6).await;
    let upstream = harness.dispatched(6).await;

    harness
        .api
        .update_client(
            "pusher",
            UpdateClientInput {
                callback_url: Some(URL_B.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let delivered = wait_delivered(&harness.push_sink, 6).await;
    let unique: HashSet<_> = delivered.iter().cloned().collect();
    let expected: HashSet<_> = upstream
        .iter()
        .map(|envelope| envelope.message_id().to_string())
        .collect();

    assert_eq!(delivered.len(), 6);
    assert_eq!(unique, expected);
    assert!(harness
        .push_sink
        .posts()
        .await
        .iter()
        .all(|post| post.url == URL_A || post.url == URL_B));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_posts_are_retried_until_accepted() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.push_sink.fail_next(2, 503).await;
    harness
        .api
        .register_client(Client::push("pusher", URL_A, 100))
        .await
        .unwrap();

    send_requests(&harness, "pusher", 3).await;
    harness.dispatched(3).await;

    let delivered = wait_delivered(&harness.push_sink, 3).await;
    let unique: HashSet<_> = delivered.iter().collect();
    assert_eq!(delivered.len(), 3);
    assert_eq!(unique.len(), 3);

    let rejected = harness
        .push_sink
        .posts()
        .await
        .iter()
        .filter(|post| !post.accepted)
        .count();
    assert_eq!(rejected, 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn full_buffer_flushes_before_the_tick() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], config_with_flush(60_000)).await;
    harness
        .api
        .register_client(Client::push("pusher", URL_A, 2))
        .await
        .unwrap();

    send_requests(&harness, "pusher", 2).await;
    harness.dispatched(2).await;

    let delivered = wait_delivered(&harness.push_sink, 2).await;
    assert_eq!(delivered.len(), 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn switching_to_pull_hands_over_undelivered_envelopes() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.push_sink.fail_next(10_000, 503).await;
    harness
        .api
        .register_client(Client::push("pusher", URL_A, 100))
        .await
        .unwrap();

    send_requests(&harness, "pusher", 4).await;
    harness.dispatched(4).await;

    harness
        .api
        .update_client(
            "pusher",
            UpdateClientInput {
                response_delivery: Some(DeliveryMode::Pull),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let pulled = harness.api.retrieve_response_messages("pusher").await.unwrap();
    assert_eq!(pulled.len(), 4);
    assert!(harness.push_sink.delivered_message_ids().await.is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_flushes_buffered_envelopes() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], config_with_flush(60_000)).await;
    harness
        .api
        .register_client(Client::push("pusher", URL_A, 100))
        .await
        .unwrap();

    send_requests(&harness, "pusher", 2).await;
    harness.dispatched(2).await;

    harness.api.shutdown().await;

    assert_eq!(harness.push_sink.delivered_message_ids().await.len(), 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn json_ld_clients_receive_annotated_documents() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    let mut client = Client::push("linked", URL_A, 1);
    client.response_format = ResponseFormat::JsonLd;
    harness.api.register_client(client).await.unwrap();

    send_requests(&harness, "linked", 1).await;
    harness.dispatched(1).await;
    wait_delivered(&harness.push_sink, 1).await;

    let posts = harness.push_sink.posts().await;
    let post = posts.first().expect("one post");
    assert_eq!(post.content_type, ResponseFormat::JsonLd.content_type());
    assert!(post.documents()[0].get("@context").is_some());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_endpoint_stalls_only_its_own_client() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.push_sink.fail_url(URL_A, 503).await;
    harness
        .api
        .register_client(Client::push("broken", URL_A, 1))
        .await
        .unwrap();
    harness
        .api
        .register_client(Client::push("healthy", URL_B, 1))
        .await
        .unwrap();

    send_requests(&harness, "broken", 3).await;
    send_requests(&harness, "healthy", 3).await;
    harness.dispatched(6).await;

    let delivered = wait_delivered(&harness.push_sink, 3).await;
    assert_eq!(delivered.len(), 3);

    let posts = harness.push_sink.posts().await;
    assert!(posts
        .iter()
        .filter(|post| post.accepted)
        .all(|post| post.url == URL_B));
    assert!(posts.iter().any(|post| post.url == URL_A && !post.accepted));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn hanging_endpoint_does_not_delay_other_clients() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness
        .push_sink
        .slow_down(URL_A, Duration::from_secs(3))
        .await;
    harness
        .api
        .register_client(Client::push("hanging", URL_A, 1))
        .await
        .unwrap();
    harness
        .api
        .register_client(Client::push("healthy", URL_B, 1))
        .await
        .unwrap();

    send_requests(&harness, "hanging", 1).await;
    harness.dispatched(1).await;

    let started = Instant::now();
    send_requests(&harness, "healthy", 2).await;
    harness.dispatched(3).await;
    let _ = tokio::time::timeout(SETTLE, async {
        while !harness
            .push_sink
            .posts()
            .await
            .iter()
            .any(|post| post.url == URL_B)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(started.elapsed() < Duration::from_secs(1));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mode_switch_behind_a_slow_post_does_not_block_dispatch() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness
        .push_sink
        .slow_down(URL_A, Duration::from_secs(3))
        .await;
    harness
        .api
        .register_client(Client::push("slow", URL_A, 1))
        .await
        .unwrap();
    harness.register_pull_client("other", 5).await;

    send_requests(&harness, "slow", 1).await;
    harness.dispatched(1).await;
    let _ = tokio::time::timeout(SETTLE, async {
        while harness.push_sink.posts().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let arm = harness.api.arm().clone();
    let switch = tokio::spawn(async move {
        arm.update_callback(&Client::pull("slow", 5)).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    send_requests(&harness, "other", 1).await;
    let received = harness
        .api
        .retrieve_response_message("other", 2_000)
        .await
        .unwrap();
    assert!(received.is_some());
    assert!(started.elapsed() < Duration::from_millis(500));

    switch.await.unwrap().unwrap();

    // The slow post went through, so nothing is handed over to pull.
    assert_eq!(harness.push_sink.delivered_message_ids().await.len(), 1);
    assert!(harness
        .api
        .retrieve_response_messages("slow")
        .await
        .unwrap()
        .is_empty());

    harness.stop().await;
}
