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

use integration_test_utils::PLATFORM_A;
use intermw_comm::envelope::MessageType;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use support::{fast_config, Harness};

#[tokio::test(flavor = "multi_thread")]
async fn pull_batches_are_bounded_by_receiving_capacity() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.register_pull_client("dashboard", 5).await;

    let mut conversations = HashSet::new();
    for _ in 0..12 {
        let conversation_id = harness
            .api
            .sync_devices("dashboard", PLATFORM_A)
            .await
            .unwrap();
        conversations.insert(conversation_id);
    }
    harness.dispatched(12).await;

    let first = harness.api.retrieve_response_messages("dashboard").await.unwrap();
    let second = harness.api.retrieve_response_messages("dashboard").await.unwrap();
    let third = harness.api.retrieve_response_messages("dashboard").await.unwrap();
    let fourth = harness.api.retrieve_response_messages("dashboard").await.unwrap();

    assert_eq!(
        (first.len(), second.len(), third.len(), fourth.len()),
        (5, 5, 2, 0)
    );

    let delivered: HashSet<_> = first
        .iter()
        .chain(&second)
        .chain(&third)
        .filter_map(|envelope| envelope.conversation_id().cloned())
        .collect();
    assert_eq!(delivered, conversations);
    assert!(first
        .iter()
        .all(|envelope| envelope.has_type(MessageType::Response)));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn long_poll_returns_empty_after_timeout() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.register_pull_client("dashboard", 5).await;

    let started = Instant::now();
    let nothing = harness
        .api
        .retrieve_response_message("dashboard", 100)
        .await
        .unwrap();

    assert!(nothing.is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn long_poll_without_timeout_wakes_on_arrival() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.register_pull_client("dashboard", 5).await;

    let arm = harness.api.arm().clone();
    let waiter = tokio::spawn(async move { arm.consume_message("dashboard", None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let conversation_id = harness
        .api
        .sync_devices("dashboard", PLATFORM_A)
        .await
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("long poll should wake")
        .unwrap()
        .unwrap()
        .expect("an envelope should arrive");
    assert_eq!(envelope.conversation_id(), Some(&conversation_id));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn push_clients_cannot_pull() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness
        .api
        .register_client(intermw_comm::Client::push(
            "pusher",
            "http://callback.test/a",
            5,
        ))
        .await
        .unwrap();

    let err = harness
        .api
        .retrieve_response_messages("pusher")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), intermw_comm::ErrorKind::Validation);

    harness.stop().await;
}
