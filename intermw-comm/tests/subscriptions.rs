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

use integration_test_utils::{sensor, sensors_on, FailingBroker, PLATFORM_A, PLATFORM_B};
use intermw_comm::envelope::MessageType;
use intermw_comm::{ErrorKind, InMemoryBroker, Plat2PlatSubscribeInput, Registry};
use registry_in_memory::InMemoryRegistry;
use std::sync::Arc;
use support::{fast_config, Harness, OBSERVATION_INTERVAL};

async fn seed_devices(harness: &Harness) {
    let mut devices = sensors_on(PLATFORM_A, "a", 2);
    devices.push(sensor("b-0", PLATFORM_B));
    harness.registry.register_devices(devices).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn observations_stream_until_unsubscribed() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A, PLATFORM_B], fast_config()).await;
    harness.register_pull_client("watcher", 50).await;
    seed_devices(&harness).await;

    let subscription_id = harness
        .api
        .subscribe(
            "watcher",
            vec!["a-0".to_string(), "a-1".to_string(), "b-0".to_string()],
        )
        .await
        .unwrap();

    // Two subscribe responses plus at least a few observations from each platform.
    harness.dispatched(8).await;
    let received = harness.api.retrieve_response_messages("watcher").await.unwrap();
    let observations: Vec<_> = received
        .iter()
        .filter(|envelope| envelope.has_type(MessageType::Observation))
        .collect();
    assert!(!observations.is_empty());
    assert!(observations
        .iter()
        .all(|envelope| envelope.conversation_id() == Some(&subscription_id)));
    assert!(harness.api.arm().is_conversation_open(&subscription_id).await);

    let unsubscribe_id = harness
        .api
        .unsubscribe("watcher", &subscription_id)
        .await
        .unwrap();
    assert_ne!(unsubscribe_id, subscription_id);
    assert!(!harness.api.arm().is_conversation_open(&subscription_id).await);
    assert!(harness.api.list_subscriptions(Some("watcher")).await.unwrap().is_empty());

    // Drop whatever was dispatched before the subscription closed.
    tokio::time::sleep(OBSERVATION_INTERVAL * 2).await;
    harness.api.retrieve_response_messages("watcher").await.unwrap();
    harness.api.retrieve_response_messages("watcher").await.unwrap();

    tokio::time::sleep(OBSERVATION_INTERVAL * 5).await;
    let late = harness.api.retrieve_response_messages("watcher").await.unwrap();
    assert!(late
        .iter()
        .all(|envelope| envelope.conversation_id() != Some(&subscription_id)));
    assert_eq!(harness.bridge(PLATFORM_A).active_streams(), 0);
    assert_eq!(harness.bridge(PLATFORM_B).active_streams(), 0);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_by_another_client_is_not_found() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.register_pull_client("owner", 10).await;
    harness.register_pull_client("intruder", 10).await;
    harness
        .registry
        .register_devices(sensors_on(PLATFORM_A, "a", 1))
        .await
        .unwrap();

    let subscription_id = harness
        .api
        .subscribe("owner", vec!["a-0".to_string()])
        .await
        .unwrap();

    let err = harness
        .api
        .unsubscribe("intruder", &subscription_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(harness.api.arm().is_conversation_open(&subscription_id).await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_to_unknown_devices_is_rejected() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A], fast_config()).await;
    harness.register_pull_client("watcher", 10).await;

    let err = harness
        .api
        .subscribe("watcher", vec!["ghost".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = harness.api.subscribe("watcher", Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn platform_to_platform_subscriptions_are_unique_per_pair() {
    integration_test_utils::init_logging();

    let harness = Harness::start(&[PLATFORM_A, PLATFORM_B], fast_config()).await;
    harness.register_pull_client("relay", 10).await;
    seed_devices(&harness).await;

    let input = Plat2PlatSubscribeInput {
        source_device_id: "a-0".to_string(),
        target_device_id: "b-0".to_string(),
    };
    let subscription_id = harness
        .api
        .subscribe_plat2plat("relay", input.clone())
        .await
        .unwrap();

    let stored = harness
        .api
        .list_plat2plat_subscriptions(Some("relay"))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].source_platform_id, PLATFORM_A);
    assert_eq!(stored[0].target_platform_id, PLATFORM_B);

    let err = harness
        .api
        .subscribe_plat2plat("relay", input)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    harness.dispatched(1).await;
    let virtual_subscribes = harness
        .bridge(PLATFORM_A)
        .received()
        .iter()
        .filter(|envelope| envelope.has_type(MessageType::VirtualSubscribe))
        .count();
    assert_eq!(virtual_subscribes, 1);

    harness
        .api
        .unsubscribe_plat2plat("relay", &subscription_id)
        .await
        .unwrap();
    let err = harness
        .api
        .unsubscribe_plat2plat("relay", &subscription_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = harness
        .api
        .subscribe_plat2plat(
            "relay",
            Plat2PlatSubscribeInput {
                source_device_id: "a-0".to_string(),
                target_device_id: "ghost".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    harness.stop().await;
}

async fn start_failing(failing_platforms: &[&str]) -> Harness {
    let broker = Arc::new(InMemoryBroker::new("failing-subscribe"));
    let failing = Arc::new(FailingBroker::new(broker.clone()));
    for platform_id in failing_platforms {
        failing.fail_platform(platform_id);
    }

    Harness::start_on(
        failing,
        broker,
        Arc::new(InMemoryRegistry::new()),
        &[PLATFORM_A, PLATFORM_B],
        fast_config(),
    )
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_no_platform_received_is_not_stored() {
    integration_test_utils::init_logging();

    let harness = start_failing(&[PLATFORM_A, PLATFORM_B]).await;
    harness.register_pull_client("watcher", 10).await;
    seed_devices(&harness).await;

    let err = harness
        .api
        .subscribe("watcher", vec!["a-0".to_string(), "b-0".to_string()])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialFanOut);
    assert!(harness.api.list_subscriptions(None).await.unwrap().is_empty());
    let conversation_id = err.conversation_id().expect("conversation id");
    assert!(!harness.api.arm().is_conversation_open(conversation_id).await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_reaching_some_platforms_is_kept() {
    integration_test_utils::init_logging();

    let harness = start_failing(&[PLATFORM_B]).await;
    harness.register_pull_client("watcher", 10).await;
    seed_devices(&harness).await;

    let err = harness
        .api
        .subscribe("watcher", vec!["a-0".to_string(), "b-0".to_string()])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialFanOut);
    let stored = harness.api.list_subscriptions(Some("watcher")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(Some(&stored[0].conversation_id), err.conversation_id());

    harness.stop().await;
}
