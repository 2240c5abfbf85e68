/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

use k8s_client::mock::test_pod;
use k8s_client::pod::pod_uid;
use model::{Guid, PartitionKey};

use super::common::{Harness, IB_SRIOV_CONFIG, RANGE_END, RANGE_START, harness, stored_selection};

fn pkey_0x5() -> PartitionKey {
    PartitionKey::try_from("0x5").unwrap()
}

fn guid(raw: u64) -> Guid {
    Guid::from_u64(raw)
}

async fn enqueue(h: &Harness, name: &str, uid: &str, networks: &str) {
    let pod = test_pod("default", name, uid, Some(networks));
    h.orchestrator.insert_pod(pod.clone());
    h.handler.pod_applied(pod).await;
}

#[tokio::test]
async fn test_add_pass_happy_path() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

    h.reconciler.add_pass().await;

    assert!(h.pending.add_set.lock().await.is_empty());

    let selection = stored_selection(&h.orchestrator, "uid-1", "ibnet").unwrap();
    assert_eq!(selection.guid(), Some("02:00:00:00:00:00:00:01"));
    assert!(selection.is_configured());

    assert!(h.pool.is_allocated(guid(0x0200000000000001)));
    assert_eq!(
        h.sm.add_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000001)])]
    );
    assert!(h.sm.remove_calls().is_empty());
}

#[tokio::test]
async fn test_add_pass_user_assigned_guid() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(
        &h,
        "w2",
        "uid-2",
        r#"[{"name": "ibnet", "cni-args": {"guid": "02:00:00:00:00:00:00:03"}}]"#,
    )
    .await;

    h.reconciler.add_pass().await;

    // The pool reserved the user's GUID, not the first free one.
    assert_eq!(h.pool.allocated_count(), 1);
    assert!(h.pool.is_allocated(guid(0x0200000000000003)));
    assert!(!h.pool.is_allocated(guid(0x0200000000000001)));

    // The persisted GUID is untouched.
    let selection = stored_selection(&h.orchestrator, "uid-2", "ibnet").unwrap();
    assert_eq!(selection.guid(), Some("02:00:00:00:00:00:00:03"));
    assert!(selection.is_configured());

    assert_eq!(
        h.sm.add_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000003)])]
    );
}

#[tokio::test]
async fn test_add_pass_annotation_write_race() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w3", "uid-3", r#"[{"name": "ibnet"}]"#).await;

    // The pod disappears between enqueue and the pass; the annotation write
    // will come back not-found after the fabric was already programmed.
    h.orchestrator.remove_pod("uid-3");

    h.reconciler.add_pass().await;

    assert!(h.pending.add_set.lock().await.is_empty());
    assert!(!h.pool.is_allocated(guid(0x0200000000000001)));
    assert_eq!(
        h.sm.add_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000001)])]
    );
    assert_eq!(
        h.sm.remove_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000001)])]
    );
}

#[tokio::test]
async fn test_add_pass_partial_failure() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w4", "uid-4", r#"[{"name": "ibnet"}]"#).await;

    // w5's annotations are malformed; the event handler would never enqueue
    // it, but the annotation may rot between enqueue and the pass.
    let w5 = test_pod("default", "w5", "uid-5", Some("not-json"));
    h.orchestrator.insert_pod(w5.clone());
    h.pending
        .add_set
        .lock()
        .await
        .entry("ibnet".to_string())
        .or_default()
        .push(w5);

    h.reconciler.add_pass().await;

    // Only the failing subset is retained.
    let add_set = h.pending.add_set.lock().await;
    let retained = add_set.get("ibnet").unwrap();
    assert_eq!(retained.len(), 1);
    assert_eq!(pod_uid(&retained[0]), "uid-5");
    drop(add_set);

    let selection = stored_selection(&h.orchestrator, "uid-4", "ibnet").unwrap();
    assert!(selection.is_configured());
    assert_eq!(
        h.sm.add_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000001)])]
    );
}

#[tokio::test]
async fn test_add_pass_drops_non_ib_sriov_network() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ethnet", r#"{"type": "macvlan"}"#);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ethnet"}]"#).await;

    h.reconciler.add_pass().await;

    // Permanently removed; retrying would loop.
    assert!(h.pending.add_set.lock().await.is_empty());
    assert_eq!(h.pool.allocated_count(), 0);
    assert!(h.sm.add_calls().is_empty());
}

#[tokio::test]
async fn test_add_pass_retries_on_attachment_fetch_failure() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

    h.orchestrator.fail_nad_fetch(true);
    h.reconciler.add_pass().await;

    // Soft failure: nothing happened, the entry is retained.
    assert_eq!(h.pending.add_set.lock().await.len(), 1);
    assert_eq!(h.pool.allocated_count(), 0);
    assert!(h.sm.add_calls().is_empty());

    h.orchestrator.fail_nad_fetch(false);
    h.reconciler.add_pass().await;

    assert!(h.pending.add_set.lock().await.is_empty());
    let selection = stored_selection(&h.orchestrator, "uid-1", "ibnet").unwrap();
    assert!(selection.is_configured());
}

#[tokio::test]
async fn test_add_pass_sm_failure_keeps_batch_and_guid() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

    h.sm.fail_add(true);
    h.reconciler.add_pass().await;

    // The entry is retained and the allocation is kept for the retry.
    assert_eq!(h.pending.add_set.lock().await.len(), 1);
    assert!(h.pool.is_allocated(guid(0x0200000000000001)));
    // Not committed yet.
    let selection = stored_selection(&h.orchestrator, "uid-1", "ibnet").unwrap();
    assert!(!selection.is_configured());

    h.sm.fail_add(false);
    h.reconciler.add_pass().await;

    // The retry reused the GUID from the in-flight annotation state instead
    // of minting a second one.
    assert!(h.pending.add_set.lock().await.is_empty());
    assert_eq!(h.pool.allocated_count(), 1);
    let selection = stored_selection(&h.orchestrator, "uid-1", "ibnet").unwrap();
    assert_eq!(selection.guid(), Some("02:00:00:00:00:00:00:01"));
    assert!(selection.is_configured());
}

#[tokio::test]
async fn test_add_pass_annotation_write_transient_failure() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

    h.orchestrator.fail_annotation_write(true);
    h.reconciler.add_pass().await;

    // A non-404 write failure is transient: the pod stays pending and keeps
    // its allocation, unlike the deletion race.
    assert_eq!(h.pending.add_set.lock().await.len(), 1);
    assert!(h.pool.is_allocated(guid(0x0200000000000001)));
    assert!(h.sm.remove_calls().is_empty());

    h.orchestrator.fail_annotation_write(false);
    h.reconciler.add_pass().await;

    assert!(h.pending.add_set.lock().await.is_empty());
    assert_eq!(h.pool.allocated_count(), 1);
    let selection = stored_selection(&h.orchestrator, "uid-1", "ibnet").unwrap();
    assert_eq!(selection.guid(), Some("02:00:00:00:00:00:00:01"));
    assert!(selection.is_configured());
}

#[tokio::test]
async fn test_add_pass_refuses_reserved_pkey() {
    for reserved in ["0x0", "0x7fff"] {
        let h = harness(RANGE_START, RANGE_END);
        h.orchestrator.insert_network(
            "default",
            "ibnet",
            &format!(r#"{{"type": "ib-sriov", "pkey": "{reserved}"}}"#),
        );
        enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

        h.reconciler.add_pass().await;

        // Permanent skip: entry removed, no SM call, allocation undone.
        assert!(h.pending.add_set.lock().await.is_empty(), "{reserved}");
        assert!(h.sm.add_calls().is_empty(), "{reserved}");
        assert_eq!(h.pool.allocated_count(), 0, "{reserved}");
    }
}

#[tokio::test]
async fn test_add_pass_refuses_malformed_pkey() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", r#"{"type": "ib-sriov", "pkey": "fabric"}"#);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

    h.reconciler.add_pass().await;

    assert!(h.pending.add_set.lock().await.is_empty());
    assert!(h.sm.add_calls().is_empty());
    assert_eq!(h.pool.allocated_count(), 0);
}

#[tokio::test]
async fn test_add_pass_without_pkey_skips_sm() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", r#"{"type": "ib-sriov"}"#);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;

    h.reconciler.add_pass().await;

    // No partition to program, but the pod still gets its GUID.
    assert!(h.pending.add_set.lock().await.is_empty());
    assert!(h.sm.add_calls().is_empty());
    let selection = stored_selection(&h.orchestrator, "uid-1", "ibnet").unwrap();
    assert_eq!(selection.guid(), Some("02:00:00:00:00:00:00:01"));
    assert!(selection.is_configured());
}

#[tokio::test]
async fn test_add_pass_user_guid_out_of_range() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(
        &h,
        "w1",
        "uid-1",
        r#"[{"name": "ibnet", "cni-args": {"guid": "03:00:00:00:00:00:00:01"}}]"#,
    )
    .await;

    h.reconciler.add_pass().await;

    // Out-of-range user GUIDs are not admitted to the fabric.
    assert_eq!(h.pending.add_set.lock().await.len(), 1);
    assert!(h.sm.add_calls().is_empty());
    assert_eq!(h.pool.allocated_count(), 0);
}

#[tokio::test]
async fn test_add_pass_user_guid_collision() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(
        &h,
        "wa",
        "uid-a",
        r#"[{"name": "ibnet", "cni-args": {"guid": "02:00:00:00:00:00:00:03"}}]"#,
    )
    .await;
    enqueue(
        &h,
        "wb",
        "uid-b",
        r#"[{"name": "ibnet", "cni-args": {"guid": "02:00:00:00:00:00:00:03"}}]"#,
    )
    .await;

    h.reconciler.add_pass().await;

    // First claimant wins and keeps its allocation; the second stays failed.
    let add_set = h.pending.add_set.lock().await;
    let retained = add_set.get("ibnet").unwrap();
    assert_eq!(retained.len(), 1);
    assert_eq!(pod_uid(&retained[0]), "uid-b");
    drop(add_set);

    assert!(h.pool.is_allocated(guid(0x0200000000000003)));
    assert!(stored_selection(&h.orchestrator, "uid-a", "ibnet")
        .unwrap()
        .is_configured());
    assert_eq!(
        h.sm.add_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000003)])]
    );
}

#[tokio::test]
async fn test_add_pass_pool_exhaustion_isolated_to_pod() {
    // A single-GUID pool with two pending pods.
    let h = harness(RANGE_START, RANGE_START);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    enqueue(&h, "w1", "uid-1", r#"[{"name": "ibnet"}]"#).await;
    enqueue(&h, "w2", "uid-2", r#"[{"name": "ibnet"}]"#).await;

    h.reconciler.add_pass().await;

    let add_set = h.pending.add_set.lock().await;
    let retained = add_set.get("ibnet").unwrap();
    assert_eq!(retained.len(), 1);
    assert_eq!(pod_uid(&retained[0]), "uid-2");
    drop(add_set);

    assert!(stored_selection(&h.orchestrator, "uid-1", "ibnet")
        .unwrap()
        .is_configured());
    assert_eq!(
        h.sm.add_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000001)])]
    );
}
