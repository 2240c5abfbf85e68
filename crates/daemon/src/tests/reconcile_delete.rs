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

use super::common::{Harness, IB_SRIOV_CONFIG, RANGE_END, RANGE_START, harness};

const CONFIGURED_W6: &str = r#"[{"name": "ibnet",
    "cni-args": {"guid": "02:00:00:00:00:00:00:02",
                 "mellanox.infiniband.app": "configured"}}]"#;

fn pkey_0x5() -> PartitionKey {
    PartitionKey::try_from("0x5").unwrap()
}

fn guid(raw: u64) -> Guid {
    Guid::from_u64(raw)
}

async fn enqueue_delete(h: &Harness, name: &str, uid: &str, networks: &str) {
    h.handler
        .pod_deleted(test_pod("default", name, uid, Some(networks)))
        .await;
}

#[tokio::test]
async fn test_delete_pass_releases_guid() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    h.pool
        .allocate("uid-6", "ibnet", guid(0x0200000000000002))
        .unwrap();

    enqueue_delete(&h, "w6", "uid-6", CONFIGURED_W6).await;
    h.reconciler.delete_pass().await;

    assert!(h.pending.delete_set.lock().await.is_empty());
    assert!(!h.pool.is_allocated(guid(0x0200000000000002)));
    assert_eq!(
        h.sm.remove_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000002)])]
    );
}

#[tokio::test]
async fn test_delete_pass_skips_unconfigured_pods() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);

    // Not enqueued by the handler (never configured), but guard the pass
    // against such an entry appearing anyway.
    h.pending
        .delete_set
        .lock()
        .await
        .entry("ibnet".to_string())
        .or_default()
        .push(test_pod(
            "default",
            "w1",
            "uid-1",
            Some(r#"[{"name": "ibnet"}]"#),
        ));

    h.reconciler.delete_pass().await;

    // Nothing to undo; the entry is drained without touching the fabric.
    assert!(h.pending.delete_set.lock().await.is_empty());
    assert!(h.sm.remove_calls().is_empty());
}

#[tokio::test]
async fn test_delete_pass_retains_malformed_pods() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    h.pool
        .allocate("uid-6", "ibnet", guid(0x0200000000000002))
        .unwrap();

    let malformed = test_pod("default", "w7", "uid-7", Some("not-json"));
    {
        let mut delete_set = h.pending.delete_set.lock().await;
        let entry = delete_set.entry("ibnet".to_string()).or_default();
        entry.push(test_pod("default", "w6", "uid-6", Some(CONFIGURED_W6)));
        entry.push(malformed);
    }

    h.reconciler.delete_pass().await;

    // w6 was undone, w7 stays for the next pass.
    let delete_set = h.pending.delete_set.lock().await;
    let retained = delete_set.get("ibnet").unwrap();
    assert_eq!(retained.len(), 1);
    assert_eq!(pod_uid(&retained[0]), "uid-7");
    drop(delete_set);

    assert!(!h.pool.is_allocated(guid(0x0200000000000002)));
    assert_eq!(
        h.sm.remove_calls(),
        vec![(pkey_0x5(), vec![guid(0x0200000000000002)])]
    );
}

#[tokio::test]
async fn test_delete_pass_sm_failure_retains_entry() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    h.pool
        .allocate("uid-6", "ibnet", guid(0x0200000000000002))
        .unwrap();
    enqueue_delete(&h, "w6", "uid-6", CONFIGURED_W6).await;

    h.sm.fail_remove(true);
    h.reconciler.delete_pass().await;

    // Withdrawal failed: keep the GUID held so it cannot be handed out
    // while the fabric still admits it.
    assert_eq!(h.pending.delete_set.lock().await.len(), 1);
    assert!(h.pool.is_allocated(guid(0x0200000000000002)));

    h.sm.fail_remove(false);
    h.reconciler.delete_pass().await;

    assert!(h.pending.delete_set.lock().await.is_empty());
    assert!(!h.pool.is_allocated(guid(0x0200000000000002)));
}

#[tokio::test]
async fn test_delete_pass_attachment_fetch_failure_retains_entry() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", IB_SRIOV_CONFIG);
    h.pool
        .allocate("uid-6", "ibnet", guid(0x0200000000000002))
        .unwrap();
    enqueue_delete(&h, "w6", "uid-6", CONFIGURED_W6).await;

    h.orchestrator.fail_nad_fetch(true);
    h.reconciler.delete_pass().await;

    assert_eq!(h.pending.delete_set.lock().await.len(), 1);
    assert!(h.pool.is_allocated(guid(0x0200000000000002)));
    assert!(h.sm.remove_calls().is_empty());
}

#[tokio::test]
async fn test_delete_pass_without_pkey_still_releases() {
    let h = harness(RANGE_START, RANGE_END);
    h.orchestrator
        .insert_network("default", "ibnet", r#"{"type": "ib-sriov"}"#);
    h.pool
        .allocate("uid-6", "ibnet", guid(0x0200000000000002))
        .unwrap();
    enqueue_delete(&h, "w6", "uid-6", CONFIGURED_W6).await;

    h.reconciler.delete_pass().await;

    assert!(h.pending.delete_set.lock().await.is_empty());
    assert!(!h.pool.is_allocated(guid(0x0200000000000002)));
    assert!(h.sm.remove_calls().is_empty());
}
