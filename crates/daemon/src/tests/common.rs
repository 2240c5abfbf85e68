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

use std::sync::Arc;
use std::time::Duration;

use k8s_client::mock::MockOrchestrator;
use model::net::{self, NetworkSelectionElement};
use sm::mock::MockSubnetManager;

use crate::cfg::GuidPoolConfig;
use crate::guid::GuidPool;
use crate::reconcile::Reconciler;
use crate::watcher::{PendingWork, PodEventHandler};

pub(crate) const RANGE_START: &str = "02:00:00:00:00:00:00:01";
pub(crate) const RANGE_END: &str = "02:00:00:00:00:00:00:05";

/// An ib-sriov network attachment on partition 0x5.
pub(crate) const IB_SRIOV_CONFIG: &str = r#"{"type": "ib-sriov", "pkey": "0x5"}"#;

pub(crate) struct Harness {
    pub orchestrator: Arc<MockOrchestrator>,
    pub sm: Arc<MockSubnetManager>,
    pub pool: Arc<GuidPool>,
    pub pending: Arc<PendingWork>,
    pub handler: PodEventHandler,
    pub reconciler: Reconciler,
}

/// Wires a reconciler against an in-memory cluster and a recording subnet
/// manager.
pub(crate) fn harness(range_start: &str, range_end: &str) -> Harness {
    let orchestrator = Arc::new(MockOrchestrator::new());
    let sm = Arc::new(MockSubnetManager::new());
    let pool = Arc::new(
        GuidPool::new(&GuidPoolConfig {
            range_start: range_start.to_string(),
            range_end: range_end.to_string(),
        })
        .unwrap(),
    );
    let pending = Arc::new(PendingWork::default());
    let handler = PodEventHandler::new(pending.clone());
    let reconciler = Reconciler::new(
        orchestrator.clone(),
        pool.clone(),
        sm.clone(),
        pending.clone(),
        Duration::from_secs(1),
    );

    Harness {
        orchestrator,
        sm,
        pool,
        pending,
        handler,
        reconciler,
    }
}

/// The selection entry for `network` as currently persisted on the stored
/// pod.
pub(crate) fn stored_selection(
    orchestrator: &MockOrchestrator,
    uid: &str,
    network: &str,
) -> Option<NetworkSelectionElement> {
    let pod = orchestrator.pod(uid)?;
    let mut selections = k8s_client::pod::pod_networks(&pod).ok()?;
    net::find_selection(&mut selections, network).ok().cloned()
}
