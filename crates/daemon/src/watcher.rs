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

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_client::pod::{pod_name, pod_namespace, pod_networks, pod_uid};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use tokio::sync::{Mutex, watch};

/// The pending-work maps shared between the watcher and the reconcilers.
///
/// Each map carries its own lock; a reconciler holds it for the whole pass
/// while the watcher's per-event critical sections stay small. Entries grow
/// unbounded between passes by design — the reconcilers drain them at a
/// fixed cadence.
#[derive(Default)]
pub struct PendingWork {
    /// Pods awaiting GUID allocation and PKey admission, keyed by network.
    pub add_set: Mutex<HashMap<String, Vec<Pod>>>,
    /// Deleted pods awaiting PKey withdrawal and GUID release, keyed by
    /// network.
    pub delete_set: Mutex<HashMap<String, Vec<Pod>>>,
}

/// Classifies pod lifecycle events into the pending-work maps.
pub struct PodEventHandler {
    pending: Arc<PendingWork>,
}

impl PodEventHandler {
    pub fn new(pending: Arc<PendingWork>) -> Self {
        Self { pending }
    }

    /// A pod was added or updated. Every network selection not yet marked
    /// InfiniBand-configured is enqueued for the add pass. A `(pod, network)`
    /// pair already pending is left alone.
    pub async fn pod_applied(&self, pod: Pod) {
        let selections = match pod_networks(&pod) {
            Ok(selections) => selections,
            // Pods without (parseable) secondary networks are not ours.
            Err(_) => return,
        };

        let unconfigured: Vec<String> = selections
            .iter()
            .filter(|selection| !selection.is_configured())
            .map(|selection| selection.name.clone())
            .collect();
        if unconfigured.is_empty() {
            return;
        }

        let uid = pod_uid(&pod);
        let mut add_set = self.pending.add_set.lock().await;
        for network in unconfigured {
            let entry = add_set.entry(network.clone()).or_default();
            if entry.iter().any(|pending| pod_uid(pending) == uid) {
                continue;
            }
            tracing::debug!(
                namespace = %pod_namespace(&pod),
                pod = %pod_name(&pod),
                %network,
                "enqueueing pod for GUID assignment"
            );
            entry.push(pod.clone());
        }
    }

    /// A pod was deleted. It leaves the add set on every network, and every
    /// selection that was marked configured is enqueued for the delete pass.
    /// A terminated pod is never re-added.
    pub async fn pod_deleted(&self, pod: Pod) {
        let selections = match pod_networks(&pod) {
            Ok(selections) => selections,
            Err(_) => return,
        };
        let uid = pod_uid(&pod);

        {
            let mut add_set = self.pending.add_set.lock().await;
            for selection in &selections {
                if let Some(entry) = add_set.get_mut(&selection.name) {
                    entry.retain(|pending| pod_uid(pending) != uid);
                    if entry.is_empty() {
                        add_set.remove(&selection.name);
                    }
                }
            }
        }

        let configured: Vec<String> = selections
            .iter()
            .filter(|selection| selection.is_configured())
            .map(|selection| selection.name.clone())
            .collect();
        if configured.is_empty() {
            return;
        }

        let mut delete_set = self.pending.delete_set.lock().await;
        for network in configured {
            let entry = delete_set.entry(network.clone()).or_default();
            if entry.iter().any(|pending| pod_uid(pending) == uid) {
                continue;
            }
            tracing::debug!(
                namespace = %pod_namespace(&pod),
                pod = %pod_name(&pod),
                %network,
                "enqueueing pod for GUID release"
            );
            entry.push(pod.clone());
        }
    }
}

/// Drives the pod watch stream into the event handler until stopped.
pub struct Watcher {
    pods: Api<Pod>,
    handler: PodEventHandler,
}

impl Watcher {
    pub fn new(client: kube::Client, handler: PodEventHandler) -> Self {
        Self {
            pods: Api::all(client),
            handler,
        }
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut stream = Box::pin(watcher(self.pods.clone(), watcher::Config::default()));

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    tracing::info!("pod watcher stop was requested");
                    return;
                }
                event = stream.next() => match event {
                    Some(Ok(Event::Apply(pod) | Event::InitApply(pod))) => {
                        self.handler.pod_applied(pod).await;
                    }
                    Some(Ok(Event::Delete(pod))) => {
                        self.handler.pod_deleted(pod).await;
                    }
                    Some(Ok(Event::Init | Event::InitDone)) => {}
                    Some(Err(e)) => {
                        // The stream retries internally; nothing to do but log.
                        tracing::warn!(error = %e, "pod watch stream error");
                    }
                    None => {
                        tracing::warn!("pod watch stream ended");
                        return;
                    }
                }
            }
        }
    }
}
