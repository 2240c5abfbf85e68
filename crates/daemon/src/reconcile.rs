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

//! Periodic reconciliation of the pending-work maps.
//!
//! The add pass allocates first, then programs the subnet manager, then
//! commits the annotation: a crash after allocation leaves a GUID that pool
//! recovery frees again, while the reverse order could leave the subnet
//! manager holding a GUID the cluster has no record of. The delete pass
//! withdraws from the subnet manager before releasing, for the same reason.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use k8s_client::PodOrchestrator;
use k8s_client::pod::{pod_name, pod_namespace, pod_networks, pod_uid, set_pod_networks};
use k8s_openapi::api::core::v1::Pod;
use model::net::{self, NetworkSelectionElement};
use model::{Guid, PartitionKey};
use sm::SubnetManagerClient;
use tokio::sync::watch;

use crate::guid::GuidPool;
use crate::watcher::PendingWork;

pub struct Reconciler {
    orchestrator: Arc<dyn PodOrchestrator>,
    pool: Arc<GuidPool>,
    sm: Arc<dyn SubnetManagerClient>,
    pending: Arc<PendingWork>,
    period: Duration,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<dyn PodOrchestrator>,
        pool: Arc<GuidPool>,
        sm: Arc<dyn SubnetManagerClient>,
        pending: Arc<PendingWork>,
        period: Duration,
    ) -> Self {
        Self {
            orchestrator,
            pool,
            sm,
            pending,
            period,
        }
    }

    /// Runs the add pass on a fixed period until `stop` is signaled.
    /// An in-flight pass always runs to completion.
    pub async fn run_add(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            self.add_pass().await;
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = stop.changed() => {
                    tracing::info!("add reconciler stop was requested");
                    return;
                }
            }
        }
    }

    pub async fn run_delete(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            self.delete_pass().await;
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = stop.changed() => {
                    tracing::info!("delete reconciler stop was requested");
                    return;
                }
            }
        }
    }

    /// Drains the add set: per network, resolve GUIDs for every pending pod,
    /// admit the batch into the network's PKey, then commit the annotations.
    /// Failures isolate to the pod or to the network entry; a pass never
    /// aborts as a whole.
    pub(crate) async fn add_pass(&self) {
        let mut add_set = self.pending.add_set.lock().await;
        if add_set.is_empty() {
            return;
        }
        tracing::debug!(networks = add_set.len(), "add pass started");

        // Parsed selections per pod UID. A pod attached to several IB
        // networks accumulates its GUID writes here across network batches
        // within this pass.
        let mut selections_by_pod: HashMap<String, Vec<NetworkSelectionElement>> = HashMap::new();

        let network_names: Vec<String> = add_set.keys().cloned().collect();
        for network_name in network_names {
            let pods = match add_set.get(&network_name) {
                Some(pods) if !pods.is_empty() => pods.clone(),
                _ => {
                    add_set.remove(&network_name);
                    continue;
                }
            };

            // All pending pods on a network share its namespace.
            let namespace = pod_namespace(&pods[0]).to_string();
            let attachment = match self
                .orchestrator
                .get_network_attachment_definition(&namespace, &network_name)
                .await
            {
                Ok(attachment) => attachment,
                Err(e) => {
                    tracing::warn!(
                        network = %network_name,
                        error = %e,
                        "failed to get network attachment, retrying next pass"
                    );
                    continue;
                }
            };

            let config = attachment.spec.config.unwrap_or_default();
            let ib_spec = match net::ib_sriov_spec(&config) {
                Ok(spec) => spec,
                Err(e) => {
                    // Not a transient condition; retrying would loop forever.
                    tracing::warn!(
                        network = %network_name,
                        error = %e,
                        "network is not an ib-sriov network, dropping it from the add set"
                    );
                    add_set.remove(&network_name);
                    continue;
                }
            };

            let mut guid_list: Vec<Guid> = Vec::new();
            let mut passed_pods: Vec<Pod> = Vec::new();
            let mut failed_pods: Vec<Pod> = Vec::new();

            for mut pod in pods {
                let uid = pod_uid(&pod);

                let selections = match selections_by_pod.entry(uid.clone()) {
                    Entry::Occupied(cached) => cached.into_mut(),
                    Entry::Vacant(vacant) => match pod_networks(&pod) {
                        Ok(parsed) => vacant.insert(parsed),
                        Err(e) => {
                            tracing::error!(
                                namespace = %pod_namespace(&pod),
                                pod = %pod_name(&pod),
                                error = %e,
                                "failed to read pod network annotations"
                            );
                            failed_pods.push(pod);
                            continue;
                        }
                    },
                };

                let selection = match net::find_selection(selections, &network_name) {
                    Ok(selection) => selection,
                    Err(e) => {
                        tracing::error!(
                            namespace = %pod_namespace(&pod),
                            pod = %pod_name(&pod),
                            error = %e,
                            "failed to get pod network selection"
                        );
                        failed_pods.push(pod);
                        continue;
                    }
                };

                let user_guid = selection.guid().map(str::to_string);
                let guid;
                match user_guid {
                    Some(raw) => {
                        // User pre-allocated GUID; the annotation already
                        // carries it. An out-of-range value fails allocation
                        // rather than being silently admitted to the fabric.
                        guid = match raw.parse::<Guid>() {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                tracing::error!(
                                    namespace = %pod_namespace(&pod),
                                    pod = %pod_name(&pod),
                                    error = %e,
                                    "failed to parse user allocated guid"
                                );
                                failed_pods.push(pod);
                                continue;
                            }
                        };
                        if let Err(e) = self.pool.allocate(&uid, &network_name, guid) {
                            tracing::error!(
                                namespace = %pod_namespace(&pod),
                                pod = %pod_name(&pod),
                                error = %e,
                                "failed to allocate user provided guid"
                            );
                            failed_pods.push(pod);
                            continue;
                        }
                    }
                    None => {
                        guid = match self.pool.generate() {
                            Ok(generated) => generated,
                            Err(e) => {
                                tracing::error!(
                                    namespace = %pod_namespace(&pod),
                                    pod = %pod_name(&pod),
                                    error = %e,
                                    "failed to generate guid"
                                );
                                failed_pods.push(pod);
                                continue;
                            }
                        };
                        if let Err(e) = self.pool.allocate(&uid, &network_name, guid) {
                            tracing::error!(
                                namespace = %pod_namespace(&pod),
                                pod = %pod_name(&pod),
                                error = %e,
                                "failed to allocate generated guid"
                            );
                            failed_pods.push(pod);
                            continue;
                        }
                        selection.set_guid(&guid);
                        // Keep the pod's local annotation in step so a retried
                        // batch reuses this GUID instead of minting a new one.
                        if let Err(e) = set_pod_networks(&mut pod, selections) {
                            tracing::error!(
                                namespace = %pod_namespace(&pod),
                                pod = %pod_name(&pod),
                                error = %e,
                                "failed to serialize pod network annotations"
                            );
                            failed_pods.push(pod);
                            continue;
                        }
                    }
                }

                guid_list.push(guid);
                passed_pods.push(pod);
            }

            let mut programmed_pkey: Option<PartitionKey> = None;
            let raw_pkey = ib_spec.pkey.as_deref().unwrap_or_default();
            if !raw_pkey.is_empty() && !guid_list.is_empty() {
                let pkey = match PartitionKey::try_from(raw_pkey) {
                    Ok(pkey) if pkey.is_reserved() => {
                        tracing::error!(
                            network = %network_name,
                            %pkey,
                            "refusing to program a reserved pkey, dropping the network"
                        );
                        self.drop_batch(&guid_list);
                        add_set.remove(&network_name);
                        continue;
                    }
                    Ok(pkey) => pkey,
                    Err(e) => {
                        tracing::error!(
                            network = %network_name,
                            error = %e,
                            "failed to parse pkey, dropping the network"
                        );
                        self.drop_batch(&guid_list);
                        add_set.remove(&network_name);
                        continue;
                    }
                };

                if let Err(e) = self.sm.add_guids_to_pkey(pkey, &guid_list).await {
                    tracing::error!(
                        network = %network_name,
                        subnet_manager = self.sm.name(),
                        error = %e,
                        "failed to add guids to pkey, retrying next pass"
                    );
                    // Retain the whole entry, carrying the in-flight
                    // annotation state so retries reuse the same GUIDs.
                    failed_pods.extend(passed_pods);
                    add_set.insert(network_name.clone(), failed_pods);
                    continue;
                }
                programmed_pkey = Some(pkey);
            }

            // Commit annotations for the pods that made it through.
            let mut removed_guids: Vec<Guid> = Vec::new();
            for (index, pod) in passed_pods.iter_mut().enumerate() {
                let uid = pod_uid(pod);
                let Some(selections) = selections_by_pod.get_mut(&uid) else {
                    failed_pods.push(pod.clone());
                    continue;
                };
                let Ok(selection) = net::find_selection(selections, &network_name) else {
                    failed_pods.push(pod.clone());
                    continue;
                };
                selection.set_configured();
                if let Err(e) = set_pod_networks(pod, selections) {
                    tracing::error!(
                        namespace = %pod_namespace(pod),
                        pod = %pod_name(pod),
                        error = %e,
                        "failed to serialize pod network annotations"
                    );
                    failed_pods.push(pod.clone());
                    continue;
                }

                let annotations = pod.metadata.annotations.clone().unwrap_or_default();
                match self.orchestrator.set_annotations_on_pod(pod, &annotations).await {
                    Ok(()) => {
                        tracing::info!(
                            namespace = %pod_namespace(pod),
                            pod = %pod_name(pod),
                            network = %network_name,
                            guid = %guid_list[index],
                            "pod configured"
                        );
                    }
                    Err(e) if e.is_not_found() => {
                        // The pod is gone; undo its allocation and schedule
                        // the fabric withdrawal below.
                        tracing::warn!(
                            namespace = %pod_namespace(pod),
                            pod = %pod_name(pod),
                            guid = %guid_list[index],
                            "pod deleted before annotations could be written, releasing its guid"
                        );
                        self.pool.release(guid_list[index]);
                        removed_guids.push(guid_list[index]);
                    }
                    Err(e) => {
                        tracing::error!(
                            namespace = %pod_namespace(pod),
                            pod = %pod_name(pod),
                            error = %e,
                            "failed to update pod annotations"
                        );
                        failed_pods.push(pod.clone());
                    }
                }
            }

            if let Some(pkey) = programmed_pkey
                && !removed_guids.is_empty()
            {
                // Best-effort: the pods are gone, no delete pass will retry
                // this withdrawal.
                if let Err(e) = self.sm.remove_guids_from_pkey(pkey, &removed_guids).await {
                    tracing::warn!(
                        %pkey,
                        subnet_manager = self.sm.name(),
                        error = %e,
                        "failed to withdraw guids of deleted pods from pkey"
                    );
                }
            }

            if failed_pods.is_empty() {
                add_set.remove(&network_name);
            } else {
                add_set.insert(network_name.clone(), failed_pods);
            }
        }

        tracing::debug!("add pass finished");
    }

    /// Drains the delete set: per network, collect the GUIDs of configured
    /// pods, withdraw the batch from the PKey, then return the GUIDs to the
    /// pool.
    pub(crate) async fn delete_pass(&self) {
        let mut delete_set = self.pending.delete_set.lock().await;
        if delete_set.is_empty() {
            return;
        }
        tracing::debug!(networks = delete_set.len(), "delete pass started");

        let network_names: Vec<String> = delete_set.keys().cloned().collect();
        for network_name in network_names {
            let pods = match delete_set.get(&network_name) {
                Some(pods) if !pods.is_empty() => pods.clone(),
                _ => {
                    delete_set.remove(&network_name);
                    continue;
                }
            };

            let namespace = pod_namespace(&pods[0]).to_string();
            let attachment = match self
                .orchestrator
                .get_network_attachment_definition(&namespace, &network_name)
                .await
            {
                Ok(attachment) => attachment,
                Err(e) => {
                    tracing::warn!(
                        network = %network_name,
                        error = %e,
                        "failed to get network attachment, retrying next pass"
                    );
                    continue;
                }
            };

            let config = attachment.spec.config.unwrap_or_default();
            let ib_spec = match net::ib_sriov_spec(&config) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!(network = %network_name, error = %e, "skipping network");
                    continue;
                }
            };

            let mut guid_list: Vec<Guid> = Vec::new();
            let mut failed_pods: Vec<Pod> = Vec::new();

            for pod in pods {
                let mut selections = match pod_networks(&pod) {
                    Ok(selections) => selections,
                    Err(e) => {
                        tracing::error!(
                            namespace = %pod_namespace(&pod),
                            pod = %pod_name(&pod),
                            error = %e,
                            "failed to read pod network annotations"
                        );
                        failed_pods.push(pod);
                        continue;
                    }
                };

                let selection = match net::find_selection(&mut selections, &network_name) {
                    Ok(selection) => selection,
                    Err(e) => {
                        tracing::error!(
                            namespace = %pod_namespace(&pod),
                            pod = %pod_name(&pod),
                            error = %e,
                            "failed to get pod network selection"
                        );
                        failed_pods.push(pod);
                        continue;
                    }
                };

                if !selection.is_configured() {
                    // The CNI never delivered this one; there is nothing to
                    // undo.
                    tracing::debug!(
                        namespace = %pod_namespace(&pod),
                        pod = %pod_name(&pod),
                        network = %network_name,
                        "network was never InfiniBand-configured, skipping"
                    );
                    continue;
                }

                let raw = match selection.guid() {
                    Some(raw) => raw,
                    None => {
                        tracing::error!(
                            namespace = %pod_namespace(&pod),
                            pod = %pod_name(&pod),
                            network = %network_name,
                            "configured network has no guid in its annotations"
                        );
                        failed_pods.push(pod);
                        continue;
                    }
                };
                match raw.parse::<Guid>() {
                    Ok(guid) => guid_list.push(guid),
                    Err(e) => {
                        tracing::error!(
                            namespace = %pod_namespace(&pod),
                            pod = %pod_name(&pod),
                            error = %e,
                            "failed to parse allocated guid"
                        );
                        failed_pods.push(pod);
                    }
                }
            }

            let raw_pkey = ib_spec.pkey.as_deref().unwrap_or_default();
            if !raw_pkey.is_empty() && !guid_list.is_empty() {
                let pkey = match PartitionKey::try_from(raw_pkey) {
                    Ok(pkey) if pkey.is_reserved() => {
                        // Never programmed on the add path; just free the
                        // GUIDs and forget the network.
                        tracing::error!(
                            network = %network_name,
                            %pkey,
                            "reserved pkey on delete, dropping the network"
                        );
                        self.drop_batch(&guid_list);
                        delete_set.remove(&network_name);
                        continue;
                    }
                    Ok(pkey) => pkey,
                    Err(e) => {
                        tracing::error!(
                            network = %network_name,
                            error = %e,
                            "failed to parse pkey on delete, dropping the network"
                        );
                        self.drop_batch(&guid_list);
                        delete_set.remove(&network_name);
                        continue;
                    }
                };

                if let Err(e) = self.sm.remove_guids_from_pkey(pkey, &guid_list).await {
                    tracing::error!(
                        network = %network_name,
                        subnet_manager = self.sm.name(),
                        error = %e,
                        "failed to remove guids from pkey, retrying next pass"
                    );
                    continue;
                }
            }

            for guid in &guid_list {
                if !self.pool.release(*guid) {
                    tracing::debug!(%guid, "released guid was not allocated");
                }
            }

            if failed_pods.is_empty() {
                delete_set.remove(&network_name);
            } else {
                delete_set.insert(network_name.clone(), failed_pods);
            }
        }

        tracing::debug!("delete pass finished");
    }

    /// Returns a batch of allocated GUIDs to the pool when their network is
    /// dropped permanently before the fabric ever saw them.
    fn drop_batch(&self, guids: &[Guid]) {
        for guid in guids {
            self.pool.release(*guid);
        }
    }
}
