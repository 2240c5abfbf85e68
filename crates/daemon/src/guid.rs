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
use std::sync::Mutex;

use k8s_client::pod::{pod_name, pod_namespace, pod_networks, pod_uid};
use k8s_client::{ClientError, PodOrchestrator};
use model::Guid;
use model::net::NetConfError;
use thiserror::Error;

use crate::cfg::{ConfigError, GuidPoolConfig};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("the GUID pool is exhausted, all {0} GUIDs are allocated")]
    Exhausted(u64),
    #[error("GUID {guid} is already allocated to pod {pod_uid} on network {network}")]
    AlreadyAllocated {
        guid: Guid,
        pod_uid: String,
        network: String,
    },
    #[error("GUID {guid} is outside the configured pool range [{start}, {end}]")]
    OutOfRange { guid: Guid, start: Guid, end: Guid },
    #[error("GUID {0} is a reserved sentinel value")]
    Reserved(Guid),
}

/// The owner of an allocated GUID.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PoolKey {
    pod_uid: String,
    network: String,
}

struct PoolState {
    /// Occupancy, keyed by the integer form of the GUID.
    allocated: HashMap<u64, PoolKey>,
    /// Where the next `generate` starts scanning. Rolling so that sparse
    /// pools do not pay an O(range) scan on every allocation.
    next_candidate: u64,
}

/// Cluster-wide GUID allocator over an inclusive range.
///
/// The pool keeps no state of its own on disk: the orchestrator's pod
/// annotations are the single source of truth, and [`GuidPool::init`]
/// rebuilds occupancy from them on startup. A GUID allocated but never
/// committed to an annotation is therefore recovered as free after a
/// restart, which is safe because no pod carries a record of it either.
pub struct GuidPool {
    start: u64,
    end: u64,
    state: Mutex<PoolState>,
}

impl GuidPool {
    pub fn new(conf: &GuidPoolConfig) -> Result<Self, ConfigError> {
        let (start, end) = conf.range()?;

        Ok(GuidPool {
            start: start.as_u64(),
            end: end.as_u64(),
            state: Mutex::new(PoolState {
                allocated: HashMap::new(),
                next_candidate: start.as_u64(),
            }),
        })
    }

    /// Rebuilds occupancy from the current pod population.
    ///
    /// Every network selection carrying a parseable GUID inside the
    /// configured range is marked allocated under `(pod UID, network)`.
    /// GUIDs outside the range belong to another controller instance or to a
    /// previous range and are ignored. Individual malformed pods are skipped;
    /// only the pod listing itself can fail.
    pub async fn init(&self, orchestrator: &dyn PodOrchestrator) -> Result<(), ClientError> {
        let pods = orchestrator.list_pods().await?;

        let mut recovered = 0usize;
        for pod in &pods {
            let selections = match pod_networks(pod) {
                Ok(selections) => selections,
                Err(NetConfError::NoNetworksAnnotation) => continue,
                Err(e) => {
                    tracing::warn!(
                        namespace = %pod_namespace(pod),
                        pod = %pod_name(pod),
                        error = %e,
                        "skipping pod with malformed network annotations during pool recovery"
                    );
                    continue;
                }
            };

            for selection in &selections {
                let Some(raw) = selection.guid() else {
                    continue;
                };
                let guid = match raw.parse::<Guid>() {
                    Ok(guid) => guid,
                    Err(e) => {
                        tracing::warn!(
                            namespace = %pod_namespace(pod),
                            pod = %pod_name(pod),
                            network = %selection.name,
                            error = %e,
                            "skipping unparseable GUID during pool recovery"
                        );
                        continue;
                    }
                };
                if !self.contains(guid) {
                    tracing::debug!(%guid, "GUID outside the configured range, ignoring");
                    continue;
                }

                let mut state = self.state.lock().unwrap();
                state.allocated.insert(
                    guid.as_u64(),
                    PoolKey {
                        pod_uid: pod_uid(pod),
                        network: selection.name.clone(),
                    },
                );
                recovered += 1;
            }
        }

        tracing::info!(recovered, "GUID pool recovered from pod annotations");
        Ok(())
    }

    pub fn contains(&self, guid: Guid) -> bool {
        (self.start..=self.end).contains(&guid.as_u64())
    }

    /// Returns the next free GUID in ascending order, wrapping around the
    /// range once. Does not reserve it; the caller must follow up with
    /// [`GuidPool::allocate`].
    pub fn generate(&self) -> Result<Guid, PoolError> {
        let mut state = self.state.lock().unwrap();
        let size = self.end - self.start + 1;

        let mut candidate = state.next_candidate;
        for _ in 0..size {
            if candidate > self.end {
                candidate = self.start;
            }
            let guid = Guid::from_u64(candidate);
            if !guid.is_reserved() && !state.allocated.contains_key(&candidate) {
                state.next_candidate = candidate + 1;
                return Ok(guid);
            }
            candidate += 1;
        }

        Err(PoolError::Exhausted(size))
    }

    /// Reserves `guid` for `(pod_uid, network)`. Re-allocating to the same
    /// key is an idempotent success.
    pub fn allocate(&self, pod_uid: &str, network: &str, guid: Guid) -> Result<(), PoolError> {
        if guid.is_reserved() {
            return Err(PoolError::Reserved(guid));
        }
        if !self.contains(guid) {
            return Err(PoolError::OutOfRange {
                guid,
                start: Guid::from_u64(self.start),
                end: Guid::from_u64(self.end),
            });
        }

        let mut state = self.state.lock().unwrap();
        match state.allocated.get(&guid.as_u64()) {
            Some(key) if key.pod_uid == pod_uid && key.network == network => Ok(()),
            Some(key) => Err(PoolError::AlreadyAllocated {
                guid,
                pod_uid: key.pod_uid.clone(),
                network: key.network.clone(),
            }),
            None => {
                state.allocated.insert(
                    guid.as_u64(),
                    PoolKey {
                        pod_uid: pod_uid.to_string(),
                        network: network.to_string(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Frees `guid`. Releasing an unknown GUID is a no-op; the return value
    /// reports whether the GUID was actually held.
    pub fn release(&self, guid: Guid) -> bool {
        self.state
            .lock()
            .unwrap()
            .allocated
            .remove(&guid.as_u64())
            .is_some()
    }

    pub fn is_allocated(&self, guid: Guid) -> bool {
        self.state
            .lock()
            .unwrap()
            .allocated
            .contains_key(&guid.as_u64())
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().unwrap().allocated.len()
    }
}
