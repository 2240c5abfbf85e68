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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use model::net::NETWORKS_ANNOTATION;

use crate::{
    ClientError, NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec, PodOrchestrator,
};

/// In-memory cluster for tests: a pod store, a NetworkAttachmentDefinition
/// store, and a log of annotation writes.
pub struct MockOrchestrator {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    /// Pods keyed by UID.
    pods: HashMap<String, Pod>,
    /// NADs keyed by (namespace, name).
    nads: HashMap<(String, String), NetworkAttachmentDefinition>,
    /// Committed annotation writes as (pod UID, annotations).
    annotation_writes: Vec<(String, BTreeMap<String, String>)>,
    fail_nad_fetch: bool,
    fail_annotation_write: bool,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn insert_pod(&self, pod: Pod) {
        let uid = pod.metadata.uid.clone().unwrap_or_default();
        self.state.lock().unwrap().pods.insert(uid, pod);
    }

    /// Removes the pod, as if it was deleted behind the controller's back.
    pub fn remove_pod(&self, uid: &str) {
        self.state.lock().unwrap().pods.remove(uid);
    }

    pub fn insert_network(&self, namespace: &str, name: &str, config: &str) {
        let nad = NetworkAttachmentDefinition {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec: NetworkAttachmentDefinitionSpec {
                config: Some(config.to_string()),
            },
        };
        self.state
            .lock()
            .unwrap()
            .nads
            .insert((namespace.to_string(), name.to_string()), nad);
    }

    /// The current state of a stored pod.
    pub fn pod(&self, uid: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(uid).cloned()
    }

    pub fn annotation_writes(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.state.lock().unwrap().annotation_writes.clone()
    }

    /// Makes NAD fetches fail with a transient (retriable) error.
    pub fn fail_nad_fetch(&self, fail: bool) {
        self.state.lock().unwrap().fail_nad_fetch = fail;
    }

    /// Makes annotation writes fail with a transient (non-404) error.
    pub fn fail_annotation_write(&self, fail: bool) {
        self.state.lock().unwrap().fail_annotation_write = fail;
    }
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn transient_error(message: &str) -> ClientError {
    ClientError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

#[async_trait]
impl PodOrchestrator for MockOrchestrator {
    async fn list_pods(&self) -> Result<Vec<Pod>, ClientError> {
        Ok(self.state.lock().unwrap().pods.values().cloned().collect())
    }

    async fn get_network_attachment_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkAttachmentDefinition, ClientError> {
        let state = self.state.lock().unwrap();
        if state.fail_nad_fetch {
            return Err(transient_error("mock: nad fetch failure injected"));
        }

        state
            .nads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClientError::NotFound {
                kind: "network-attachment-definition",
                id: format!("{namespace}/{name}"),
            })
    }

    async fn set_annotations_on_pod(
        &self,
        pod: &Pod,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClientError> {
        let uid = pod.metadata.uid.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if state.fail_annotation_write {
            return Err(transient_error("mock: annotation write failure injected"));
        }

        match state.pods.get_mut(&uid) {
            Some(stored) => {
                stored.metadata.annotations = Some(annotations.clone());
            }
            None => {
                return Err(ClientError::NotFound {
                    kind: "pod",
                    id: uid,
                });
            }
        }
        state.annotation_writes.push((uid, annotations.clone()));

        Ok(())
    }
}

/// Builds a pod with the given identity and, optionally, a raw
/// network-selection annotation.
pub fn test_pod(namespace: &str, name: &str, uid: &str, networks: Option<&str>) -> Pod {
    let annotations = networks.map(|raw| {
        BTreeMap::from_iter([(NETWORKS_ANNOTATION.to_string(), raw.to_string())])
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            annotations,
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}
