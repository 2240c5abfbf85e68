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

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};

use crate::pod::{pod_namespace, pod_uid};
use crate::{ClientError, NetworkAttachmentDefinition, PodOrchestrator};

/// Builds a client from the in-cluster service account or, outside a
/// cluster, the local kubeconfig.
pub async fn connect() -> Result<kube::Client, ClientError> {
    Ok(kube::Client::try_default().await?)
}

pub struct KubeOrchestrator {
    client: kube::Client,
}

impl KubeOrchestrator {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodOrchestrator for KubeOrchestrator {
    async fn list_pods(&self) -> Result<Vec<Pod>, ClientError> {
        let pods: Api<Pod> = Api::all(self.client.clone());

        Ok(pods.list(&ListParams::default()).await?.items)
    }

    async fn get_network_attachment_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkAttachmentDefinition, ClientError> {
        let api: Api<NetworkAttachmentDefinition> =
            Api::namespaced(self.client.clone(), namespace);

        api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ref resp) if resp.code == 404 => ClientError::NotFound {
                kind: "network-attachment-definition",
                id: format!("{namespace}/{name}"),
            },
            e => ClientError::Kube(e),
        })
    }

    async fn set_annotations_on_pod(
        &self,
        pod: &Pod,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClientError> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClientError::IncompletePod(pod_uid(pod)))?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), pod_namespace(pod));

        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations,
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref resp) if resp.code == 404 => ClientError::NotFound {
                    kind: "pod",
                    id: format!("{}/{name}", pod_namespace(pod)),
                },
                e => ClientError::Kube(e),
            })?;

        Ok(())
    }
}
