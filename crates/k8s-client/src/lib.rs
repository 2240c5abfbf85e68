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

//! Orchestrator collaborator: the narrow slice of the Kubernetes API the
//! fabric controller consumes, behind a trait so the reconcilers can run
//! against an in-memory cluster in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

mod client;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod nad;
pub mod pod;

pub use client::{KubeOrchestrator, connect};
pub use nad::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{kind} '{id}' was not found")]
    NotFound { kind: &'static str, id: String },
    #[error("pod '{0}' has no metadata.name")]
    IncompletePod(String),
}

impl ClientError {
    /// Whether the error means the target object does not exist. The add
    /// reconciler uses this to tell a deleted pod apart from a transient
    /// write failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::NotFound { .. } => true,
            ClientError::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

#[async_trait]
pub trait PodOrchestrator: Send + Sync {
    /// Lists the entire current pod population, across namespaces.
    async fn list_pods(&self) -> Result<Vec<Pod>, ClientError>;

    async fn get_network_attachment_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkAttachmentDefinition, ClientError>;

    /// Replaces the pod's annotations. A pod deleted since it was observed
    /// surfaces as an `is_not_found` error.
    async fn set_annotations_on_pod(
        &self,
        pod: &Pod,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClientError>;
}
