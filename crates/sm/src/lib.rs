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

//! Subnet manager clients.
//!
//! Each implementation programs InfiniBand partition membership through a
//! different fabric authority: the UFM enterprise manager (`ufm`), a local
//! OpenSM partition configuration file (`opensm`), or nothing at all
//! (`noop`, for fabrics whose partitions are managed out-of-band).
//! Implementations are selected by name from a compile-time registry.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use model::{Guid, PartitionKey};
use serde::Deserialize;
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod noop;
pub mod opensm;
pub mod ufm;

#[derive(Error, Debug)]
pub enum SmError {
    #[error("Invalid configuration: '{0}'")]
    InvalidConfig(String),
    #[error("unknown subnet manager plugin '{0}'")]
    UnknownPlugin(String),
    #[error("failed to execute HTTP request: {0}")]
    HttpConnectionError(String),
    #[error("HTTP error code {status_code}")]
    HttpError { status_code: u16, body: String },
    /// UFM in some cases does not return a 404 status code but a 200 status
    /// code with a body containing {}
    #[error("resource at path {path} was not found, response body: '{body}'")]
    NotFound { path: String, body: String },
    #[error("response body can not be deserialized: {body}")]
    MalformedResponse { status_code: u16, body: String },
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SmError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SmError::NotFound { .. })
    }
}

/// The contract every subnet manager client implements.
///
/// `add_guids_to_pkey` and `remove_guids_from_pkey` must be idempotent per
/// `(pkey, guid)` pair: the reconciler retries failed batches and may submit
/// the same pair again. Removing an unknown pair succeeds.
#[async_trait]
pub trait SubnetManagerClient: Send + Sync {
    /// Stable identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Verifies configuration and connectivity. Called once at startup;
    /// failure is fatal for the daemon.
    async fn validate(&self) -> Result<(), SmError>;

    /// Admits each GUID into the partition.
    async fn add_guids_to_pkey(&self, pkey: PartitionKey, guids: &[Guid]) -> Result<(), SmError>;

    /// Withdraws each GUID from the partition.
    async fn remove_guids_from_pkey(
        &self,
        pkey: PartitionKey,
        guids: &[Guid],
    ) -> Result<(), SmError>;
}

/// Per-plugin configuration sections. Only the section for the selected
/// plugin has to be present.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SmConfig {
    #[serde(default)]
    pub ufm: Option<ufm::UfmConfig>,
    #[serde(default)]
    pub opensm: Option<opensm::OpenSmConfig>,
}

/// Resolves a subnet manager client by plugin name.
pub fn load_plugin(name: &str, config: &SmConfig) -> Result<Arc<dyn SubnetManagerClient>, SmError> {
    match name {
        "ufm" => {
            let conf = config.ufm.clone().ok_or_else(|| {
                SmError::InvalidConfig(
                    "plugin 'ufm' selected but the 'ufm' configuration section is missing"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(ufm::UfmSubnetManager::new(conf)?))
        }
        "opensm" => {
            let conf = config.opensm.clone().ok_or_else(|| {
                SmError::InvalidConfig(
                    "plugin 'opensm' selected but the 'opensm' configuration section is missing"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(opensm::OpenSmSubnetManager::new(conf)))
        }
        "noop" => Ok(Arc::new(noop::NoopSubnetManager)),
        other => Err(SmError::UnknownPlugin(other.to_string())),
    }
}
