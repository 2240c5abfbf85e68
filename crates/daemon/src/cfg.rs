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

use clap::{ArgAction, Parser};
use model::{Guid, GuidError};
use serde::Deserialize;
use thiserror::Error;

#[derive(Parser)]
#[clap(name = "ib-fabric-controller")]
pub struct Options {
    #[clap(long, default_value = "false", help = "Print version number and exit")]
    pub version: bool,

    #[clap(short, long, action = ArgAction::Count)]
    pub debug: u8,

    /// Path to the configuration file.
    /// Plugin secrets (UFM password or token) can also be provided through
    /// the `UFM_PASSWORD` / `UFM_TOKEN` environment variables instead of the
    /// file.
    #[clap(long, required_unless_present = "version")]
    pub config_path: Option<String>,
}

impl Options {
    pub fn load() -> Self {
        Self::parse()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("periodic_update must be at least 1 second, got {0}")]
    InvalidPeriodicUpdate(u64),
    #[error("invalid GUID range bound: {0}")]
    InvalidRangeBound(#[from] GuidError),
    #[error("GUID range bound {0} is a reserved sentinel value")]
    ReservedRangeBound(Guid),
    #[error("GUID range start {start} is after range end {end}")]
    RangeStartAfterEnd { start: Guid, end: Guid },
}

pub const DEFAULT_RANGE_START: &str = "02:00:00:00:00:00:00:00";
pub const DEFAULT_RANGE_END: &str = "02:ff:ff:ff:ff:ff:ff:ff";

fn default_range_start() -> String {
    DEFAULT_RANGE_START.to_string()
}

fn default_range_end() -> String {
    DEFAULT_RANGE_END.to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct GuidPoolConfig {
    #[serde(default = "default_range_start")]
    pub range_start: String,
    #[serde(default = "default_range_end")]
    pub range_end: String,
}

impl Default for GuidPoolConfig {
    fn default() -> Self {
        GuidPoolConfig {
            range_start: default_range_start(),
            range_end: default_range_end(),
        }
    }
}

impl GuidPoolConfig {
    /// The validated, inclusive `[start, end]` range.
    pub fn range(&self) -> Result<(Guid, Guid), ConfigError> {
        let start: Guid = self.range_start.parse()?;
        let end: Guid = self.range_end.parse()?;

        for bound in [start, end] {
            if bound.is_reserved() {
                return Err(ConfigError::ReservedRangeBound(bound));
            }
        }
        if start > end {
            return Err(ConfigError::RangeStartAfterEnd { start, end });
        }

        Ok((start, end))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    /// Reconciler cadence in seconds.
    pub periodic_update: u64,
    /// Subnet manager plugin name: `ufm`, `opensm` or `noop`.
    pub plugin: String,
    #[serde(default)]
    pub guid_pool: GuidPoolConfig,
    /// Per-plugin configuration sections (`ufm`, `opensm`).
    #[serde(flatten)]
    pub sm: sm::SmConfig,
}

impl DaemonConfig {
    pub async fn load(path: &str) -> eyre::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let config: DaemonConfig = serde_json::from_str(&raw)?;

        Ok(config)
    }

    /// Checks everything that does not need a collaborator. The plugin name
    /// is validated by the plugin registry at load time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periodic_update == 0 {
            return Err(ConfigError::InvalidPeriodicUpdate(self.periodic_update));
        }
        self.guid_pool.range()?;

        Ok(())
    }
}
