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

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use model::{Guid, PartitionKey};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{SmError, SubnetManagerClient};

#[derive(Deserialize, Debug, Clone)]
pub struct OpenSmConfig {
    /// The partition configuration file OpenSM is pointed at
    /// (`partition_config_file` in opensm.conf).
    pub partitions_file: PathBuf,
}

/// Programs partition membership by rewriting an OpenSM partitions.conf.
///
/// Only partitions whose line parses into `(pkey, guid list)` are managed;
/// any other line (the Default partition, ALL-port partitions, comments) is
/// preserved verbatim. OpenSM itself picks the file up on SIGHUP or its
/// periodic re-scan.
pub struct OpenSmSubnetManager {
    conf: OpenSmConfig,
    /// The add and delete reconcilers both rewrite the file; their
    /// read-modify-write cycles must not interleave.
    file_lock: Mutex<()>,
}

#[derive(Default, Debug, PartialEq)]
struct PartitionsFile {
    /// Lines this controller does not own, preserved verbatim.
    foreign: Vec<String>,
    /// Managed membership, keyed by pkey.
    partitions: BTreeMap<u16, BTreeSet<u64>>,
}

impl OpenSmSubnetManager {
    pub fn new(conf: OpenSmConfig) -> Self {
        Self {
            conf,
            file_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<PartitionsFile, SmError> {
        match tokio::fs::read_to_string(&self.conf.partitions_file).await {
            Ok(content) => Ok(PartitionsFile::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PartitionsFile::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn store(&self, file: &PartitionsFile) -> Result<(), SmError> {
        // Write-then-rename so OpenSM never reads a half-written file.
        let tmp_path = self.conf.partitions_file.with_extension("tmp");
        tokio::fs::write(&tmp_path, file.render())
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp_path, &self.conf.partitions_file)
            .await
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> SmError {
        SmError::Io {
            path: self.conf.partitions_file.clone(),
            source,
        }
    }
}

#[async_trait]
impl SubnetManagerClient for OpenSmSubnetManager {
    fn name(&self) -> &'static str {
        "opensm"
    }

    async fn validate(&self) -> Result<(), SmError> {
        let _guard = self.file_lock.lock().await;
        let file = self.load().await?;
        // Prove the file is writable before the reconcilers depend on it.
        self.store(&file).await
    }

    async fn add_guids_to_pkey(&self, pkey: PartitionKey, guids: &[Guid]) -> Result<(), SmError> {
        let _guard = self.file_lock.lock().await;
        let mut file = self.load().await?;

        let members = file.partitions.entry(pkey.into()).or_default();
        for guid in guids {
            members.insert(guid.as_u64());
        }

        self.store(&file).await
    }

    async fn remove_guids_from_pkey(
        &self,
        pkey: PartitionKey,
        guids: &[Guid],
    ) -> Result<(), SmError> {
        let _guard = self.file_lock.lock().await;
        let mut file = self.load().await?;

        let raw_pkey: u16 = pkey.into();
        if let Some(members) = file.partitions.get_mut(&raw_pkey) {
            for guid in guids {
                members.remove(&guid.as_u64());
            }
            if members.is_empty() {
                file.partitions.remove(&raw_pkey);
            }
        }

        self.store(&file).await
    }
}

impl PartitionsFile {
    fn parse(content: &str) -> Self {
        let mut file = PartitionsFile::default();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match parse_partition_line(trimmed) {
                Some((pkey, members)) => {
                    file.partitions.entry(pkey).or_default().extend(members);
                }
                None => file.foreign.push(line.to_string()),
            }
        }

        file
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.foreign {
            out.push_str(line);
            out.push('\n');
        }
        for (pkey, members) in &self.partitions {
            let guids = members
                .iter()
                .map(|guid| format!("0x{guid:016x}=full"))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "pkey_0x{pkey:04x}=0x{pkey:04x}, ipoib, defmember=full : {guids};\n"
            ));
        }
        out
    }
}

/// Parses `name=0xPKEY, <flags> : 0xGUID[=membership], ... ;` into
/// `(pkey, guids)`. Lines that do not match (comments, ALL-port partitions)
/// yield `None` and are left alone.
fn parse_partition_line(line: &str) -> Option<(u16, BTreeSet<u64>)> {
    if line.starts_with('#') {
        return None;
    }

    let (header, members) = line.split_once(':')?;
    let (_name, value) = header.split_once('=')?;
    let pkey_token = value.split(',').next()?.trim();
    let pkey = u16::from_str_radix(pkey_token.strip_prefix("0x")?, 16).ok()?;

    let mut guids = BTreeSet::new();
    for token in members.trim().trim_end_matches(';').split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let guid_token = match token.split_once('=') {
            Some((guid, _membership)) => guid,
            None => token,
        };
        let guid = u64::from_str_radix(guid_token.strip_prefix("0x")?, 16).ok()?;
        guids.insert(guid);
    }

    Some((pkey, guids))
}
