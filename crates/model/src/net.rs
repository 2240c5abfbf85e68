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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::guid::Guid;

/// Pod annotation carrying the JSON list of secondary network selections.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

/// `cni-args` key marking a selection as picked up by the node-level CNI.
pub const INFINIBAND_ANNOTATION: &str = "mellanox.infiniband.app";

/// Value of [`INFINIBAND_ANNOTATION`] once the interface is delivered.
pub const CONFIGURED_INFINIBAND: &str = "configured";

/// `cni-args` key under which the allocated GUID is persisted.
pub const GUID_CNI_ARG: &str = "guid";

/// CNI `type` identifying an InfiniBand SR-IOV network.
pub const IB_SRIOV_CNI_TYPE: &str = "ib-sriov";

#[derive(Error, Debug)]
pub enum NetConfError {
    #[error("pod has no network-selection annotation")]
    NoNetworksAnnotation,
    #[error("failed to parse network-selection annotation: {0}")]
    InvalidSelections(#[source] serde_json::Error),
    #[error("failed to serialize network-selection annotation: {0}")]
    SerializeSelections(#[source] serde_json::Error),
    #[error("network '{0}' not found in pod network-selection annotation")]
    NetworkNotFound(String),
    #[error("network '{0}' has no GUID in its cni-args")]
    MissingGuid(String),
    #[error("network attachment config is not valid JSON: {0}")]
    InvalidAttachmentConfig(#[source] serde_json::Error),
    #[error("network attachment config has no 'ib-sriov' CNI entry")]
    NotIbSriov,
}

/// One element of the pod's network-selection annotation.
///
/// Fields the controller does not own (`ips`, `mac`, interface requests, ...)
/// are preserved verbatim across a parse/serialize round trip.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkSelectionElement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "cni-args", default, skip_serializing_if = "Option::is_none")]
    pub cni_args: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NetworkSelectionElement {
    /// Whether the node-level CNI has already applied this selection.
    pub fn is_configured(&self) -> bool {
        self.cni_args
            .as_ref()
            .and_then(|args| args.get(INFINIBAND_ANNOTATION))
            .and_then(Value::as_str)
            == Some(CONFIGURED_INFINIBAND)
    }

    pub fn set_configured(&mut self) {
        self.cni_args.get_or_insert_with(Map::new).insert(
            INFINIBAND_ANNOTATION.to_string(),
            Value::String(CONFIGURED_INFINIBAND.to_string()),
        );
    }

    /// The GUID persisted under `cni-args`, if any.
    pub fn guid(&self) -> Option<&str> {
        self.cni_args
            .as_ref()
            .and_then(|args| args.get(GUID_CNI_ARG))
            .and_then(Value::as_str)
    }

    pub fn set_guid(&mut self, guid: &Guid) {
        self.cni_args
            .get_or_insert_with(Map::new)
            .insert(GUID_CNI_ARG.to_string(), Value::String(guid.to_string()));
    }
}

/// Parses the raw network-selection annotation. Only the JSON array form is
/// accepted.
pub fn parse_selections(raw: &str) -> Result<Vec<NetworkSelectionElement>, NetConfError> {
    serde_json::from_str(raw).map_err(NetConfError::InvalidSelections)
}

pub fn serialize_selections(
    selections: &[NetworkSelectionElement],
) -> Result<String, NetConfError> {
    serde_json::to_string(selections).map_err(NetConfError::SerializeSelections)
}

/// Finds the selection entry for `network` within a pod's parsed selections.
pub fn find_selection<'a>(
    selections: &'a mut [NetworkSelectionElement],
    network: &str,
) -> Result<&'a mut NetworkSelectionElement, NetConfError> {
    selections
        .iter_mut()
        .find(|selection| selection.name == network)
        .ok_or_else(|| NetConfError::NetworkNotFound(network.to_string()))
}

/// The subset of the ib-sriov CNI spec the controller consumes.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct IbSriovCniSpec {
    #[serde(rename = "type")]
    pub cni_type: String,
    #[serde(default)]
    pub pkey: Option<String>,
}

/// Extracts the ib-sriov sub-spec from a NetworkAttachmentDefinition config.
///
/// Accepts both the flat form (`{"type": "ib-sriov", ...}`) and the conflist
/// form (`{"plugins": [...]}`) with an ib-sriov entry somewhere in the chain.
pub fn ib_sriov_spec(config: &str) -> Result<IbSriovCniSpec, NetConfError> {
    let parsed: Value =
        serde_json::from_str(config).map_err(NetConfError::InvalidAttachmentConfig)?;

    let candidates: Vec<&Value> = match parsed.get("plugins").and_then(Value::as_array) {
        Some(plugins) => plugins.iter().collect(),
        None => vec![&parsed],
    };

    for candidate in candidates {
        if candidate.get("type").and_then(Value::as_str) == Some(IB_SRIOV_CNI_TYPE) {
            return serde_json::from_value(candidate.clone())
                .map_err(NetConfError::InvalidAttachmentConfig);
        }
    }

    Err(NetConfError::NotIbSriov)
}
