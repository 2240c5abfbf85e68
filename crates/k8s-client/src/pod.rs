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

//! Helpers bridging pod metadata and the network-selection model.

use k8s_openapi::api::core::v1::Pod;
use model::net::{self, NETWORKS_ANNOTATION, NetConfError, NetworkSelectionElement};

pub fn pod_uid(pod: &Pod) -> String {
    pod.metadata.uid.clone().unwrap_or_default()
}

pub fn pod_namespace(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or("default")
}

pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("<unknown>")
}

/// Parses the pod's network-selection annotation.
pub fn pod_networks(pod: &Pod) -> Result<Vec<NetworkSelectionElement>, NetConfError> {
    let raw = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(NETWORKS_ANNOTATION))
        .ok_or(NetConfError::NoNetworksAnnotation)?;

    net::parse_selections(raw)
}

/// Serializes `selections` back into the pod's local annotation map.
pub fn set_pod_networks(
    pod: &mut Pod,
    selections: &[NetworkSelectionElement],
) -> Result<(), NetConfError> {
    let serialized = net::serialize_selections(selections)?;
    pod.metadata
        .annotations
        .get_or_insert_default()
        .insert(NETWORKS_ANNOTATION.to_string(), serialized);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::test_pod;

    #[test]
    fn test_pod_networks_round_trip() {
        let mut pod = test_pod(
            "default",
            "w1",
            "uid-1",
            Some(r#"[{"name": "ibnet"}]"#),
        );

        let mut selections = pod_networks(&pod).unwrap();
        assert_eq!(selections.len(), 1);
        selections[0].set_configured();
        set_pod_networks(&mut pod, &selections).unwrap();

        let reparsed = pod_networks(&pod).unwrap();
        assert!(reparsed[0].is_configured());
    }

    #[test]
    fn test_pod_without_annotation() {
        let pod = test_pod("default", "w1", "uid-1", None);
        assert!(matches!(
            pod_networks(&pod),
            Err(NetConfError::NoNetworksAnnotation)
        ));
    }
}
