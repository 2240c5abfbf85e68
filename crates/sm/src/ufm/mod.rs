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

use async_trait::async_trait;
use base64::prelude::*;
use model::{Guid, PartitionKey};
use serde::{Deserialize, Serialize};
use url::Url;

use self::rest::{RestClient, RestClientConfig, RestScheme};
use crate::{SmError, SubnetManagerClient};

mod rest;

#[derive(Deserialize, Debug, Clone)]
pub struct UfmConfig {
    /// UFM endpoint, e.g. `https://ufm.mgmt:443`.
    pub address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// UFM access token. Takes precedence over username/password and selects
    /// the `/ufmRestV3` API surface.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum PortMembership {
    Limited,
    Full,
}

/// Payload of `POST /resources/pkeys`. UFM creates the partition on demand
/// and merges the GUID list into the existing membership.
#[derive(Serialize, Deserialize, Debug)]
struct BindPorts {
    pkey: String,
    ip_over_ib: bool,
    /// Store the PKey at index 0 of the PKey table of each GUID.
    index0: bool,
    membership: PortMembership,
    guids: Vec<String>,
}

/// Payload of `POST /actions/remove_guids_from_pkey`.
#[derive(Serialize, Deserialize, Debug)]
struct UnbindPorts {
    pkey: String,
    guids: Vec<String>,
}

/// Subnet manager client backed by the UFM enterprise fabric manager.
pub struct UfmSubnetManager {
    client: RestClient,
}

impl UfmSubnetManager {
    pub fn new(mut conf: UfmConfig) -> Result<Self, SmError> {
        // Secrets may come from the environment rather than the config file.
        if conf.token.is_none()
            && let Ok(token) = std::env::var("UFM_TOKEN")
        {
            conf.token = Some(token);
        }
        if conf.username.is_none()
            && let Ok(username) = std::env::var("UFM_USERNAME")
        {
            conf.username = Some(username);
        }
        if conf.password.is_none()
            && let Ok(password) = std::env::var("UFM_PASSWORD")
        {
            conf.password = Some(password);
        }

        let addr = Url::parse(&conf.address)
            .map_err(|_| SmError::InvalidConfig(format!("invalid UFM url: {}", conf.address)))?;
        let address = addr.host_str().ok_or(SmError::InvalidConfig(format!(
            "invalid UFM host; url: {addr}"
        )))?;

        let (base_path, auth_info) = match &conf.token {
            Some(t) => ("/ufmRestV3".to_string(), t.to_string()),
            None => {
                let username = conf
                    .username
                    .clone()
                    .ok_or(SmError::InvalidConfig("username is empty".to_string()))?;
                let password = conf
                    .password
                    .clone()
                    .ok_or(SmError::InvalidConfig("password is empty".to_string()))?;

                (
                    "/ufmRest".to_string(),
                    BASE64_STANDARD.encode(format!("{username}:{password}")),
                )
            }
        };

        let client = RestClient::new(&RestClientConfig {
            address: address.to_string(),
            port: addr.port(),
            auth_info,
            base_path,
            scheme: RestScheme::from(addr.scheme().to_string()),
        })?;

        Ok(Self { client })
    }

    async fn version(&self) -> Result<String, SmError> {
        #[derive(Serialize, Deserialize, Debug)]
        struct Version {
            ufm_release_version: String,
        }

        let v: Version = self.client.get("/app/ufm_version").await?;

        Ok(v.ufm_release_version)
    }
}

#[async_trait]
impl SubnetManagerClient for UfmSubnetManager {
    fn name(&self) -> &'static str {
        "ufm"
    }

    async fn validate(&self) -> Result<(), SmError> {
        let version = self.version().await?;
        tracing::info!(%version, "connected to UFM");

        Ok(())
    }

    async fn add_guids_to_pkey(&self, pkey: PartitionKey, guids: &[Guid]) -> Result<(), SmError> {
        let bind = BindPorts {
            pkey: pkey.to_string(),
            ip_over_ib: true,
            index0: true,
            membership: PortMembership::Full,
            guids: guids.iter().map(Guid::to_wire).collect(),
        };

        let data = serde_json::to_string(&bind)
            .map_err(|_| SmError::InvalidConfig("invalid partition".to_string()))?;

        self.client.post("/resources/pkeys", data).await
    }

    async fn remove_guids_from_pkey(
        &self,
        pkey: PartitionKey,
        guids: &[Guid],
    ) -> Result<(), SmError> {
        let unbind = UnbindPorts {
            pkey: pkey.to_string(),
            guids: guids.iter().map(Guid::to_wire).collect(),
        };

        let data = serde_json::to_string(&unbind)
            .map_err(|_| SmError::InvalidConfig("invalid partition".to_string()))?;

        match self.client.post("/actions/remove_guids_from_pkey", data).await {
            // The pair is already gone; removal is idempotent.
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ports_wire_format() {
        let pkey = PartitionKey::try_from("0x5").unwrap();
        let bind = BindPorts {
            pkey: pkey.to_string(),
            ip_over_ib: true,
            index0: true,
            membership: PortMembership::Full,
            guids: vec![
                Guid::from_u64(0x0200000000000001).to_wire(),
                Guid::from_u64(0x946dae03005985c8).to_wire(),
            ],
        };

        let serialized = serde_json::to_value(&bind).unwrap();
        assert_eq!(
            serialized,
            serde_json::json!({
                "pkey": "0x5",
                "ip_over_ib": true,
                "index0": true,
                "membership": "full",
                "guids": ["0200000000000001", "946dae03005985c8"],
            })
        );
    }

    #[test]
    fn test_unbind_ports_wire_format() {
        let unbind = UnbindPorts {
            pkey: PartitionKey::try_from("0x2fb").unwrap().to_string(),
            guids: vec![Guid::from_u64(0x946dae03005985c8).to_wire()],
        };

        let serialized = serde_json::to_value(&unbind).unwrap();
        assert_eq!(
            serialized,
            serde_json::json!({
                "pkey": "0x2fb",
                "guids": ["946dae03005985c8"],
            })
        );
    }

    #[test]
    fn test_new_rejects_incomplete_config() {
        // Not a URL at all.
        assert!(
            UfmSubnetManager::new(UfmConfig {
                address: "".to_string(),
                username: None,
                password: None,
                token: Some("abc".to_string()),
            })
            .is_err()
        );

        // Token alone is enough.
        assert!(
            UfmSubnetManager::new(UfmConfig {
                address: "https://ufm.example:443".to_string(),
                username: None,
                password: None,
                token: Some("abc".to_string()),
            })
            .is_ok()
        );

        // Username and password together are enough.
        assert!(
            UfmSubnetManager::new(UfmConfig {
                address: "http://ufm.example".to_string(),
                username: Some("admin".to_string()),
                password: Some("123456".to_string()),
                token: None,
            })
            .is_ok()
        );
    }
}
