/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
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
use model::{Guid, PartitionKey};

use crate::{SmError, SubnetManagerClient};

/// A client for fabrics whose partition membership is managed out-of-band.
/// Accepts every request and programs nothing.
pub struct NoopSubnetManager;

#[async_trait]
impl SubnetManagerClient for NoopSubnetManager {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn validate(&self) -> Result<(), SmError> {
        Ok(())
    }

    async fn add_guids_to_pkey(&self, pkey: PartitionKey, guids: &[Guid]) -> Result<(), SmError> {
        tracing::debug!(%pkey, count = guids.len(), "noop: skipping pkey membership add");
        Ok(())
    }

    async fn remove_guids_from_pkey(
        &self,
        pkey: PartitionKey,
        guids: &[Guid],
    ) -> Result<(), SmError> {
        tracing::debug!(%pkey, count = guids.len(), "noop: skipping pkey membership remove");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_accepts_everything() {
        let client = NoopSubnetManager;
        let pkey = PartitionKey::try_from("0x5").unwrap();
        let guids = vec![Guid::from_u64(0x0200000000000001)];

        assert!(client.validate().await.is_ok());
        assert!(client.add_guids_to_pkey(pkey, &guids).await.is_ok());
        assert!(client.remove_guids_from_pkey(pkey, &guids).await.is_ok());
        assert!(client.remove_guids_from_pkey(pkey, &[]).await.is_ok());
    }
}
