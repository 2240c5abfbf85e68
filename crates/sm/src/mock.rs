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

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use model::{Guid, PartitionKey};

use crate::{SmError, SubnetManagerClient};

/// In-memory subnet manager that records every call, for tests.
pub struct MockSubnetManager {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    /// Maps from pkey to the GUIDs currently admitted to it
    partitions: HashMap<u16, HashSet<Guid>>,
    add_calls: Vec<(PartitionKey, Vec<Guid>)>,
    remove_calls: Vec<(PartitionKey, Vec<Guid>)>,
    fail_add: bool,
    fail_remove: bool,
}

impl MockSubnetManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Makes every subsequent `add_guids_to_pkey` call fail.
    pub fn fail_add(&self, fail: bool) {
        self.state.lock().unwrap().fail_add = fail;
    }

    /// Makes every subsequent `remove_guids_from_pkey` call fail.
    pub fn fail_remove(&self, fail: bool) {
        self.state.lock().unwrap().fail_remove = fail;
    }

    pub fn add_calls(&self) -> Vec<(PartitionKey, Vec<Guid>)> {
        self.state.lock().unwrap().add_calls.clone()
    }

    pub fn remove_calls(&self) -> Vec<(PartitionKey, Vec<Guid>)> {
        self.state.lock().unwrap().remove_calls.clone()
    }

    /// The GUIDs currently admitted to `pkey`.
    pub fn guids_in(&self, pkey: PartitionKey) -> HashSet<Guid> {
        self.state
            .lock()
            .unwrap()
            .partitions
            .get(&pkey.into())
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MockSubnetManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubnetManagerClient for MockSubnetManager {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn validate(&self) -> Result<(), SmError> {
        Ok(())
    }

    async fn add_guids_to_pkey(&self, pkey: PartitionKey, guids: &[Guid]) -> Result<(), SmError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_add {
            return Err(SmError::HttpConnectionError(
                "mock: add failure injected".to_string(),
            ));
        }

        state.add_calls.push((pkey, guids.to_vec()));
        let members = state.partitions.entry(pkey.into()).or_default();
        for guid in guids {
            members.insert(*guid);
        }

        Ok(())
    }

    async fn remove_guids_from_pkey(
        &self,
        pkey: PartitionKey,
        guids: &[Guid],
    ) -> Result<(), SmError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove {
            return Err(SmError::HttpConnectionError(
                "mock: remove failure injected".to_string(),
            ));
        }

        state.remove_calls.push((pkey, guids.to_vec()));
        if let Some(members) = state.partitions.get_mut(&pkey.into()) {
            for guid in guids {
                members.remove(guid);
            }
            if members.is_empty() {
                state.partitions.remove(&pkey.into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_and_tracks_membership() {
        let mock = MockSubnetManager::new();
        let pkey = PartitionKey::try_from("0x5").unwrap();
        let g1 = Guid::from_u64(0x0200000000000001);
        let g2 = Guid::from_u64(0x0200000000000002);

        mock.add_guids_to_pkey(pkey, &[g1, g2]).await.unwrap();
        assert_eq!(mock.guids_in(pkey), HashSet::from_iter([g1, g2]));
        assert_eq!(mock.add_calls().len(), 1);

        // Removal of an unknown pair succeeds.
        mock.remove_guids_from_pkey(pkey, &[g1, Guid::from_u64(0x99)])
            .await
            .unwrap();
        assert_eq!(mock.guids_in(pkey), HashSet::from_iter([g2]));

        mock.fail_add(true);
        assert!(mock.add_guids_to_pkey(pkey, &[g1]).await.is_err());
        mock.fail_add(false);
        assert!(mock.add_guids_to_pkey(pkey, &[g1]).await.is_ok());
    }
}
