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

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const HEX_PRE: &str = "0x";

/// The default partition. Membership is implicit, never programmed.
pub const DEFAULT_PKEY: u16 = 0x0000;
/// The management partition. Owned by the subnet manager itself.
pub const MANAGEMENT_PKEY: u16 = 0x7fff;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PKeyError {
    #[error("Invalid pkey '{0}'")]
    InvalidPKey(String),
}

/// A 15-bit InfiniBand partition key.
///
/// The top bit of the 16-bit on-wire value is the full-membership flag and is
/// not part of the key; string parsing masks it off, while `TryFrom<u16>`
/// rejects values that carry it.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(u16);

impl PartitionKey {
    /// Whether this key identifies one of the partitions the controller must
    /// never program: the default partition and the management partition.
    pub const fn is_reserved(&self) -> bool {
        self.0 == DEFAULT_PKEY || self.0 == MANAGEMENT_PKEY
    }
}

impl TryFrom<u16> for PartitionKey {
    type Error = PKeyError;

    fn try_from(pkey: u16) -> Result<Self, Self::Error> {
        if pkey != (pkey & 0x7fff) {
            return Err(PKeyError::InvalidPKey(pkey.to_string()));
        }

        Ok(PartitionKey(pkey))
    }
}

impl TryFrom<&str> for PartitionKey {
    type Error = PKeyError;

    fn try_from(pkey: &str) -> Result<Self, Self::Error> {
        let lowered = pkey.to_lowercase();
        let digits = lowered.trim_start_matches(HEX_PRE);

        match u16::from_str_radix(digits, 16) {
            Ok(v) => Ok(PartitionKey(v & 0x7fff)),
            Err(_) => Err(PKeyError::InvalidPKey(pkey.to_string())),
        }
    }
}

impl TryFrom<&String> for PartitionKey {
    type Error = PKeyError;

    fn try_from(pkey: &String) -> Result<Self, Self::Error> {
        PartitionKey::try_from(pkey.as_str())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{HEX_PRE}{:x}", self.0)
    }
}

impl From<PartitionKey> for u16 {
    fn from(v: PartitionKey) -> u16 {
        v.0
    }
}
