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

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GuidError {
    #[error("Invalid GUID '{0}'")]
    InvalidGuid(String),
}

/// A 64-bit InfiniBand port GUID.
///
/// Rendered as eight colon-separated hex octets (`02:00:00:00:00:00:00:01`).
/// The all-zeros and all-ones values are reserved by the fabric and must
/// never be assigned to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(u64);

impl Guid {
    pub const fn from_u64(raw: u64) -> Self {
        Guid(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is one of the two sentinel values reserved by the fabric.
    pub const fn is_reserved(&self) -> bool {
        self.0 == 0 || self.0 == u64::MAX
    }

    /// The separator-free 16-digit form used on the UFM wire
    /// (`0200000000000001`).
    pub fn to_wire(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            octets[0],
            octets[1],
            octets[2],
            octets[3],
            octets[4],
            octets[5],
            octets[6],
            octets[7]
        )
    }
}

impl FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 8];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| GuidError::InvalidGuid(s.to_string()))?;
            if part.len() != 2 {
                return Err(GuidError::InvalidGuid(s.to_string()));
            }
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| GuidError::InvalidGuid(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(GuidError::InvalidGuid(s.to_string()));
        }

        Ok(Guid(u64::from_be_bytes(octets)))
    }
}
