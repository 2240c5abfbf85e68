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

//! Data model shared between the fabric controller daemon and the
//! subnet manager clients.

pub mod guid;
pub mod net;
pub mod pkey;

pub use guid::{Guid, GuidError};
pub use net::{IbSriovCniSpec, NetConfError, NetworkSelectionElement};
pub use pkey::{PKeyError, PartitionKey};
