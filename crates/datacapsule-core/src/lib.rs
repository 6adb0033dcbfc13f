// Copyright [2026] [Datacapsule Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! datacapsule-core
//!
//! Core logic for Datacapsules: append-only, cryptographically-authenticated
//! logs of encrypted records, named by content hash and authorized by a
//! per-capsule writer key.
//!
//! This crate implements the pieces shared by server and clients:
//! - the crypto facade (SHA-256 naming, Ed25519 commit signatures,
//!   client-side record encryption)
//! - Merkle commit construction with configurable fanout
//! - the deterministic reader session cache kept in lock-step on both peers
//! - proof assembly (server) and proof verification (client) with the
//!   signature-avoidance policy

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod capsule;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod proof;
pub mod readstate;

pub use crate::crypto::{Hash, SignedHash, HASH_WIDTH, NULL_HASH};
pub use crate::error::{CapsuleError, CapsuleResult};
