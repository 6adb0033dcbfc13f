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

//! datacapsule-protocol
//!
//! The wire vocabulary shared by the daemon and its clients. Every message
//! travels as one length-prefixed frame (see [`framing`]) carrying a
//! `serde_json`-encoded [`Request`] or [`Response`]. Hashes, keys and
//! signatures are hex strings. An *empty* frame is the coarse failure /
//! rejection response: it deliberately does not say why.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod framing;

use serde::{Deserialize, Serialize};

use datacapsule_core::capsule::CapsuleMetadata;
use datacapsule_core::proof::Proof;
use datacapsule_core::{Hash, SignedHash};

pub const PROTOCOL_VERSION: u32 = 1;

/// Default cap on a single frame, shared by both peers.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Init(InitRequest),
    Create(CreateRequest),
    Write(WriteRequest),
    Read(ReadRequest),
    Subscribe(SubscribeRequest),
}

/// First frame on every connection: pick a role, and for the capsule-bound
/// roles name the target Datacapsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitRequest {
    Creator,
    Writer(#[serde(with = "hex")] Hash),
    Reader(#[serde(with = "hex")] Hash),
    Subscriber(#[serde(with = "hex")] Hash),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub metadata: CapsuleMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteRequest {
    /// Stage one encrypted record. `seq` is writer-assigned and must equal
    /// the capsule's committed count plus the staged count.
    Record {
        #[serde(with = "hex")]
        data: Vec<u8>,
        seq: u64,
    },
    /// Commit the staged batch under the given root.
    Commit {
        #[serde(with = "hex")]
        root: Hash,
        #[serde(with = "hex")]
        signature: Vec<u8>,
        include_prev_root: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadRequest {
    Data(#[serde(with = "hex")] Hash),
    Proof(#[serde(with = "hex")] Hash),
    /// Replay a persisted cache into the fresh session, on both sides.
    StartCache(#[serde(with = "hash_seq")] Vec<Hash>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscribeRequest {
    LastNum,
    NameFromNum(u64),
    NumFromName(#[serde(with = "hex")] Hash),
    WaitAfter(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Init accepted; the role loop may begin.
    Init,
    /// Capsule created; the server countersigns the capsule id.
    Create(SignedHash),
    /// Record staged.
    WriteAck,
    /// Commit durable; the server countersigns the new root.
    Commit(SignedHash),
    Data(#[serde(with = "hex")] Vec<u8>),
    Proof(Proof),
    CacheStarted,
    Num(u64),
    Name(#[serde(with = "hex")] Hash),
    /// Typed not-found for reads and subscriber lookups.
    Absent,
}

mod hash_seq {
    use datacapsule_core::Hash;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hashes: &[Hash], ser: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = hashes.iter().map(hex::encode).collect();
        serde::Serialize::serialize(&encoded, ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Hash>, D::Error> {
        let encoded: Vec<String> = Deserialize::deserialize(de)?;
        encoded
            .into_iter()
            .map(|h| {
                let bytes = hex::decode(&h).map_err(D::Error::custom)?;
                Hash::try_from(bytes.as_slice())
                    .map_err(|_| D::Error::custom("hash must be 32 bytes"))
            })
            .collect()
    }
}
