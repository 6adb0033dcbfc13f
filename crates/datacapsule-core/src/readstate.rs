// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reader session state: a fixed-capacity, deterministically-evicting set of
//! proven hashes plus the last proven block and last signed root.
//!
//! Client and server each hold one of these per reader session and apply
//! identical transitions while processing a proof stream; any divergence
//! invalidates every later proof, so eviction is a pure function of the
//! insert sequence. The cache is part of the protocol, not a tuning detail.

use crate::crypto::{Hash, NULL_HASH};

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadState {
    cache: Vec<Hash>,
    last_signed_root: Hash,
    last_proven_name: Hash,
    last_proven_block: Vec<Hash>,
}

impl ReadState {
    pub fn new(cache_capacity: usize, fanout: usize) -> Self {
        Self {
            cache: vec![NULL_HASH; cache_capacity.max(1)],
            last_signed_root: NULL_HASH,
            last_proven_name: NULL_HASH,
            last_proven_block: vec![NULL_HASH; fanout],
        }
    }

    /// Direct-mapped slot: low four hash bytes, little-endian, mod capacity.
    fn slot(&self, hash: &Hash) -> usize {
        let index = (hash[0] as usize)
            | ((hash[1] as usize) << 8)
            | ((hash[2] as usize) << 16)
            | ((hash[3] as usize) << 24);
        index % self.cache.len()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        if self.last_proven_block.iter().any(|h| h == hash) {
            return true;
        }
        if &self.cache[self.slot(hash)] == hash {
            return true;
        }
        &self.last_signed_root == hash
    }

    /// Raw cache insert, evicting whatever occupied the slot. Also the
    /// replay operation behind `startCache`.
    pub fn insert(&mut self, hash: Hash) {
        let slot = self.slot(&hash);
        self.cache[slot] = hash;
    }

    /// Accept a SignedHash from a proof stream: the displaced last signed
    /// root moves into the cache.
    pub fn accept_signed_root(&mut self, root: Hash) {
        let displaced = self.last_signed_root;
        self.insert(displaced);
        self.last_signed_root = root;
    }

    /// Accept a proven HashBlock: the displaced block's *name* moves into
    /// the cache.
    pub fn accept_block(&mut self, name: Hash, children: &[Hash]) {
        let displaced = self.last_proven_name;
        self.insert(displaced);
        self.last_proven_name = name;
        self.last_proven_block.clear();
        self.last_proven_block.extend_from_slice(children);
    }

    #[cfg(test)]
    pub(crate) fn in_cache(&self, hash: &Hash) -> bool {
        &self.cache[self.slot(hash)] == hash
    }
}
