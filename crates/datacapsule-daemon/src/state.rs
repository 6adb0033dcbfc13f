// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory per-capsule state, rebuilt from the store at startup.
//!
//! Holds what connections need without touching storage: the immutable
//! metadata, the latest committed sequence count and root, the subscriber
//! notify channel, and the single-writer claim.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use tokio::sync::watch;

use datacapsule_core::capsule::CapsuleMetadata;
use datacapsule_core::crypto::verifying_key_from_bytes;
use datacapsule_core::{CapsuleResult, Hash};

use crate::storage::{CapsuleStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct LatestCommit {
    seq_count: u64,
    root: Hash,
}

#[derive(Debug)]
pub struct CapsuleState {
    pub id: Hash,
    pub meta: CapsuleMetadata,
    pub writer_key: VerifyingKey,
    latest: Mutex<LatestCommit>,
    seq_tx: watch::Sender<u64>,
    writer_busy: AtomicBool,
}

impl CapsuleState {
    /// Fresh capsule state straight from creator metadata.
    pub fn from_meta(meta: CapsuleMetadata) -> CapsuleResult<Self> {
        Self::new(meta, 0, datacapsule_core::NULL_HASH)
    }

    pub fn new(meta: CapsuleMetadata, seq_count: u64, root: Hash) -> CapsuleResult<Self> {
        let writer_key = verifying_key_from_bytes(&meta.writer_pub_key)?;
        let (seq_tx, _) = watch::channel(seq_count);
        Ok(Self {
            id: meta.capsule_id(),
            meta,
            writer_key,
            latest: Mutex::new(LatestCommit { seq_count, root }),
            seq_tx,
            writer_busy: AtomicBool::new(false),
        })
    }

    /// Committed record count and latest root, observed atomically.
    pub fn latest(&self) -> (u64, Hash) {
        let latest = self.latest.lock();
        (latest.seq_count, latest.root)
    }

    /// Called after the storage transaction commits; wakes every waiter.
    pub fn publish_commit(&self, seq_count: u64, root: Hash) {
        {
            let mut latest = self.latest.lock();
            latest.seq_count = seq_count;
            latest.root = root;
        }
        self.seq_tx.send_replace(seq_count);
    }

    pub fn subscribe_seq(&self) -> watch::Receiver<u64> {
        self.seq_tx.subscribe()
    }

    /// Claims the capsule's single writer slot; refused while another
    /// writer session holds it. The claim releases on drop.
    pub fn claim_writer(self: &Arc<Self>) -> Option<WriterClaim> {
        self.writer_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(WriterClaim {
            state: Arc::clone(self),
        })
    }
}

#[derive(Debug)]
pub struct WriterClaim {
    state: Arc<CapsuleState>,
}

impl Drop for WriterClaim {
    fn drop(&mut self) {
        self.state.writer_busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct CapsuleRegistry {
    inner: Mutex<HashMap<Hash, Arc<CapsuleState>>>,
}

impl CapsuleRegistry {
    /// Rebuilds the registry from the persistent tables.
    pub fn load(store: &CapsuleStore) -> Result<Self, StoreError> {
        let registry = Self::default();
        for (id, meta, latest) in store.load_capsules()? {
            let state = CapsuleState::new(meta, latest.seq_count, latest.root)
                .map_err(|_| StoreError::Corrupt("capsule metadata key"))?;
            if state.id != id {
                return Err(StoreError::Corrupt("capsule id mismatch"));
            }
            registry.inner.lock().insert(id, Arc::new(state));
        }
        Ok(registry)
    }

    pub fn get(&self, id: &Hash) -> Option<Arc<CapsuleState>> {
        self.inner.lock().get(id).cloned()
    }

    /// Registers a freshly created capsule; false if the id is taken.
    pub fn register(&self, state: Arc<CapsuleState>) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(&state.id) {
            return false;
        }
        inner.insert(state.id, state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datacapsule_core::crypto::{generate_signing_key, hash_bytes, sign_hash};

    fn meta() -> CapsuleMetadata {
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let mut meta = CapsuleMetadata {
            creator_pub_key: creator.verifying_key().to_bytes().to_vec(),
            writer_pub_key: writer.verifying_key().to_bytes().to_vec(),
            description: "state test".into(),
            creator_signature: Vec::new(),
        };
        let id = meta.capsule_id();
        meta.creator_signature = sign_hash(&creator, &id);
        meta
    }

    #[test]
    fn writer_claim_is_exclusive_until_dropped() {
        let state = Arc::new(CapsuleState::from_meta(meta()).unwrap());
        let claim = state.claim_writer().unwrap();
        assert!(state.claim_writer().is_none());
        drop(claim);
        assert!(state.claim_writer().is_some());
    }

    #[tokio::test]
    async fn publish_commit_wakes_waiters() {
        let state = Arc::new(CapsuleState::from_meta(meta()).unwrap());
        let mut rx = state.subscribe_seq();
        assert_eq!(*rx.borrow_and_update(), 0);

        let waiter = {
            let mut rx = state.subscribe_seq();
            tokio::spawn(async move {
                loop {
                    if *rx.borrow_and_update() > 0 {
                        return *rx.borrow();
                    }
                    rx.changed().await.unwrap();
                }
            })
        };

        state.publish_commit(3, hash_bytes(b"root"));
        assert_eq!(waiter.await.unwrap(), 3);
        assert_eq!(state.latest(), (3, hash_bytes(b"root")));
    }

    #[test]
    fn registry_register_rejects_duplicates() {
        let registry = CapsuleRegistry::default();
        let state = Arc::new(CapsuleState::from_meta(meta()).unwrap());
        let id = state.id;
        assert!(registry.register(Arc::clone(&state)));
        assert!(!registry.register(state));
        assert!(registry.get(&id).is_some());
    }
}
