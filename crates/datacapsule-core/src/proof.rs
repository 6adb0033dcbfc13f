// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Proof assembly and verification.
//!
//! A proof is an ordered stream: optionally one [`SignedHash`] naming a
//! committed root, then zero or more blocks, top-down, each anchored in the
//! session state or in the preceding block, with the target contained in the
//! final block. The server assembles against its storage and absorbs the
//! stream into its session copy of the [`ReadState`]; the client verifies
//! and absorbs identically, keeping the two caches in lock-step.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::crypto::{hash_block, verify_hash_signature, Hash, SignedHash};
use crate::error::{CapsuleError, CapsuleResult};
use crate::readstate::ReadState;

/// A tree block as the proof walk sees it in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub parent: Option<Hash>,
    /// Writer signature, present iff this block is a committed root.
    pub signature: Option<Vec<u8>>,
    pub children: Vec<Hash>,
}

/// Storage lookups the assembler needs. Implemented by the daemon's store
/// and by in-memory maps in tests.
pub trait BlockSource {
    fn tree_block(&self, name: &Hash) -> CapsuleResult<Option<StoredBlock>>;
    fn record_parent(&self, name: &Hash) -> CapsuleResult<Option<Hash>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub signed_root: Option<SignedHash>,
    /// Child tuples, top-down. Block names are recomputed by hashing.
    #[serde(with = "hash_matrix")]
    pub blocks: Vec<Vec<Hash>>,
}

impl Proof {
    pub fn empty() -> Self {
        Self {
            signed_root: None,
            blocks: Vec::new(),
        }
    }
}

/// Assembles a proof for `target` and absorbs it into `state` exactly the
/// way the receiving client will.
///
/// The walk climbs parent links from the target, crossing commit boundaries
/// where a later commit chained an earlier root. The newest signed root
/// passed is the signature candidate. If a climbed block's name is already
/// in the session state the chain anchors there, and the signature is elided
/// whenever the blocks past the newest candidate cost at most
/// `sig_avoid_max_extra_hashes` hashes (zero extra covers the plain
/// "root already cached" rule). Otherwise the newest signed root is sent.
/// The policy reads only session state and storage, so it is deterministic.
pub fn assemble_proof<S: BlockSource>(
    source: &S,
    state: &mut ReadState,
    target: &Hash,
    sig_avoid_max_extra_hashes: usize,
) -> CapsuleResult<Proof> {
    if state.contains(target) {
        return Ok(Proof::empty());
    }

    // chain[i] = (name, children) of the block i+1 levels above the target
    let mut chain: Vec<(Hash, Vec<Hash>)> = Vec::new();
    let mut newest_signed: Option<(usize, SignedHash)> = None;
    let mut anchor: Option<usize> = None;
    let mut anchor_candidate: Option<(usize, SignedHash)> = None;

    let mut parent = match source.record_parent(target)? {
        Some(p) => Some(p),
        None => {
            let block = source
                .tree_block(target)?
                .ok_or(CapsuleError::NotFound)?;
            if let Some(signature) = block.signature {
                newest_signed = Some((
                    0,
                    SignedHash {
                        hash: *target,
                        signature,
                    },
                ));
            }
            block.parent
        }
    };

    while let Some(name) = parent {
        let block = source
            .tree_block(&name)?
            .ok_or(CapsuleError::Internal)?;
        chain.push((name, block.children.clone()));
        if let Some(signature) = block.signature {
            newest_signed = Some((
                chain.len(),
                SignedHash {
                    hash: name,
                    signature,
                },
            ));
        }
        if anchor.is_none() && state.contains(&name) {
            anchor = Some(chain.len());
            anchor_candidate = newest_signed.clone();
            let fanout = block.children.len();
            let avoidable = match &anchor_candidate {
                None => true,
                Some((at, _)) => (chain.len() - at) * fanout <= sig_avoid_max_extra_hashes,
            };
            if avoidable {
                break;
            }
        }
        parent = block.parent;
    }

    let (signed_root, keep) = match anchor {
        Some(at) => {
            let fanout = chain[0].1.len();
            let avoidable = match &anchor_candidate {
                None => true,
                Some((candidate_at, _)) => {
                    (at - candidate_at) * fanout <= sig_avoid_max_extra_hashes
                }
            };
            if avoidable {
                (None, at)
            } else {
                // fall back to the newest signature on the full chain
                let (candidate_at, signed) =
                    newest_signed.ok_or(CapsuleError::Internal)?;
                (Some(signed), candidate_at)
            }
        }
        None => {
            let (candidate_at, signed) = newest_signed.ok_or(CapsuleError::Internal)?;
            (Some(signed), candidate_at)
        }
    };

    let mut blocks: Vec<Vec<Hash>> =
        chain.drain(..keep).map(|(_, children)| children).collect();
    blocks.reverse();
    let proof = Proof {
        signed_root,
        blocks,
    };
    absorb_proof(state, &proof);
    Ok(proof)
}

/// Applies a proof's state transitions without validating it. The server
/// side of the lock-step: an assembled proof is valid by construction.
pub fn absorb_proof(state: &mut ReadState, proof: &Proof) {
    if let Some(signed) = &proof.signed_root {
        state.accept_signed_root(signed.hash);
    }
    for children in &proof.blocks {
        state.accept_block(hash_block(children), children);
    }
}

/// Client-side verification: checks the signature and every block's
/// anchoring, applies the same transitions, and requires the target to end
/// up proven. Fails without touching `state` beyond the prefix it accepted,
/// matching the server (which only ever sends streams it accepted in full).
pub fn verify_proof(
    state: &mut ReadState,
    writer_key: &VerifyingKey,
    target: &Hash,
    proof: &Proof,
    fanout: usize,
) -> CapsuleResult<()> {
    if let Some(signed) = &proof.signed_root {
        if !verify_hash_signature(writer_key, &signed.hash, &signed.signature) {
            return Err(CapsuleError::BadSignature);
        }
        state.accept_signed_root(signed.hash);
    }
    for children in &proof.blocks {
        if children.len() != fanout {
            return Err(CapsuleError::BadProof("block width"));
        }
        let name = hash_block(children);
        if !state.contains(&name) {
            return Err(CapsuleError::BadProof("unanchored block"));
        }
        state.accept_block(name, children);
    }
    if !state.contains(target) {
        return Err(CapsuleError::BadProof("target not proven"));
    }
    Ok(())
}

mod hash_matrix {
    use super::Hash;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blocks: &[Vec<Hash>], ser: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<Vec<String>> = blocks
            .iter()
            .map(|block| block.iter().map(hex::encode).collect())
            .collect();
        serde::Serialize::serialize(&encoded, ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Vec<Hash>>, D::Error> {
        let encoded: Vec<Vec<String>> = Deserialize::deserialize(de)?;
        encoded
            .into_iter()
            .map(|block| {
                block
                    .into_iter()
                    .map(|h| {
                        let bytes = hex::decode(&h).map_err(D::Error::custom)?;
                        Hash::try_from(bytes.as_slice())
                            .map_err(|_| D::Error::custom("hash must be 32 bytes"))
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_signing_key, hash_bytes, sign_hash, NULL_HASH};
    use crate::merkle::commit_tree;
    use ed25519_dalek::SigningKey;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// In-memory mirror of the daemon's tree/record tables.
    #[derive(Default)]
    struct MemStore {
        blocks: HashMap<Hash, StoredBlock>,
        records: HashMap<Hash, Hash>,
        latest_root: Option<Hash>,
    }

    impl MemStore {
        fn commit(
            &mut self,
            key: &SigningKey,
            records: &[Hash],
            chain_prev: bool,
            fanout: usize,
        ) -> Hash {
            let extra = if chain_prev { self.latest_root } else { None };
            let tree = commit_tree(records, extra, fanout).unwrap();
            for binding in &tree.bindings {
                self.records.insert(binding.name, binding.parent);
            }
            for block in &tree.blocks {
                self.blocks.insert(
                    block.name,
                    StoredBlock {
                        parent: block.parent,
                        signature: None,
                        children: block.children.clone(),
                    },
                );
            }
            if let (Some(prev), Some(parent)) = (extra, tree.extra_parent) {
                if let Some(stored) = self.blocks.get_mut(&prev) {
                    if stored.parent.is_none() {
                        stored.parent = Some(parent);
                    }
                }
            }
            if let Some(root) = self.blocks.get_mut(&tree.root) {
                root.signature = Some(sign_hash(key, &tree.root));
            }
            self.latest_root = Some(tree.root);
            tree.root
        }
    }

    impl BlockSource for MemStore {
        fn tree_block(&self, name: &Hash) -> CapsuleResult<Option<StoredBlock>> {
            Ok(self.blocks.get(name).cloned())
        }

        fn record_parent(&self, name: &Hash) -> CapsuleResult<Option<Hash>> {
            Ok(self.records.get(name).copied())
        }
    }

    fn records(tag: &str, n: usize) -> Vec<Hash> {
        (0..n)
            .map(|i| hash_bytes(format!("{tag}-{i}").as_bytes()))
            .collect()
    }

    fn prove_both(
        store: &MemStore,
        server: &mut ReadState,
        client: &mut ReadState,
        writer: &VerifyingKey,
        target: &Hash,
        sig_avoid: usize,
        fanout: usize,
    ) -> Proof {
        let proof = assemble_proof(store, server, target, sig_avoid).unwrap();
        verify_proof(client, writer, target, &proof, fanout).unwrap();
        assert_eq!(server, client);
        proof
    }

    #[test]
    fn single_commit_proof_has_one_signature_and_one_block() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let recs = records("a", 1);
        let root = store.commit(&key, &recs, false, 2);

        let mut server = ReadState::new(64, 2);
        let mut client = ReadState::new(64, 2);
        let proof = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &recs[0],
            0,
            2,
        );
        assert_eq!(proof.signed_root.as_ref().unwrap().hash, root);
        assert_eq!(proof.blocks, vec![vec![recs[0], NULL_HASH]]);

        // already proven: the next proof is empty
        let again = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &recs[0],
            0,
            2,
        );
        assert_eq!(again, Proof::empty());
    }

    #[test]
    fn chained_commit_proof_prefers_the_newest_signature() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let r1 = records("one", 1);
        let root_a = store.commit(&key, &r1, false, 2);
        let r2 = records("two", 1);
        let root_b = store.commit(&key, &r2, true, 2);

        let mut server = ReadState::new(64, 2);
        let mut client = ReadState::new(64, 2);
        let proof = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &r1[0],
            0,
            2,
        );
        assert_eq!(proof.signed_root.as_ref().unwrap().hash, root_b);
        assert_eq!(
            proof.blocks,
            vec![vec![r2[0], root_a], vec![r1[0], NULL_HASH]]
        );
        // displacing the lower block pushed the upper block's name (the
        // newer root) into the cache
        assert!(server.in_cache(&root_b));
    }

    #[test]
    fn cached_root_elides_the_signature() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let r1 = records("one", 1);
        let root_a = store.commit(&key, &r1, false, 2);
        let r2 = records("two", 1);
        let root_b = store.commit(&key, &r2, true, 2);
        let _root_c = store.commit(&key, &records("three", 1), true, 2);

        // a fresh session seeded the way startCache replays a prior one
        let mut server = ReadState::new(64, 2);
        let mut client = ReadState::new(64, 2);
        server.insert(root_b);
        client.insert(root_b);

        let proof = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &r1[0],
            4,
            2,
        );
        assert!(proof.signed_root.is_none());
        assert_eq!(
            proof.blocks,
            vec![vec![r2[0], root_a], vec![r1[0], NULL_HASH]]
        );
    }

    #[test]
    fn avoidance_threshold_falls_back_to_newest_signature() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let r1 = records("one", 1);
        let root_a = store.commit(&key, &r1, false, 2);
        // commit B: three records plus the chained root_a
        let r2 = records("two", 3);
        let root_b = store.commit(&key, &r2, true, 2);

        // root_a's parent inside commit B is the block {r2[2], root_a}
        let upper = store.blocks[&root_a].parent.unwrap();
        assert_eq!(store.blocks[&upper].children, vec![r2[2], root_a]);

        // sessions that know only that interior block
        let seed = |state: &mut ReadState| state.insert(upper);

        // generous threshold: anchor in the cache, no signature
        let mut server = ReadState::new(64, 2);
        let mut client = ReadState::new(64, 2);
        seed(&mut server);
        seed(&mut client);
        let proof = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &r1[0],
            2,
            2,
        );
        assert!(proof.signed_root.is_none());
        assert_eq!(proof.blocks.len(), 2);

        // tight threshold: the two extra hashes cost too much, so the proof
        // carries the newest signature instead
        let mut server = ReadState::new(64, 2);
        let mut client = ReadState::new(64, 2);
        seed(&mut server);
        seed(&mut client);
        let proof = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &r1[0],
            1,
            2,
        );
        assert_eq!(proof.signed_root.as_ref().unwrap().hash, root_b);
        assert_eq!(proof.blocks.len(), 3);
    }

    #[test]
    fn a_node_hash_is_provable_too() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let r1 = records("one", 1);
        let root_a = store.commit(&key, &r1, false, 2);
        let r2 = records("two", 1);
        let root_b = store.commit(&key, &r2, true, 2);

        // the older root is itself a leaf of the newer commit
        let mut server = ReadState::new(64, 2);
        let mut client = ReadState::new(64, 2);
        let proof = prove_both(
            &store,
            &mut server,
            &mut client,
            &key.verifying_key(),
            &root_a,
            0,
            2,
        );
        assert_eq!(proof.signed_root.as_ref().unwrap().hash, root_b);
        assert_eq!(proof.blocks, vec![vec![r2[0], root_a]]);
    }

    #[test]
    fn unknown_target_is_not_found() {
        let store = MemStore::default();
        let mut state = ReadState::new(16, 2);
        assert_eq!(
            assemble_proof(&store, &mut state, &hash_bytes(b"nope"), 0),
            Err(CapsuleError::NotFound)
        );
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let recs = records("a", 2);
        store.commit(&key, &recs, false, 2);

        let mut server = ReadState::new(64, 2);
        let mut proof = assemble_proof(&store, &mut server, &recs[0], 0).unwrap();

        // wrong signer
        let mut client = ReadState::new(64, 2);
        let outsider = generate_signing_key().verifying_key();
        assert_eq!(
            verify_proof(&mut client, &outsider, &recs[0], &proof, 2),
            Err(CapsuleError::BadSignature)
        );

        // flipped child hash breaks the block anchoring
        proof.blocks[0][0][0] ^= 0x01;
        let mut client = ReadState::new(64, 2);
        assert_eq!(
            verify_proof(&mut client, &key.verifying_key(), &recs[0], &proof, 2),
            Err(CapsuleError::BadProof("unanchored block"))
        );
    }

    #[test]
    fn proof_serde_roundtrip() {
        let key = generate_signing_key();
        let mut store = MemStore::default();
        let recs = records("a", 3);
        store.commit(&key, &recs, false, 2);
        let mut state = ReadState::new(64, 2);
        let proof = assemble_proof(&store, &mut state, &recs[1], 0).unwrap();

        let json = serde_json::to_string(&proof).unwrap();
        let back: Proof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Proof completeness and cache parity over arbitrary commit
        /// schedules: every committed record stays provable, and the two
        /// session states never diverge.
        #[test]
        fn every_committed_record_stays_provable(
            batches in prop::collection::vec((1usize..5, any::<bool>()), 1..6),
            fanout in 2usize..4,
            sig_avoid in prop::sample::select(vec![0usize, 2, 8]),
            cache_capacity in prop::sample::select(vec![4usize, 64]),
        ) {
            let key = generate_signing_key();
            let mut store = MemStore::default();
            let mut committed: Vec<Hash> = Vec::new();
            for (i, (n, chain)) in batches.iter().enumerate() {
                let recs = records(&format!("batch-{i}"), *n);
                store.commit(&key, &recs, *chain, fanout);
                committed.extend(recs);
            }

            let mut server = ReadState::new(cache_capacity, fanout);
            let mut client = ReadState::new(cache_capacity, fanout);
            for target in &committed {
                let proof = assemble_proof(&store, &mut server, target, sig_avoid).unwrap();
                verify_proof(&mut client, &key.verifying_key(), target, &proof, fanout).unwrap();
                prop_assert_eq!(&server, &client);
            }
        }
    }
}
