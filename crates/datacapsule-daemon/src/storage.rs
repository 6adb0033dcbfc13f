// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Persistent tables and the commit write path.
//!
//! Everything lives in one redb database. Per-capsule rows use keys of the
//! form `capsule_id || suffix`. A commit is a single write transaction that
//! performs, in order: record payloads, record bindings, tree blocks, the
//! parent-link backfill on the chained previous root, the root signature,
//! the sequence index rows, and finally the `latest` row. The transaction
//! commit is the commit point: a crash anywhere before it leaves the
//! capsule exactly as it was, and content-hash keys keep replays idempotent.

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use datacapsule_core::capsule::CapsuleMetadata;
use datacapsule_core::merkle::CommitTree;
use datacapsule_core::proof::{BlockSource, StoredBlock};
use datacapsule_core::{CapsuleError, CapsuleResult, Hash, HASH_WIDTH};

const CAPSULES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("capsules");
const LATEST: TableDefinition<&[u8], &[u8]> = TableDefinition::new("latest");
const BINDATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("bindata");
const RECORDBLOCKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("recordblocks");
const TREEBLOCKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("treeblocks");
const SIGBLOCKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sigblocks");
const SEQBLOCKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("seqblocks");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] redb::Error),

    #[error("row codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(&'static str),
}

macro_rules! from_redb {
    ($($err:ty),+) => {
        $(impl From<$err> for StoreError {
            fn from(err: $err) -> Self {
                Self::Backend(err.into())
            }
        })+
    };
}

from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestRow {
    /// Committed records so far; the next sequence number.
    pub seq_count: u64,
    pub root: Hash,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecordRow {
    pub parent: Hash,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeRow {
    pub parent: Option<Hash>,
    pub children: Vec<Hash>,
}

/// Everything a verified commit writes, precomputed outside the transaction.
#[derive(Debug)]
pub struct PreparedCommit {
    /// Batch order: (record hash, encrypted bytes).
    pub records: Vec<(Hash, Vec<u8>)>,
    pub tree: CommitTree,
    /// The writer's signature over the new root.
    pub root_signature: Vec<u8>,
    /// Previous root whose parent link the chained commit fills in.
    pub prev_root: Option<Hash>,
    /// Sequence number of the first record in the batch.
    pub seq_start: u64,
}

fn hash_key(capsule: &Hash, hash: &Hash) -> [u8; HASH_WIDTH * 2] {
    let mut key = [0u8; HASH_WIDTH * 2];
    key[..HASH_WIDTH].copy_from_slice(capsule);
    key[HASH_WIDTH..].copy_from_slice(hash);
    key
}

fn seq_key(capsule: &Hash, seq: u64) -> [u8; HASH_WIDTH + 8] {
    let mut key = [0u8; HASH_WIDTH + 8];
    key[..HASH_WIDTH].copy_from_slice(capsule);
    key[HASH_WIDTH..].copy_from_slice(&seq.to_be_bytes());
    key
}

#[derive(Debug)]
pub struct CapsuleStore {
    db: Database,
}

impl CapsuleStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(CAPSULES)?;
            txn.open_table(LATEST)?;
            txn.open_table(BINDATA)?;
            txn.open_table(RECORDBLOCKS)?;
            txn.open_table(TREEBLOCKS)?;
            txn.open_table(SIGBLOCKS)?;
            txn.open_table(SEQBLOCKS)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Persists the capsule metadata row atomically; returns false when a
    /// capsule with the same identifier already exists.
    pub fn create_capsule(&self, meta: &CapsuleMetadata) -> Result<bool, StoreError> {
        let id = meta.capsule_id();
        let txn = self.db.begin_write()?;
        {
            let mut capsules = txn.open_table(CAPSULES)?;
            if capsules.get(id.as_slice())?.is_some() {
                return Ok(false);
            }
            capsules.insert(id.as_slice(), serde_json::to_vec(meta)?.as_slice())?;
            let mut latest = txn.open_table(LATEST)?;
            let row = LatestRow {
                seq_count: 0,
                root: datacapsule_core::NULL_HASH,
            };
            latest.insert(id.as_slice(), serde_json::to_vec(&row)?.as_slice())?;
        }
        txn.commit()?;
        Ok(true)
    }

    /// All capsules with their latest state; the startup scan.
    pub fn load_capsules(&self) -> Result<Vec<(Hash, CapsuleMetadata, LatestRow)>, StoreError> {
        let txn = self.db.begin_read()?;
        let capsules = txn.open_table(CAPSULES)?;
        let latest = txn.open_table(LATEST)?;
        let mut out = Vec::new();
        for entry in capsules.iter()? {
            let (key, value) = entry?;
            let id: Hash = key
                .value()
                .try_into()
                .map_err(|_| StoreError::Corrupt("capsule id width"))?;
            let meta: CapsuleMetadata = serde_json::from_slice(value.value())?;
            let row = latest
                .get(id.as_slice())?
                .ok_or(StoreError::Corrupt("capsule without latest row"))?;
            let row: LatestRow = serde_json::from_slice(row.value())?;
            out.push((id, meta, row));
        }
        Ok(out)
    }

    pub fn latest(&self, capsule: &Hash) -> Result<Option<LatestRow>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LATEST)?;
        match table.get(capsule.as_slice())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn record_bytes(&self, capsule: &Hash, record: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BINDATA)?;
        Ok(table
            .get(hash_key(capsule, record).as_slice())?
            .map(|v| v.value().to_vec()))
    }

    pub fn record_row(&self, capsule: &Hash, record: &Hash) -> Result<Option<RecordRow>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDBLOCKS)?;
        match table.get(hash_key(capsule, record).as_slice())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn tree_row(&self, capsule: &Hash, name: &Hash) -> Result<Option<TreeRow>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TREEBLOCKS)?;
        match table.get(hash_key(capsule, name).as_slice())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn root_signature(&self, capsule: &Hash, root: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SIGBLOCKS)?;
        Ok(table
            .get(hash_key(capsule, root).as_slice())?
            .map(|v| v.value().to_vec()))
    }

    pub fn seq_record(&self, capsule: &Hash, seq: u64) -> Result<Option<Hash>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SEQBLOCKS)?;
        match table.get(seq_key(capsule, seq).as_slice())? {
            Some(value) => Ok(Some(
                value
                    .value()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("seq row hash width"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn apply_commit(&self, capsule: &Hash, commit: &PreparedCommit) -> Result<(), StoreError> {
        self.apply_commit_inner(capsule, commit, true)
    }

    /// Runs the full write path but aborts instead of committing. Exists so
    /// tests can assert that an interrupted commit leaves no trace.
    #[cfg(test)]
    pub(crate) fn apply_commit_aborted(
        &self,
        capsule: &Hash,
        commit: &PreparedCommit,
    ) -> Result<(), StoreError> {
        self.apply_commit_inner(capsule, commit, false)
    }

    fn apply_commit_inner(
        &self,
        capsule: &Hash,
        commit: &PreparedCommit,
        commit_txn: bool,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut bindata = txn.open_table(BINDATA)?;
            for (hash, bytes) in &commit.records {
                bindata.insert(hash_key(capsule, hash).as_slice(), bytes.as_slice())?;
            }

            let mut recordblocks = txn.open_table(RECORDBLOCKS)?;
            for (i, binding) in commit.tree.bindings.iter().enumerate() {
                let row = RecordRow {
                    parent: binding.parent,
                    seq: commit.seq_start + i as u64,
                };
                recordblocks.insert(
                    hash_key(capsule, &binding.name).as_slice(),
                    serde_json::to_vec(&row)?.as_slice(),
                )?;
            }

            let mut treeblocks = txn.open_table(TREEBLOCKS)?;
            for block in &commit.tree.blocks {
                let row = TreeRow {
                    parent: block.parent,
                    children: block.children.clone(),
                };
                treeblocks.insert(
                    hash_key(capsule, &block.name).as_slice(),
                    serde_json::to_vec(&row)?.as_slice(),
                )?;
            }

            if let (Some(prev_root), Some(parent)) = (commit.prev_root, commit.tree.extra_parent) {
                let key = hash_key(capsule, &prev_root);
                let mut row: TreeRow = match treeblocks.get(key.as_slice())? {
                    Some(value) => serde_json::from_slice(value.value())?,
                    None => return Err(StoreError::Corrupt("chained root missing")),
                };
                if row.parent.is_none() {
                    row.parent = Some(parent);
                    treeblocks.insert(key.as_slice(), serde_json::to_vec(&row)?.as_slice())?;
                }
            }

            let mut sigblocks = txn.open_table(SIGBLOCKS)?;
            sigblocks.insert(
                hash_key(capsule, &commit.tree.root).as_slice(),
                commit.root_signature.as_slice(),
            )?;

            let mut seqblocks = txn.open_table(SEQBLOCKS)?;
            for (i, (hash, _)) in commit.records.iter().enumerate() {
                seqblocks.insert(
                    seq_key(capsule, commit.seq_start + i as u64).as_slice(),
                    hash.as_slice(),
                )?;
            }

            let mut latest = txn.open_table(LATEST)?;
            let row = LatestRow {
                seq_count: commit.seq_start + commit.records.len() as u64,
                root: commit.tree.root,
            };
            latest.insert(capsule.as_slice(), serde_json::to_vec(&row)?.as_slice())?;
        }
        if commit_txn {
            txn.commit()?;
        } else {
            txn.abort()?;
        }
        Ok(())
    }
}

/// Proof-walk view of one capsule's tree tables.
pub struct CapsuleBlocks<'a> {
    store: &'a CapsuleStore,
    capsule: Hash,
}

impl<'a> CapsuleBlocks<'a> {
    pub fn new(store: &'a CapsuleStore, capsule: Hash) -> Self {
        Self { store, capsule }
    }
}

impl BlockSource for CapsuleBlocks<'_> {
    fn tree_block(&self, name: &Hash) -> CapsuleResult<Option<StoredBlock>> {
        let row = self
            .store
            .tree_row(&self.capsule, name)
            .map_err(|_| CapsuleError::Internal)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let signature = self
            .store
            .root_signature(&self.capsule, name)
            .map_err(|_| CapsuleError::Internal)?;
        Ok(Some(StoredBlock {
            parent: row.parent,
            signature,
            children: row.children,
        }))
    }

    fn record_parent(&self, name: &Hash) -> CapsuleResult<Option<Hash>> {
        Ok(self
            .store
            .record_row(&self.capsule, name)
            .map_err(|_| CapsuleError::Internal)?
            .map(|row| row.parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datacapsule_core::crypto::{generate_signing_key, hash_bytes, sign_hash};
    use datacapsule_core::merkle::commit_tree;
    use datacapsule_core::NULL_HASH;
    use ed25519_dalek::SigningKey;
    use tempfile::TempDir;

    fn test_meta(creator: &SigningKey, writer: &SigningKey) -> CapsuleMetadata {
        let mut meta = CapsuleMetadata {
            creator_pub_key: creator.verifying_key().to_bytes().to_vec(),
            writer_pub_key: writer.verifying_key().to_bytes().to_vec(),
            description: "store test".into(),
            creator_signature: Vec::new(),
        };
        let id = meta.capsule_id();
        meta.creator_signature = sign_hash(creator, &id);
        meta
    }

    fn prepare(
        writer: &SigningKey,
        records: Vec<Vec<u8>>,
        prev_root: Option<Hash>,
        seq_start: u64,
    ) -> PreparedCommit {
        let named: Vec<(Hash, Vec<u8>)> =
            records.into_iter().map(|b| (hash_bytes(&b), b)).collect();
        let hashes: Vec<Hash> = named.iter().map(|(h, _)| *h).collect();
        let tree = commit_tree(&hashes, prev_root, 2).unwrap();
        let root_signature = sign_hash(writer, &tree.root);
        PreparedCommit {
            records: named,
            tree,
            root_signature,
            prev_root,
            seq_start,
        }
    }

    #[test]
    fn create_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = CapsuleStore::open(dir.path().join("capsules.redb")).unwrap();
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let meta = test_meta(&creator, &writer);

        assert!(store.create_capsule(&meta).unwrap());
        assert!(!store.create_capsule(&meta).unwrap());

        let loaded = store.load_capsules().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, meta.capsule_id());
        assert_eq!(loaded[0].2.seq_count, 0);
    }

    #[test]
    fn commit_persists_every_table_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capsules.redb");
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let meta = test_meta(&creator, &writer);
        let id = meta.capsule_id();

        let commit = prepare(&writer, vec![b"r0".to_vec(), b"r1".to_vec()], None, 0);
        let root = commit.tree.root;
        {
            let store = CapsuleStore::open(&path).unwrap();
            store.create_capsule(&meta).unwrap();
            store.apply_commit(&id, &commit).unwrap();
        }

        let store = CapsuleStore::open(&path).unwrap();
        let latest = store.latest(&id).unwrap().unwrap();
        assert_eq!(latest, LatestRow { seq_count: 2, root });

        for (i, (hash, bytes)) in commit.records.iter().enumerate() {
            assert_eq!(store.record_bytes(&id, hash).unwrap().unwrap(), *bytes);
            assert_eq!(store.seq_record(&id, i as u64).unwrap().unwrap(), *hash);
            let row = store.record_row(&id, hash).unwrap().unwrap();
            assert_eq!(row.seq, i as u64);
        }
        assert!(store.root_signature(&id, &root).unwrap().is_some());
        let root_row = store.tree_row(&id, &root).unwrap().unwrap();
        assert!(root_row.parent.is_none());
    }

    #[test]
    fn chained_commit_backfills_the_previous_root_parent() {
        let dir = TempDir::new().unwrap();
        let store = CapsuleStore::open(dir.path().join("capsules.redb")).unwrap();
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let meta = test_meta(&creator, &writer);
        let id = meta.capsule_id();
        store.create_capsule(&meta).unwrap();

        let first = prepare(&writer, vec![b"a".to_vec()], None, 0);
        let first_root = first.tree.root;
        store.apply_commit(&id, &first).unwrap();
        assert!(store.tree_row(&id, &first_root).unwrap().unwrap().parent.is_none());

        let second = prepare(&writer, vec![b"b".to_vec()], Some(first_root), 1);
        store.apply_commit(&id, &second).unwrap();

        let backfilled = store.tree_row(&id, &first_root).unwrap().unwrap();
        assert_eq!(backfilled.parent, second.tree.extra_parent);
    }

    #[test]
    fn aborted_commit_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let store = CapsuleStore::open(dir.path().join("capsules.redb")).unwrap();
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let meta = test_meta(&creator, &writer);
        let id = meta.capsule_id();
        store.create_capsule(&meta).unwrap();

        let commit = prepare(&writer, vec![b"doomed".to_vec()], None, 0);
        store.apply_commit_aborted(&id, &commit).unwrap();

        let latest = store.latest(&id).unwrap().unwrap();
        assert_eq!(latest.seq_count, 0);
        assert_eq!(latest.root, NULL_HASH);
        let (hash, _) = &commit.records[0];
        assert!(store.record_bytes(&id, hash).unwrap().is_none());
        assert!(store.seq_record(&id, 0).unwrap().is_none());
        assert!(store.root_signature(&id, &commit.tree.root).unwrap().is_none());

        // the same batch applies cleanly afterwards
        store.apply_commit(&id, &commit).unwrap();
        assert_eq!(store.latest(&id).unwrap().unwrap().seq_count, 1);
    }

    #[test]
    fn duplicate_record_bytes_share_one_bindata_row() {
        let dir = TempDir::new().unwrap();
        let store = CapsuleStore::open(dir.path().join("capsules.redb")).unwrap();
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let meta = test_meta(&creator, &writer);
        let id = meta.capsule_id();
        store.create_capsule(&meta).unwrap();

        let commit = prepare(&writer, vec![b"same".to_vec(), b"same".to_vec()], None, 0);
        store.apply_commit(&id, &commit).unwrap();

        let hash = hash_bytes(b"same");
        assert_eq!(store.seq_record(&id, 0).unwrap().unwrap(), hash);
        assert_eq!(store.seq_record(&id, 1).unwrap().unwrap(), hash);
        assert_eq!(store.record_bytes(&id, &hash).unwrap().unwrap(), b"same");
        assert_eq!(store.latest(&id).unwrap().unwrap().seq_count, 2);
    }
}
