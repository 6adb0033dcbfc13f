// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Merkle commit construction.
//!
//! A commit is a fanout-F tree over the batch's record hashes, with the
//! previous commit's signed root optionally appended as the last leaf
//! (chaining commits so one newer signature can cover older records). The
//! last block of every level is right-padded with [`NULL_HASH`]. Identical
//! input produces byte-identical blocks and root; the root is what gets
//! signed, so this determinism is load-bearing.

use crate::crypto::{hash_block, Hash, NULL_HASH};
use crate::error::{CapsuleError, CapsuleResult};

pub const MIN_FANOUT: usize = 2;

/// One interior node, in build order (bottom level first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeBlock {
    pub name: Hash,
    /// Filled for every block except the root of this commit.
    pub parent: Option<Hash>,
    pub children: Vec<Hash>,
}

/// Binds a record hash to its parent block in this commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBinding {
    pub name: Hash,
    pub parent: Hash,
}

#[derive(Debug, Clone)]
pub struct CommitTree {
    pub bindings: Vec<RecordBinding>,
    pub blocks: Vec<TreeBlock>,
    /// Parent of the chained previous root, when one was supplied. The
    /// caller backfills the stored previous root's parent link with this.
    pub extra_parent: Option<Hash>,
    pub root: Hash,
    /// Number of block levels between a leaf and the root.
    pub depth: u8,
}

/// Builds the full commit tree: record bindings, all interior blocks with
/// parent links, the chained-root parent, the root and its depth.
pub fn commit_tree(
    record_hashes: &[Hash],
    extra: Option<Hash>,
    fanout: usize,
) -> CapsuleResult<CommitTree> {
    if fanout < MIN_FANOUT {
        return Err(CapsuleError::InvalidArgument);
    }
    let mut current: Vec<Hash> = record_hashes.to_vec();
    if let Some(prev_root) = extra {
        current.push(prev_root);
    }
    if current.is_empty() {
        return Err(CapsuleError::InvalidArgument);
    }

    let mut blocks: Vec<TreeBlock> = Vec::new();
    let mut bindings = Vec::new();
    let mut extra_parent = None;
    let mut depth = 0u8;

    loop {
        let len_next = (current.len() - 1) / fanout + 1;
        let mut next = Vec::with_capacity(len_next);
        for i in 0..len_next {
            let start = i * fanout;
            let end = usize::min(start + fanout, current.len());
            let mut children = vec![NULL_HASH; fanout];
            children[..end - start].copy_from_slice(&current[start..end]);
            let name = hash_block(&children);
            next.push(name);
            blocks.push(TreeBlock {
                name,
                parent: None,
                children,
            });
        }

        if depth == 0 {
            for (i, record) in record_hashes.iter().enumerate() {
                bindings.push(RecordBinding {
                    name: *record,
                    parent: next[i / fanout],
                });
            }
            if extra.is_some() {
                extra_parent = Some(next[record_hashes.len() / fanout]);
            }
        } else {
            // the previous level's blocks are the last `current.len()`
            // entries pushed before this level's `next.len()`
            let start_idx = blocks.len() - next.len() - current.len();
            for i in 0..current.len() {
                blocks[start_idx + i].parent = Some(next[i / fanout]);
            }
        }

        current = next;
        depth += 1;
        if current.len() == 1 {
            break;
        }
    }

    Ok(CommitTree {
        bindings,
        blocks,
        extra_parent,
        root: current[0],
        depth,
    })
}

/// Root hash only. What a writer signs before sending a commit.
pub fn commit_root(
    record_hashes: &[Hash],
    extra: Option<Hash>,
    fanout: usize,
) -> CapsuleResult<Hash> {
    Ok(commit_tree(record_hashes, extra, fanout)?.root)
}
