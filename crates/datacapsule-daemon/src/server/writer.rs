// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use datacapsule_core::crypto::{hash_bytes, sign_hash, verify_hash_signature};
use datacapsule_core::merkle::commit_tree;
use datacapsule_core::{Hash, SignedHash, NULL_HASH};
use datacapsule_protocol::{Request, Response, WriteRequest};

use crate::server::{next_request, send_failure, send_response, ConnectionError, ServerCtx};
use crate::state::{CapsuleState, WriterClaim};
use crate::storage::PreparedCommit;

/// Writer session. Records are staged in memory only; nothing becomes
/// durable before a commit verifies. Any failure or disconnect discards the
/// staged batch, and the writer claim releases when this returns.
pub(super) async fn process(
    ctx: &ServerCtx,
    state: Arc<CapsuleState>,
    _claim: WriterClaim,
    framed: &mut super::ServerFramed,
    addr: SocketAddr,
) -> Result<(), ConnectionError> {
    let mut staged: Vec<(Hash, Vec<u8>)> = Vec::new();

    loop {
        let request = match next_request(framed).await? {
            Some(Request::Write(write)) => write,
            Some(_) => {
                send_failure(framed).await?;
                return Err(ConnectionError::Protocol("expected write request"));
            }
            None => return Ok(()),
        };

        match request {
            WriteRequest::Record { data, seq } => {
                let (committed, _) = state.latest();
                let expected = committed + staged.len() as u64;
                if seq != expected {
                    tracing::warn!(%addr, seq, expected, "write with wrong sequence");
                    send_failure(framed).await?;
                    continue;
                }
                let name = hash_bytes(&data);
                staged.push((name, data));
                send_response(framed, &Response::WriteAck).await?;
            }
            WriteRequest::Commit {
                root,
                signature,
                include_prev_root,
            } => {
                let batch = std::mem::take(&mut staged);
                match handle_commit(ctx, &state, batch, root, signature, include_prev_root) {
                    Ok(signed) => send_response(framed, &Response::Commit(signed)).await?,
                    Err(reason) => {
                        tracing::warn!(%addr, reason, "commit rejected");
                        send_failure(framed).await?;
                    }
                }
            }
        }
    }
}

fn handle_commit(
    ctx: &ServerCtx,
    state: &CapsuleState,
    staged: Vec<(Hash, Vec<u8>)>,
    client_root: Hash,
    client_signature: Vec<u8>,
    include_prev_root: bool,
) -> Result<SignedHash, &'static str> {
    if staged.is_empty() {
        return Err("empty batch");
    }

    let (committed, latest_root) = state.latest();
    let prev_root = (include_prev_root && latest_root != NULL_HASH).then_some(latest_root);
    let hashes: Vec<Hash> = staged.iter().map(|(name, _)| *name).collect();
    let tree = commit_tree(&hashes, prev_root, ctx.config.merkle_fanout)
        .map_err(|_| "tree build failed")?;

    if tree.root != client_root {
        return Err("root mismatch");
    }
    if !verify_hash_signature(&state.writer_key, &tree.root, &client_signature) {
        return Err("bad writer signature");
    }

    let root = tree.root;
    let prepared = PreparedCommit {
        records: staged,
        tree,
        root_signature: client_signature,
        prev_root,
        seq_start: committed,
    };
    ctx.store
        .apply_commit(&state.id, &prepared)
        .map_err(|err| {
            tracing::error!(error = %err, "commit write failed");
            "storage failure"
        })?;

    let seq_count = committed + prepared.records.len() as u64;
    state.publish_commit(seq_count, root);
    tracing::debug!(capsule = %hex::encode(state.id), seq_count, "commit applied");

    Ok(SignedHash {
        hash: root,
        signature: sign_hash(&ctx.signing_key, &root),
    })
}
