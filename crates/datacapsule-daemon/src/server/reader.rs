// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use datacapsule_core::crypto::hash_bytes;
use datacapsule_core::proof::assemble_proof;
use datacapsule_core::readstate::ReadState;
use datacapsule_protocol::{ReadRequest, Request, Response};

use crate::server::{next_request, send_failure, send_response, ConnectionError, ServerCtx};
use crate::state::CapsuleState;
use crate::storage::CapsuleBlocks;

/// Reader session. The session cache lives here and is mutated only by the
/// proof protocol, in the same order the client mutates its copy.
pub(super) async fn process(
    ctx: &ServerCtx,
    state: Arc<CapsuleState>,
    framed: &mut super::ServerFramed,
    addr: SocketAddr,
) -> Result<(), ConnectionError> {
    let mut session = ReadState::new(ctx.config.hash_cache_capacity, ctx.config.merkle_fanout);

    loop {
        let request = match next_request(framed).await? {
            Some(Request::Read(read)) => read,
            Some(_) => {
                send_failure(framed).await?;
                return Err(ConnectionError::Protocol("expected read request"));
            }
            None => return Ok(()),
        };

        match request {
            ReadRequest::Data(name) => match ctx.store.record_bytes(&state.id, &name) {
                Ok(Some(bytes)) => {
                    if hash_bytes(&bytes) != name {
                        // stored bytes no longer match their own name;
                        // capsule-scoped corruption
                        tracing::error!(
                            %addr,
                            capsule = %hex::encode(state.id),
                            record = %hex::encode(name),
                            "record failed content check"
                        );
                        send_failure(framed).await?;
                    } else {
                        send_response(framed, &Response::Data(bytes)).await?;
                    }
                }
                Ok(None) => send_response(framed, &Response::Absent).await?,
                Err(err) => {
                    tracing::error!(%addr, error = %err, "read failed");
                    send_failure(framed).await?;
                }
            },
            ReadRequest::Proof(target) => {
                let blocks = CapsuleBlocks::new(&ctx.store, state.id);
                match assemble_proof(
                    &blocks,
                    &mut session,
                    &target,
                    ctx.config.sig_avoid_max_extra_hashes,
                ) {
                    Ok(proof) => send_response(framed, &Response::Proof(proof)).await?,
                    Err(err) => {
                        tracing::debug!(%addr, target = %hex::encode(target), error = %err, "proof refused");
                        send_failure(framed).await?;
                    }
                }
            }
            ReadRequest::StartCache(hashes) => {
                for hash in hashes {
                    session.insert(hash);
                }
                send_response(framed, &Response::CacheStarted).await?;
            }
        }
    }
}
