// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use datacapsule_core::crypto::{sign_hash, verify_hash_signature, verifying_key_from_bytes};
use datacapsule_core::SignedHash;
use datacapsule_protocol::{CreateRequest, Request, Response};

use crate::server::{next_request, send_failure, send_response, ConnectionError, ServerCtx};
use crate::state::CapsuleState;

/// One create operation, then the connection is done.
pub(super) async fn process(
    ctx: &ServerCtx,
    framed: &mut super::ServerFramed,
    addr: SocketAddr,
) -> Result<(), ConnectionError> {
    let request = match next_request(framed).await? {
        Some(Request::Create(create)) => create,
        Some(_) => {
            send_failure(framed).await?;
            return Err(ConnectionError::Protocol("expected create request"));
        }
        None => return Ok(()),
    };

    match handle_create(ctx, request) {
        Ok(signed) => send_response(framed, &Response::Create(signed)).await,
        Err(reason) => {
            tracing::warn!(%addr, reason, "create rejected");
            send_failure(framed).await
        }
    }
}

fn handle_create(ctx: &ServerCtx, request: CreateRequest) -> Result<SignedHash, &'static str> {
    let meta = request.metadata;
    let id = meta.capsule_id();

    let creator_key =
        verifying_key_from_bytes(&meta.creator_pub_key).map_err(|_| "bad creator key")?;
    verifying_key_from_bytes(&meta.writer_pub_key).map_err(|_| "bad writer key")?;
    if !verify_hash_signature(&creator_key, &id, &meta.creator_signature) {
        return Err("bad creator signature");
    }

    let created = ctx
        .store
        .create_capsule(&meta)
        .map_err(|_| "storage failure")?;
    if !created {
        return Err("capsule already exists");
    }

    let state = CapsuleState::from_meta(meta).map_err(|_| "bad writer key")?;
    ctx.registry.register(Arc::new(state));
    tracing::info!(capsule = %hex::encode(id), "capsule created");

    Ok(SignedHash {
        hash: id,
        signature: sign_hash(&ctx.signing_key, &id),
    })
}
