// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Connection dispatch.
//!
//! One task per TCP connection. The first frame must be an init request
//! selecting a role; everything after that is the role's own state machine.
//! Malformed frames and role violations close the connection. Operation
//! failures answer with an empty frame and say nothing more.

mod creator;
mod reader;
mod subscriber;
mod writer;

use std::net::SocketAddr;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use datacapsule_protocol::framing::{
    decode_message, encode_message, failure_frame, FrameCodec, FrameError,
};
use datacapsule_protocol::{InitRequest, Request, Response};

use crate::config::ServerConfig;
use crate::state::CapsuleRegistry;
use crate::storage::{CapsuleStore, StoreError};

pub struct ServerCtx {
    pub config: ServerConfig,
    pub store: CapsuleStore,
    pub registry: CapsuleRegistry,
    pub signing_key: SigningKey,
}

pub(crate) type ServerFramed = Framed<TcpStream, FrameCodec>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("framing: {0}")]
    Frame(#[from] FrameError),

    #[error("storage: {0}")]
    Store(#[from] StoreError),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

/// Accept loop. Runs until the listener fails.
pub async fn serve(listener: TcpListener, ctx: Arc<ServerCtx>) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            tracing::debug!(%addr, "accepted connection");
            if let Err(err) = handle_connection(ctx, stream, addr).await {
                tracing::info!(%addr, error = %err, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    ctx: Arc<ServerCtx>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new(ctx.config.max_frame_bytes));

    let init = match next_request(&mut framed).await? {
        Some(Request::Init(init)) => init,
        Some(_) => {
            send_failure(&mut framed).await?;
            return Err(ConnectionError::Protocol("expected init"));
        }
        None => return Ok(()),
    };

    match init {
        InitRequest::Creator => {
            send_response(&mut framed, &Response::Init).await?;
            creator::process(&ctx, &mut framed, addr).await
        }
        InitRequest::Writer(id) => {
            let Some(state) = ctx.registry.get(&id) else {
                send_failure(&mut framed).await?;
                return Ok(());
            };
            let Some(claim) = state.claim_writer() else {
                tracing::warn!(%addr, capsule = %hex::encode(id), "second writer refused");
                send_failure(&mut framed).await?;
                return Ok(());
            };
            send_response(&mut framed, &Response::Init).await?;
            writer::process(&ctx, state, claim, &mut framed, addr).await
        }
        InitRequest::Reader(id) => {
            let Some(state) = ctx.registry.get(&id) else {
                send_failure(&mut framed).await?;
                return Ok(());
            };
            send_response(&mut framed, &Response::Init).await?;
            reader::process(&ctx, state, &mut framed, addr).await
        }
        InitRequest::Subscriber(id) => {
            let Some(state) = ctx.registry.get(&id) else {
                send_failure(&mut framed).await?;
                return Ok(());
            };
            send_response(&mut framed, &Response::Init).await?;
            subscriber::process(&ctx, state, &mut framed, addr).await
        }
    }
}

/// Reads the next request frame; `None` means the peer closed cleanly.
pub(crate) async fn next_request(
    framed: &mut ServerFramed,
) -> Result<Option<Request>, ConnectionError> {
    match framed.next().await {
        Some(Ok(frame)) => {
            if frame.is_empty() {
                return Err(ConnectionError::Protocol("empty request frame"));
            }
            Ok(Some(decode_message(&frame)?))
        }
        Some(Err(err)) => Err(err.into()),
        None => Ok(None),
    }
}

pub(crate) async fn send_response(
    framed: &mut ServerFramed,
    response: &Response,
) -> Result<(), ConnectionError> {
    let payload = encode_message(response)?;
    framed.send(payload).await?;
    Ok(())
}

pub(crate) async fn send_failure(framed: &mut ServerFramed) -> Result<(), ConnectionError> {
    framed.send(failure_frame()).await?;
    Ok(())
}
