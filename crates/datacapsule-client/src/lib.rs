// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! datacapsule-client
//!
//! One connection type per role. Each wraps a framed TCP stream, performs
//! the init handshake, and speaks the role's request/response protocol.
//! The reader keeps the mirrored session cache and refuses proofs that do
//! not verify; the writer computes and signs commit roots locally, so the
//! server never needs the writer's private key.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod creator;
pub mod reader;
pub mod subscriber;
pub mod writer;

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use datacapsule_core::CapsuleError;
use datacapsule_protocol::framing::{
    decode_message, encode_message, FrameCodec, FrameError,
};
use datacapsule_protocol::{InitRequest, Request, Response, DEFAULT_MAX_FRAME_BYTES};

#[derive(Debug, Error)]
pub enum DcClientError {
    #[error("framing: {0}")]
    Frame(#[from] FrameError),

    #[error("connection refused at init")]
    Refused,

    #[error("server reported failure")]
    OperationFailed,

    #[error("unexpected response")]
    UnexpectedResponse,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("returned bytes do not hash to the requested name")]
    MismatchedHash,

    #[error(transparent)]
    Core(#[from] CapsuleError),
}

pub(crate) type ClientFramed = Framed<TcpStream, FrameCodec>;

/// What a non-init request came back as: a typed response, or the coarse
/// empty failure frame.
pub(crate) enum ServerReply {
    Ok(Response),
    Failed,
}

pub(crate) async fn connect(
    addr: SocketAddr,
    init: InitRequest,
) -> Result<ClientFramed, DcClientError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(FrameError::from)?;
    let mut framed = Framed::new(stream, FrameCodec::new(DEFAULT_MAX_FRAME_BYTES));
    send_request(&mut framed, &Request::Init(init)).await?;
    match next_reply(&mut framed).await? {
        ServerReply::Ok(Response::Init) => Ok(framed),
        ServerReply::Failed => Err(DcClientError::Refused),
        ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
    }
}

pub(crate) async fn send_request(
    framed: &mut ClientFramed,
    request: &Request,
) -> Result<(), DcClientError> {
    let payload = encode_message(request)?;
    framed.send(payload).await?;
    Ok(())
}

pub(crate) async fn next_reply(framed: &mut ClientFramed) -> Result<ServerReply, DcClientError> {
    match framed.next().await {
        Some(Ok(frame)) => {
            if frame.is_empty() {
                return Ok(ServerReply::Failed);
            }
            Ok(ServerReply::Ok(decode_message(&frame)?))
        }
        Some(Err(err)) => Err(err.into()),
        None => Err(DcClientError::ConnectionClosed),
    }
}
