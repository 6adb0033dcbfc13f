// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;

use datacapsule_protocol::{Request, Response, SubscribeRequest};

use crate::server::{next_request, send_failure, send_response, ConnectionError, ServerCtx};
use crate::state::CapsuleState;

pub(super) async fn process(
    ctx: &ServerCtx,
    state: Arc<CapsuleState>,
    framed: &mut super::ServerFramed,
    addr: SocketAddr,
) -> Result<(), ConnectionError> {
    loop {
        let request = match next_request(framed).await? {
            Some(Request::Subscribe(sub)) => sub,
            Some(_) => {
                send_failure(framed).await?;
                return Err(ConnectionError::Protocol("expected subscribe request"));
            }
            None => return Ok(()),
        };

        match request {
            SubscribeRequest::LastNum => {
                let (seq_count, _) = state.latest();
                send_response(framed, &Response::Num(seq_count)).await?;
            }
            SubscribeRequest::NameFromNum(seq) => match ctx.store.seq_record(&state.id, seq) {
                Ok(Some(name)) => send_response(framed, &Response::Name(name)).await?,
                Ok(None) => send_response(framed, &Response::Absent).await?,
                Err(err) => {
                    tracing::error!(%addr, error = %err, "sequence lookup failed");
                    send_failure(framed).await?;
                }
            },
            SubscribeRequest::NumFromName(name) => match ctx.store.record_row(&state.id, &name) {
                Ok(Some(row)) => send_response(framed, &Response::Num(row.seq)).await?,
                Ok(None) => send_response(framed, &Response::Absent).await?,
                Err(err) => {
                    tracing::error!(%addr, error = %err, "record lookup failed");
                    send_failure(framed).await?;
                }
            },
            SubscribeRequest::WaitAfter(after) => {
                let mut rx = state.subscribe_seq();
                let current = *rx.borrow_and_update();
                if current > after {
                    send_response(framed, &Response::Num(current)).await?;
                    continue;
                }
                // suspend until a commit advances the count, or the peer
                // goes away; a disconnect releases the waiter silently
                loop {
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return Err(ConnectionError::Protocol("capsule state dropped"));
                            }
                            let seq_count = *rx.borrow_and_update();
                            if seq_count > after {
                                send_response(framed, &Response::Num(seq_count)).await?;
                                break;
                            }
                        }
                        frame = framed.next() => {
                            return match frame {
                                None => Ok(()),
                                Some(_) => {
                                    Err(ConnectionError::Protocol("request while waiting"))
                                }
                            };
                        }
                    }
                }
            }
        }
    }
}
