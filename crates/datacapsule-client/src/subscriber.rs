// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use datacapsule_core::Hash;
use datacapsule_protocol::{InitRequest, Request, Response, SubscribeRequest};

use crate::{connect, next_reply, send_request, ClientFramed, DcClientError, ServerReply};

pub struct SubscriberConnection {
    framed: ClientFramed,
}

impl SubscriberConnection {
    pub async fn connect(addr: SocketAddr, capsule: Hash) -> Result<Self, DcClientError> {
        let framed = connect(addr, InitRequest::Subscriber(capsule)).await?;
        Ok(Self { framed })
    }

    async fn roundtrip(&mut self, request: SubscribeRequest) -> Result<Response, DcClientError> {
        send_request(&mut self.framed, &Request::Subscribe(request)).await?;
        match next_reply(&mut self.framed).await? {
            ServerReply::Ok(response) => Ok(response),
            ServerReply::Failed => Err(DcClientError::OperationFailed),
        }
    }

    /// Number of committed records.
    pub async fn last_num(&mut self) -> Result<u64, DcClientError> {
        match self.roundtrip(SubscribeRequest::LastNum).await? {
            Response::Num(count) => Ok(count),
            _ => Err(DcClientError::UnexpectedResponse),
        }
    }

    pub async fn name_from_num(&mut self, seq: u64) -> Result<Option<Hash>, DcClientError> {
        match self.roundtrip(SubscribeRequest::NameFromNum(seq)).await? {
            Response::Name(name) => Ok(Some(name)),
            Response::Absent => Ok(None),
            _ => Err(DcClientError::UnexpectedResponse),
        }
    }

    pub async fn num_from_name(&mut self, name: Hash) -> Result<Option<u64>, DcClientError> {
        match self.roundtrip(SubscribeRequest::NumFromName(name)).await? {
            Response::Num(seq) => Ok(Some(seq)),
            Response::Absent => Ok(None),
            _ => Err(DcClientError::UnexpectedResponse),
        }
    }

    /// Returns as soon as the committed count exceeds `after`; suspends on
    /// the server otherwise.
    pub async fn wait_after(&mut self, after: u64) -> Result<u64, DcClientError> {
        match self.roundtrip(SubscribeRequest::WaitAfter(after)).await? {
            Response::Num(count) => Ok(count),
            _ => Err(DcClientError::UnexpectedResponse),
        }
    }
}
