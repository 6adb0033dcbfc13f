// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use ed25519_dalek::VerifyingKey;

use datacapsule_core::crypto::hash_bytes;
use datacapsule_core::proof::{verify_proof, Proof};
use datacapsule_core::readstate::ReadState;
use datacapsule_core::Hash;
use datacapsule_protocol::{InitRequest, ReadRequest, Request, Response};

use crate::{connect, next_reply, send_request, ClientFramed, DcClientError, ServerReply};

/// Reader session holding the client half of the paired session cache.
/// Cache capacity and fanout must match the server's configuration; a
/// mismatch shows up as proofs failing to verify.
pub struct ReaderConnection {
    framed: ClientFramed,
    state: ReadState,
    writer_key: VerifyingKey,
    fanout: usize,
}

impl ReaderConnection {
    pub async fn connect(
        addr: SocketAddr,
        capsule: Hash,
        writer_key: VerifyingKey,
        fanout: usize,
        cache_capacity: usize,
    ) -> Result<Self, DcClientError> {
        let framed = connect(addr, InitRequest::Reader(capsule)).await?;
        Ok(Self {
            framed,
            state: ReadState::new(cache_capacity, fanout),
            writer_key,
            fanout,
        })
    }

    /// Fetches a record's encrypted bytes, checking them against their
    /// name. Cache state is untouched.
    pub async fn read(&mut self, name: Hash) -> Result<Option<Vec<u8>>, DcClientError> {
        send_request(&mut self.framed, &Request::Read(ReadRequest::Data(name))).await?;
        match next_reply(&mut self.framed).await? {
            ServerReply::Ok(Response::Data(bytes)) => {
                if hash_bytes(&bytes) != name {
                    return Err(DcClientError::MismatchedHash);
                }
                Ok(Some(bytes))
            }
            ServerReply::Ok(Response::Absent) => Ok(None),
            ServerReply::Failed => Err(DcClientError::OperationFailed),
            ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
        }
    }

    /// Requests and verifies an inclusion proof for `target`. On success
    /// both session caches have absorbed the stream in lock-step; the
    /// verified proof is returned for inspection.
    pub async fn prove(&mut self, target: Hash) -> Result<Proof, DcClientError> {
        send_request(&mut self.framed, &Request::Read(ReadRequest::Proof(target))).await?;
        match next_reply(&mut self.framed).await? {
            ServerReply::Ok(Response::Proof(proof)) => {
                verify_proof(&mut self.state, &self.writer_key, &target, &proof, self.fanout)?;
                Ok(proof)
            }
            ServerReply::Failed => Err(DcClientError::OperationFailed),
            ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
        }
    }

    /// Replays a persisted cache into this fresh session, on both sides.
    pub async fn start_cache(&mut self, hashes: Vec<Hash>) -> Result<(), DcClientError> {
        send_request(
            &mut self.framed,
            &Request::Read(ReadRequest::StartCache(hashes.clone())),
        )
        .await?;
        match next_reply(&mut self.framed).await? {
            ServerReply::Ok(Response::CacheStarted) => {
                for hash in hashes {
                    self.state.insert(hash);
                }
                Ok(())
            }
            ServerReply::Failed => Err(DcClientError::OperationFailed),
            ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
        }
    }
}
