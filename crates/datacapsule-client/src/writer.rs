// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use ed25519_dalek::SigningKey;

use datacapsule_core::crypto::{hash_bytes, sign_hash};
use datacapsule_core::merkle::commit_root;
use datacapsule_core::{Hash, SignedHash, NULL_HASH};
use datacapsule_protocol::{InitRequest, Request, Response, WriteRequest};

use crate::{connect, next_reply, send_request, ClientFramed, DcClientError, ServerReply};

/// Writer session. Mirrors the server's view: the committed count, the
/// latest committed root, and the staged uncommitted hashes. A failed
/// commit clears the staged list on both sides; replay the writes and
/// commit again.
pub struct WriterConnection {
    framed: ClientFramed,
    signing_key: SigningKey,
    fanout: usize,
    committed: u64,
    last_root: Hash,
    staged: Vec<Hash>,
}

impl WriterConnection {
    /// Opens a writer on a capsule with no committed records yet.
    pub async fn connect(
        addr: SocketAddr,
        capsule: Hash,
        signing_key: SigningKey,
        fanout: usize,
    ) -> Result<Self, DcClientError> {
        Self::connect_with_state(addr, capsule, signing_key, fanout, 0, NULL_HASH).await
    }

    /// Opens a writer that resumes from known capsule state (the committed
    /// record count and latest root from a previous session).
    pub async fn connect_with_state(
        addr: SocketAddr,
        capsule: Hash,
        signing_key: SigningKey,
        fanout: usize,
        committed: u64,
        last_root: Hash,
    ) -> Result<Self, DcClientError> {
        let framed = connect(addr, InitRequest::Writer(capsule)).await?;
        Ok(Self {
            framed,
            signing_key,
            fanout,
            committed,
            last_root,
            staged: Vec::new(),
        })
    }

    /// Stages one encrypted record; durable only after [`commit`].
    ///
    /// [`commit`]: WriterConnection::commit
    pub async fn write(&mut self, data: Vec<u8>) -> Result<Hash, DcClientError> {
        let name = hash_bytes(&data);
        let seq = self.committed + self.staged.len() as u64;
        send_request(&mut self.framed, &Request::Write(WriteRequest::Record { data, seq })).await?;
        match next_reply(&mut self.framed).await? {
            ServerReply::Ok(Response::WriteAck) => {
                self.staged.push(name);
                Ok(name)
            }
            ServerReply::Failed => Err(DcClientError::OperationFailed),
            ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
        }
    }

    /// Commits the staged batch. `chain_prev` includes the previous commit's
    /// root as an extra leaf so newer signatures can cover older records.
    pub async fn commit(&mut self, chain_prev: bool) -> Result<SignedHash, DcClientError> {
        let extra = (chain_prev && self.last_root != NULL_HASH).then_some(self.last_root);
        let root = commit_root(&self.staged, extra, self.fanout)?;
        let signature = sign_hash(&self.signing_key, &root);
        send_request(
            &mut self.framed,
            &Request::Write(WriteRequest::Commit {
                root,
                signature,
                include_prev_root: chain_prev,
            }),
        )
        .await?;
        match next_reply(&mut self.framed).await? {
            ServerReply::Ok(Response::Commit(server_signed)) => {
                self.committed += self.staged.len() as u64;
                self.staged.clear();
                self.last_root = root;
                Ok(server_signed)
            }
            ServerReply::Failed => {
                // the server discarded the batch too
                self.staged.clear();
                Err(DcClientError::OperationFailed)
            }
            ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
        }
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn last_root(&self) -> Hash {
        self.last_root
    }
}
