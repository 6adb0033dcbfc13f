// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use ed25519_dalek::{SigningKey, VerifyingKey};

use datacapsule_core::capsule::CapsuleMetadata;
use datacapsule_core::crypto::sign_hash;
use datacapsule_core::{Hash, SignedHash};
use datacapsule_protocol::{CreateRequest, InitRequest, Request, Response};

use crate::{connect, next_reply, send_request, DcClientError, ServerReply};

/// Signed creator metadata for a new capsule.
pub fn build_metadata(
    creator_key: &SigningKey,
    writer_key: &VerifyingKey,
    description: &str,
) -> CapsuleMetadata {
    let mut meta = CapsuleMetadata {
        creator_pub_key: creator_key.verifying_key().to_bytes().to_vec(),
        writer_pub_key: writer_key.to_bytes().to_vec(),
        description: description.to_owned(),
        creator_signature: Vec::new(),
    };
    let id = meta.capsule_id();
    meta.creator_signature = sign_hash(creator_key, &id);
    meta
}

/// Creates a capsule in one shot; the connection carries exactly this one
/// operation. Returns the capsule id and the server's countersignature.
pub async fn create_capsule(
    addr: SocketAddr,
    metadata: CapsuleMetadata,
) -> Result<(Hash, SignedHash), DcClientError> {
    let id = metadata.capsule_id();
    let mut framed = connect(addr, InitRequest::Creator).await?;
    send_request(&mut framed, &Request::Create(CreateRequest { metadata })).await?;
    match next_reply(&mut framed).await? {
        ServerReply::Ok(Response::Create(signed)) => Ok((id, signed)),
        ServerReply::Failed => Err(DcClientError::OperationFailed),
        ServerReply::Ok(_) => Err(DcClientError::UnexpectedResponse),
    }
}
