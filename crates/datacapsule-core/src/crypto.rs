// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Crypto facade: SHA-256 naming, Ed25519 signatures over hashes, and the
//! client-side record cipher. Pure functions, no I/O.
//!
//! Hash width, signature scheme and record cipher are fixed here; both peers
//! link this crate, which is what keeps them consistent.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CapsuleError, CapsuleResult};

pub const HASH_WIDTH: usize = 32;

/// SHA-256 digest naming records, tree blocks and capsules.
pub type Hash = [u8; HASH_WIDTH];

/// The all-zero hash, denoting an absent child or an uninitialized anchor.
pub const NULL_HASH: Hash = [0; HASH_WIDTH];

/// 32-byte AES-256-GCM key for record payloads. Client-side only; the
/// server never holds one.
pub type RecordKey = [u8; 32];

const RECORD_MAGIC: [u8; 4] = *b"DCR\x01";
const RECORD_ALG_AES_256_GCM: u8 = 1;
const NONCE_LEN: usize = 12;
const RECORD_HEADER_LEN: usize = 4 + 1 + 8 + NONCE_LEN;

/// A hash together with an Ed25519 signature over its 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHash {
    #[serde(with = "hex")]
    pub hash: Hash,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

/// Name of an interior tree block: the hash of its concatenated children.
pub fn hash_block(children: &[Hash]) -> Hash {
    let mut h = Sha256::new();
    for child in children {
        h.update(child);
    }
    h.finalize().into()
}

/// Deterministic capsule identifier from the creator metadata.
pub fn hash_capsule_metadata(creator_pub_key: &[u8], writer_pub_key: &[u8], description: &str) -> Hash {
    let mut h = Sha256::new();
    h.update(creator_pub_key);
    h.update(writer_pub_key);
    h.update(description.as_bytes());
    h.finalize().into()
}

pub fn generate_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

pub fn signing_key_from_bytes(bytes: &[u8]) -> CapsuleResult<SigningKey> {
    let seed: [u8; 32] = bytes.try_into().map_err(|_| CapsuleError::InvalidArgument)?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn verifying_key_from_bytes(bytes: &[u8]) -> CapsuleResult<VerifyingKey> {
    let raw: [u8; 32] = bytes.try_into().map_err(|_| CapsuleError::InvalidArgument)?;
    VerifyingKey::from_bytes(&raw).map_err(|_| CapsuleError::InvalidArgument)
}

pub fn sign_hash(key: &SigningKey, hash: &Hash) -> Vec<u8> {
    key.sign(hash).to_bytes().to_vec()
}

pub fn verify_hash_signature(key: &VerifyingKey, hash: &Hash, signature: &[u8]) -> bool {
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(hash, &sig).is_ok()
}

/// Encrypts one record payload. The envelope is
/// `magic || alg || seq (8 bytes LE) || nonce (12 bytes) || ciphertext+tag`,
/// with the header authenticated as AAD. The sequence number rides along in
/// the clear so a reader can index what it decrypts; the server treats the
/// whole envelope as opaque bytes.
pub fn encrypt_record(key: &RecordKey, seq: u64, plaintext: &[u8]) -> CapsuleResult<Vec<u8>> {
    let unbound =
        UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CapsuleError::Cipher)?;
    let sealing = LessSafeKey::new(unbound);

    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + plaintext.len() + 16);
    out.extend_from_slice(&RECORD_MAGIC);
    out.push(RECORD_ALG_AES_256_GCM);
    out.extend_from_slice(&seq.to_le_bytes());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    out.extend_from_slice(&nonce_bytes);

    let aad = out.clone();
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let mut body = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(nonce, Aad::from(&aad), &mut body)
        .map_err(|_| CapsuleError::Cipher)?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypts a record envelope, returning the sequence number it carries and
/// the plaintext.
pub fn decrypt_record(key: &RecordKey, envelope: &[u8]) -> CapsuleResult<(u64, Vec<u8>)> {
    if envelope.len() < RECORD_HEADER_LEN + 16 {
        return Err(CapsuleError::Cipher);
    }
    if envelope[..4] != RECORD_MAGIC || envelope[4] != RECORD_ALG_AES_256_GCM {
        return Err(CapsuleError::Cipher);
    }
    let seq = u64::from_le_bytes(
        envelope[5..13]
            .try_into()
            .map_err(|_| CapsuleError::Cipher)?,
    );
    let nonce_bytes: [u8; NONCE_LEN] = envelope[13..RECORD_HEADER_LEN]
        .try_into()
        .map_err(|_| CapsuleError::Cipher)?;

    let unbound =
        UnboundKey::new(&aead::AES_256_GCM, key).map_err(|_| CapsuleError::Cipher)?;
    let opening = LessSafeKey::new(unbound);
    let aad = &envelope[..RECORD_HEADER_LEN];
    let mut body = envelope[RECORD_HEADER_LEN..].to_vec();
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let plaintext = opening
        .open_in_place(nonce, Aad::from(aad), &mut body)
        .map_err(|_| CapsuleError::Cipher)?;
    Ok((seq, plaintext.to_vec()))
}
