// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_capsule_metadata, Hash};

/// Creator-supplied Datacapsule metadata. Immutable once the capsule exists;
/// its hash is the capsule identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleMetadata {
    #[serde(with = "hex")]
    pub creator_pub_key: Vec<u8>,
    #[serde(with = "hex")]
    pub writer_pub_key: Vec<u8>,
    pub description: String,
    /// Creator signature over the capsule identifier.
    #[serde(with = "hex")]
    pub creator_signature: Vec<u8>,
}

impl CapsuleMetadata {
    pub fn capsule_id(&self) -> Hash {
        hash_capsule_metadata(&self.creator_pub_key, &self.writer_pub_key, &self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_signing_key, sign_hash, verify_hash_signature};

    #[test]
    fn id_is_stable_and_signature_verifies() {
        let creator = generate_signing_key();
        let writer = generate_signing_key();
        let mut meta = CapsuleMetadata {
            creator_pub_key: creator.verifying_key().to_bytes().to_vec(),
            writer_pub_key: writer.verifying_key().to_bytes().to_vec(),
            description: "sensor log".into(),
            creator_signature: Vec::new(),
        };
        let id = meta.capsule_id();
        meta.creator_signature = sign_hash(&creator, &id);

        assert_eq!(meta.capsule_id(), id);
        assert!(verify_hash_signature(
            &creator.verifying_key(),
            &id,
            &meta.creator_signature
        ));
    }

    #[test]
    fn serde_roundtrip_uses_hex() {
        let meta = CapsuleMetadata {
            creator_pub_key: vec![0xab; 32],
            writer_pub_key: vec![0xcd; 32],
            description: "d".into(),
            creator_signature: vec![0x01, 0x02],
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        let back: CapsuleMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
