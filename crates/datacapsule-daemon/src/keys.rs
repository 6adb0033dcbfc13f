// Copyright (c) 2026 Datacapsule Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon signing key: loaded from the data directory, created on first
//! start. The server countersigns capsule ids and commit roots with it so
//! clients can corroborate what this replica accepted.

use std::io;
use std::path::Path;

use ed25519_dalek::SigningKey;

use datacapsule_core::crypto::generate_signing_key;

const KEY_FILE: &str = "server_ed25519.key";

pub fn load_or_create_signing_key(data_dir: &Path) -> io::Result<SigningKey> {
    let path = data_dir.join(KEY_FILE);
    if path.exists() {
        let encoded = std::fs::read_to_string(&path)?;
        let bytes = hex::decode(encoded.trim())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed server key file"))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "server key must be 32 bytes"))?;
        return Ok(SigningKey::from_bytes(&seed));
    }
    let key = generate_signing_key();
    std::fs::write(&path, hex::encode(key.to_bytes()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_is_created_once_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let first = load_or_create_signing_key(dir.path()).unwrap();
        let second = load_or_create_signing_key(dir.path()).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[test]
    fn malformed_key_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "not hex").unwrap();
        assert!(load_or_create_signing_key(dir.path()).is_err());
    }
}
