use datacapsule_protocol::DEFAULT_MAX_FRAME_BYTES;

/// Server tuning knobs. Fanout and the cache shape are protocol-visible:
/// clients must run with the same values for proofs to verify.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Merkle fanout, at least 2. Larger trees mean shorter proofs but a
    /// less useful cache.
    pub merkle_fanout: usize,
    /// Reader session cache entries (direct-mapped).
    pub hash_cache_capacity: usize,
    /// Extra hashes the server may send in place of a signature; 0 disables
    /// signature avoidance.
    pub sig_avoid_max_extra_hashes: usize,
    /// Cap on a single wire frame.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            merkle_fanout: 2,
            hash_cache_capacity: 1024,
            sig_avoid_max_extra_hashes: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.merkle_fanout < 2 {
            return Err("merkle_fanout must be at least 2");
        }
        if self.hash_cache_capacity == 0 {
            return Err("hash_cache_capacity must be at least 1");
        }
        if self.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be positive");
        }
        Ok(())
    }
}
