//! Stable Identifier Hashing
//!
//! Derives spawn ids for configured players that did not bring their own.
//! The same (agent id, team, index) always yields the same id, so a bot that
//! reconnects or is reconfigured into the same slot keeps its identity.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type IdHash = [u8; 32];

/// Domain-separated SHA-256 hasher.
///
/// Order of updates matters; every field is length- or width-delimited so
/// `("ab", "c")` and `("a", "bc")` hash differently.
pub struct IdHasher {
    hasher: Sha256,
}

impl IdHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for spawn ids.
    pub fn for_spawn_ids() -> Self {
        Self::new(b"AGENT_BRIDGE_SPAWN_ID_V1")
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> IdHash {
        self.hasher.finalize().into()
    }
}

/// Derive a spawn id from an agent id, team and player index.
///
/// Zero means "unset" on the wire, so a zero digest prefix is bumped to 1.
pub fn derive_spawn_id(agent_id: &str, team: u32, index: u32) -> i32 {
    let mut hasher = IdHasher::for_spawn_ids();
    hasher.update_str(agent_id);
    hasher.update_u32(team);
    hasher.update_u32(index);
    let hash = hasher.finalize();

    let id = i32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
    if id == 0 {
        1
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_id_deterministic() {
        let a = derive_spawn_id("dev/nexto", 0, 1);
        let b = derive_spawn_id("dev/nexto", 0, 1);
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_spawn_id_depends_on_every_field() {
        let base = derive_spawn_id("dev/nexto", 0, 1);
        assert_ne!(base, derive_spawn_id("dev/necto", 0, 1));
        assert_ne!(base, derive_spawn_id("dev/nexto", 1, 1));
        assert_ne!(base, derive_spawn_id("dev/nexto", 0, 2));
    }

    #[test]
    fn test_length_prefix_separates_fields() {
        let mut h1 = IdHasher::for_spawn_ids();
        h1.update_str("ab");
        h1.update_str("c");

        let mut h2 = IdHasher::for_spawn_ids();
        h2.update_str("a");
        h2.update_str("bc");

        assert_ne!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn test_domain_separation() {
        let mut a = IdHasher::new(b"A");
        a.update_str("data");
        let mut b = IdHasher::new(b"B");
        b.update_str("data");
        assert_ne!(a.finalize(), b.finalize());
    }
}
