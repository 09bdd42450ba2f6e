//! Peer identity: persisted random token, derived stable peer id, display label.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable peer identifier: lowercase hex derived from a persisted token.
/// Ordering is lexicographic on the hex form; the invite tie-break depends on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an identifier received from the transport or the trust store.
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted random token backing the local identity. Generated once per device;
/// the host stores the raw bytes so the derived peer id survives app restarts.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityToken(#[serde(with = "bytes_32")] [u8; 32]);

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl IdentityToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        IdentityToken(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        IdentityToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the stable peer id: SHA-256 of the token, truncated to 16 bytes, hex.
    pub fn peer_id(&self) -> PeerId {
        let mut hasher = Sha256::new();
        hasher.update(b"rinklink-identity-v1");
        hasher.update(self.0);
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in &digest[..16] {
            out.push_str(&format!("{:02x}", b));
        }
        PeerId(out)
    }
}

/// A peer as presented to collaborators: stable id plus a human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub display_name: String,
}

impl PeerIdentity {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Build the local identity from a persisted token.
    pub fn from_token(token: &IdentityToken, display_name: impl Into<String>) -> Self {
        Self::new(token.peer_id(), display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_derivation_is_stable() {
        let token = IdentityToken::generate();
        assert_eq!(token.peer_id(), token.peer_id());
        let copy = IdentityToken::from_bytes(*token.as_bytes());
        assert_eq!(copy.peer_id(), token.peer_id());
    }

    #[test]
    fn distinct_tokens_distinct_ids() {
        let a = IdentityToken::generate();
        let b = IdentityToken::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn peer_id_is_lowercase_hex() {
        let id = IdentityToken::generate().peer_id();
        assert_eq!(id.as_str().len(), 32);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn peer_ids_totally_ordered() {
        let a = PeerId::new("aaaa");
        let b = PeerId::new("bbbb");
        assert!(a < b);
        assert!(!(b < a));
    }
}
