//! Peer identity.
//!
//! Peers surface either as a 16-hex short id (8 bytes) or a 64-hex long id
//! equal to their Curve25519 static public key. The canonical in-memory form
//! is the short id; long ids collapse to the first 8 bytes of the SHA-256 of
//! the key. Equality and hashing always use the canonical form.

use std::fmt;
use std::str::FromStr;

use crate::crypto::noise::NoiseError;
use crate::crypto::primitives::sha256;

/// Canonical 8-byte peer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 8]);

impl PeerId {
    /// Surface-form validity: `[A-Za-z0-9_-]{1,64}`, and a purely hex value
    /// must be exactly 16 or 64 characters.
    pub fn is_valid_str(s: &str) -> bool {
        if s.is_empty() || s.len() > 64 {
            return false;
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return false;
        }
        if s.chars().all(|c| c.is_ascii_hexdigit()) {
            return s.len() == 16 || s.len() == 64;
        }
        true
    }

    /// Canonical id for a 32-byte static public key: the first 8 bytes of
    /// its SHA-256.
    pub fn from_public_key(key: &[u8; 32]) -> Self {
        let digest = sha256(key);
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        Self(id)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = NoiseError;

    /// Parse either surface form into the canonical short id. Values that
    /// pass [`PeerId::is_valid_str`] but are not hex ids cannot be
    /// canonicalized and are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid_str(s) {
            return Err(NoiseError::Malformed);
        }
        match s.len() {
            16 => {
                let raw = hex::decode(s).map_err(|_| NoiseError::Malformed)?;
                let mut id = [0u8; 8];
                id.copy_from_slice(&raw);
                Ok(Self(id))
            }
            64 => {
                let raw = hex::decode(s).map_err(|_| NoiseError::Malformed)?;
                let key: [u8; 32] = raw.try_into().map_err(|_| NoiseError::Malformed)?;
                Ok(Self::from_public_key(&key))
            }
            _ => Err(NoiseError::Malformed),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}

impl serde::Serialize for PeerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Lowercase hex SHA-256 of a 32-byte static public key, used for
/// out-of-band identity verification.
pub fn fingerprint(public_key: &[u8; 32]) -> String {
    hex::encode(sha256(public_key))
}
