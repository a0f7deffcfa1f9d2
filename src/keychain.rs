//! Keychain abstraction.
//!
//! Owns the long-term Curve25519 identity key and the secure-wipe primitive.
//! The private half never leaves zeroizing containers: `StaticSecret` wipes
//! itself on drop, and `secure_clear` is a wipe the compiler cannot elide.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Storage for the long-term identity key.
pub trait Keychain: Send + Sync {
    /// Load the Curve25519 identity key, creating and persisting it on
    /// first use.
    fn load_or_create_static(&self) -> StaticSecret;

    /// Overwrite sensitive bytes in place.
    fn secure_clear(&self, buf: &mut [u8]);
}

/// In-memory keychain. The key lives only for the process lifetime; hosts
/// with durable secure storage provide their own [`Keychain`].
#[derive(Default)]
pub struct MemoryKeychain {
    static_key: Mutex<Option<StaticSecret>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Public half of the identity key.
    pub fn static_public(&self) -> PublicKey {
        PublicKey::from(&self.load_or_create_static())
    }
}

impl Keychain for MemoryKeychain {
    fn load_or_create_static(&self) -> StaticSecret {
        let mut guard = self.static_key.lock();
        guard
            .get_or_insert_with(|| StaticSecret::random_from_rng(OsRng))
            .clone()
    }

    fn secure_clear(&self, buf: &mut [u8]) {
        buf.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_key_is_stable_across_loads() {
        let keychain = MemoryKeychain::new();
        let first = keychain.load_or_create_static();
        let second = keychain.load_or_create_static();
        assert_eq!(
            PublicKey::from(&first).as_bytes(),
            PublicKey::from(&second).as_bytes()
        );
    }

    #[test]
    fn distinct_keychains_hold_distinct_keys() {
        let a = MemoryKeychain::new();
        let b = MemoryKeychain::new();
        assert_ne!(a.static_public().as_bytes(), b.static_public().as_bytes());
    }

    #[test]
    fn secure_clear_wipes_buffer() {
        let keychain = MemoryKeychain::new();
        let mut buf = [0x5Au8; 32];
        keychain.secure_clear(&mut buf);
        assert_eq!(buf, [0u8; 32]);
    }
}
