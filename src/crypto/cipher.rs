//! Per-direction cipher state.
//!
//! One [`CipherState`] owns a 32-byte key and a monotone 64-bit counter.
//! An established session holds two, one per direction.

use std::fmt;

use zeroize::Zeroize;

use super::noise::NoiseError;
use super::primitives::{aead_decrypt, aead_encrypt};

/// The counter value reserved for rekey; a cipher refuses to encrypt with it.
const REKEY_NONCE: u64 = u64::MAX;

/// AEAD state for one direction of an established session.
pub struct CipherState {
    key: [u8; 32],
    nonce: u64,
}

impl CipherState {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self { key, nonce: 0 }
    }

    /// Encrypt `plaintext` with `ad` as associated data, consuming one nonce.
    ///
    /// Fails with [`NoiseError::NonceExhausted`] once the counter reaches
    /// 2^64 - 1; that value is reserved for [`CipherState::rekey`].
    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.nonce == REKEY_NONCE {
            return Err(NoiseError::NonceExhausted);
        }
        let ciphertext = aead_encrypt(&self.key, self.nonce, ad, plaintext)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt `ciphertext` with `ad` as associated data.
    ///
    /// The counter advances only on success; a failed tag check leaves the
    /// state untouched so the next valid ciphertext still decrypts.
    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.nonce == REKEY_NONCE {
            return Err(NoiseError::NonceExhausted);
        }
        let plaintext = aead_decrypt(&self.key, self.nonce, ad, ciphertext)?;
        self.nonce += 1;
        Ok(plaintext)
    }

    /// Replace the key with `AEAD(k, 2^64-1, "", zeros(32))` truncated to 32
    /// bytes and reset the counter, per the Noise `REKEY` function.
    pub fn rekey(&mut self) -> Result<(), NoiseError> {
        let mut derived = aead_encrypt(&self.key, REKEY_NONCE, &[], &[0u8; 32])?;
        self.key.copy_from_slice(&derived[..32]);
        derived.zeroize();
        self.nonce = 0;
        Ok(())
    }

    /// Zeroize the key material.
    pub fn clear(&mut self) {
        self.key.zeroize();
        self.nonce = 0;
    }

    /// Current counter value.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Force the counter to an arbitrary value. Exposed for exhaustion tests.
    #[doc(hidden)]
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    #[cfg(test)]
    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherState")
            .field("nonce", &self.nonce)
            .field("key", &"[redacted]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonces_advance_one_per_encrypt() {
        let mut cipher = CipherState::new([9u8; 32]);
        assert_eq!(cipher.nonce(), 0);
        cipher.encrypt_with_ad(&[], b"a").unwrap();
        assert_eq!(cipher.nonce(), 1);
        cipher.encrypt_with_ad(&[], b"b").unwrap();
        assert_eq!(cipher.nonce(), 2);
    }

    #[test]
    fn failed_decrypt_does_not_advance() {
        let mut tx = CipherState::new([9u8; 32]);
        let mut rx = CipherState::new([9u8; 32]);

        let good = tx.encrypt_with_ad(&[], b"payload").unwrap();
        let mut bad = good.clone();
        bad[0] ^= 0x01;

        assert!(matches!(
            rx.decrypt_with_ad(&[], &bad),
            Err(NoiseError::AuthTag)
        ));
        assert_eq!(rx.nonce(), 0);

        // The untampered ciphertext still decrypts afterwards.
        assert_eq!(rx.decrypt_with_ad(&[], &good).unwrap(), b"payload");
        assert_eq!(rx.nonce(), 1);
    }

    #[test]
    fn replayed_ciphertext_fails_auth() {
        let mut tx = CipherState::new([3u8; 32]);
        let mut rx = CipherState::new([3u8; 32]);

        let first = tx.encrypt_with_ad(&[], b"one").unwrap();
        rx.decrypt_with_ad(&[], &first).unwrap();

        // Same bytes again now target nonce 1 and must fail.
        assert!(matches!(
            rx.decrypt_with_ad(&[], &first),
            Err(NoiseError::AuthTag)
        ));
    }

    #[test]
    fn final_nonce_encrypts_then_exhausts() {
        let mut cipher = CipherState::new([5u8; 32]);
        cipher.set_nonce(u64::MAX - 1);
        cipher.encrypt_with_ad(&[], b"last").unwrap();
        assert!(matches!(
            cipher.encrypt_with_ad(&[], b"next"),
            Err(NoiseError::NonceExhausted)
        ));
    }

    #[test]
    fn rekey_changes_key_and_resets_counter() {
        let mut a = CipherState::new([5u8; 32]);
        let mut b = CipherState::new([5u8; 32]);

        a.encrypt_with_ad(&[], b"burn a nonce").unwrap();
        let old_key = *a.key();
        a.rekey().unwrap();
        b.rekey().unwrap();

        assert_ne!(*a.key(), old_key);
        assert_eq!(a.nonce(), 0);
        // Both directions derive the same replacement key.
        assert_eq!(*a.key(), *b.key());

        let ct = a.encrypt_with_ad(&[], b"fresh").unwrap();
        assert_eq!(b.decrypt_with_ad(&[], &ct).unwrap(), b"fresh");
    }

    #[test]
    fn clear_wipes_key() {
        let mut cipher = CipherState::new([0xAAu8; 32]);
        cipher.clear();
        assert_eq!(*cipher.key(), [0u8; 32]);
    }
}
