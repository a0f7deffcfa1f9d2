//! Low-level primitives for the Noise engine.
//!
//! SHA-256, the Noise flavor of HKDF (extract then expand with empty info),
//! ChaCha20-Poly1305 AEAD with Noise's counter nonce layout, and Curve25519
//! key agreement.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::noise::NoiseError;

/// Size of the Poly1305 authentication tag.
pub const TAG_SIZE: usize = 16;

/// Size of a Curve25519 public key and of every derived symmetric key.
pub const KEY_SIZE: usize = 32;

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Noise HKDF with a single 32-byte output.
pub fn hkdf1(chaining_key: &[u8; 32], ikm: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), ikm);
    let mut okm = [0u8; 32];
    hk.expand(&[], &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

/// Noise HKDF with two 32-byte outputs.
///
/// Equivalent to HKDF-SHA256 with `chaining_key` as salt and empty info,
/// which is exactly the HMAC chain the Noise spec defines.
pub fn hkdf2(chaining_key: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), ikm);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm)
        .expect("64 bytes is a valid HKDF-SHA256 output length");

    let mut out1 = [0u8; 32];
    let mut out2 = [0u8; 32];
    out1.copy_from_slice(&okm[..32]);
    out2.copy_from_slice(&okm[32..]);
    (out1, out2)
}

/// Noise HKDF with three 32-byte outputs.
pub fn hkdf3(chaining_key: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), ikm);
    let mut okm = [0u8; 96];
    hk.expand(&[], &mut okm)
        .expect("96 bytes is a valid HKDF-SHA256 output length");

    let mut out1 = [0u8; 32];
    let mut out2 = [0u8; 32];
    let mut out3 = [0u8; 32];
    out1.copy_from_slice(&okm[..32]);
    out2.copy_from_slice(&okm[32..64]);
    out3.copy_from_slice(&okm[64..]);
    (out1, out2, out3)
}

/// Build the 12-byte AEAD nonce: four zero bytes then the counter
/// little-endian, per the Noise spec.
fn nonce_for(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&counter.to_le_bytes());
    *Nonce::from_slice(&bytes)
}

/// Encrypt `plaintext` under `key`/`counter` with `ad` as associated data.
/// Returns ciphertext with the 16-byte tag appended.
pub fn aead_encrypt(
    key: &[u8; 32],
    counter: u64,
    ad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            &nonce_for(counter),
            Payload {
                msg: plaintext,
                aad: ad,
            },
        )
        .map_err(|_| NoiseError::MessageTooLarge(plaintext.len()))
}

/// Decrypt `ciphertext` (tag appended) under `key`/`counter`.
///
/// Fails with [`NoiseError::AuthTag`] when the tag does not verify and with
/// [`NoiseError::Malformed`] when the input is shorter than a tag.
pub fn aead_decrypt(
    key: &[u8; 32],
    counter: u64,
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(NoiseError::Malformed);
    }
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            &nonce_for(counter),
            Payload {
                msg: ciphertext,
                aad: ad,
            },
        )
        .map_err(|_| NoiseError::AuthTag)
}

/// Curve25519 key agreement.
///
/// An all-zero shared secret is the small-subgroup result and is rejected as
/// [`NoiseError::KeyAgreementFailure`].
pub fn dh(secret: &StaticSecret, public: &PublicKey) -> Result<[u8; 32], NoiseError> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(NoiseError::KeyAgreementFailure);
    }
    Ok(shared.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn aead_round_trip_with_ad() {
        let key = [7u8; 32];
        let ct = aead_encrypt(&key, 3, b"ad", b"hello").unwrap();
        assert_eq!(ct.len(), 5 + TAG_SIZE);
        let pt = aead_decrypt(&key, 3, b"ad", &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn aead_rejects_wrong_ad_and_counter() {
        let key = [7u8; 32];
        let ct = aead_encrypt(&key, 3, b"ad", b"hello").unwrap();
        assert!(matches!(
            aead_decrypt(&key, 3, b"other", &ct),
            Err(NoiseError::AuthTag)
        ));
        assert!(matches!(
            aead_decrypt(&key, 4, b"ad", &ct),
            Err(NoiseError::AuthTag)
        ));
    }

    #[test]
    fn aead_rejects_truncated_input() {
        let key = [0u8; 32];
        assert!(matches!(
            aead_decrypt(&key, 0, &[], &[0u8; 15]),
            Err(NoiseError::Malformed)
        ));
    }

    #[test]
    fn hkdf_outputs_are_distinct() {
        let ck = [1u8; 32];
        let (a, b) = hkdf2(&ck, b"ikm");
        let (c, d, e) = hkdf3(&ck, b"ikm");
        // Expansion is prefix-consistent across output counts.
        assert_eq!(a, c);
        assert_eq!(b, d);
        assert_ne!(a, b);
        assert_ne!(d, e);
    }

    #[test]
    fn dh_agrees_both_ways() {
        let a = StaticSecret::random_from_rng(OsRng);
        let b = StaticSecret::random_from_rng(OsRng);
        let ab = dh(&a, &PublicKey::from(&b)).unwrap();
        let ba = dh(&b, &PublicKey::from(&a)).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn dh_rejects_low_order_point() {
        let a = StaticSecret::random_from_rng(OsRng);
        let zero = PublicKey::from([0u8; 32]);
        assert!(matches!(
            dh(&a, &zero),
            Err(NoiseError::KeyAgreementFailure)
        ));
    }
}
