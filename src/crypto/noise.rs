//! Noise XX handshake engine.
//!
//! Implements `Noise_XX_25519_ChaChaPoly_SHA256` directly over the
//! primitives in [`super::primitives`]: the symmetric state (ck/h), the
//! three-message XX pattern executor, and the split into per-direction
//! transport ciphers. Message sizes are fixed by the pattern: 32, 96 and
//! 64 bytes.

use std::fmt;

use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::cipher::CipherState;
use super::primitives::{dh, hkdf2, sha256, KEY_SIZE};

/// Full protocol name; exactly 32 bytes, so it seeds `h` verbatim.
pub const NOISE_PROTOCOL_NAME: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Maximum size of any Noise message.
pub const MAX_MESSAGE_SIZE: usize = 65535;

/// XX message 1: initiator ephemeral.
pub const HANDSHAKE_MSG1_SIZE: usize = 32;
/// XX message 2: responder ephemeral, encrypted static, encrypted payload.
pub const HANDSHAKE_MSG2_SIZE: usize = 96;
/// XX message 3: encrypted static, encrypted payload.
pub const HANDSHAKE_MSG3_SIZE: usize = 64;

const MESSAGE_SIZES: [usize; 3] = [
    HANDSHAKE_MSG1_SIZE,
    HANDSHAKE_MSG2_SIZE,
    HANDSHAKE_MSG3_SIZE,
];

/// Errors raised by the session core.
#[derive(Error, Debug, Clone)]
pub enum NoiseError {
    #[error("operation not valid in the current state")]
    InvalidState,

    #[error("session is not established")]
    NotEstablished,

    #[error("no session for peer {0}")]
    SessionNotFound(String),

    #[error("session with peer {0} is already established")]
    AlreadyEstablished(String),

    #[error("malformed message or frame")]
    Malformed,

    #[error("authentication tag verification failed")]
    AuthTag,

    #[error("nonce counter exhausted")]
    NonceExhausted,

    #[error("key agreement produced an invalid shared secret")]
    KeyAgreementFailure,

    #[error("message too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("handshake failed: {0}")]
    HandshakeFailed(Box<NoiseError>),
}

impl serde::Serialize for NoiseError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Role in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseRole {
    Initiator,
    Responder,
}

impl fmt::Display for NoiseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseRole::Initiator => write!(f, "initiator"),
            NoiseRole::Responder => write!(f, "responder"),
        }
    }
}

/// Symmetric state: chaining key, handshake hash, and the handshake cipher.
struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    cipher: Option<CipherState>,
}

impl SymmetricState {
    fn new() -> Self {
        let name = NOISE_PROTOCOL_NAME.as_bytes();
        let h = if name.len() <= 32 {
            let mut h = [0u8; 32];
            h[..name.len()].copy_from_slice(name);
            h
        } else {
            sha256(name)
        };
        Self {
            ck: h,
            h,
            cipher: None,
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut buf = Vec::with_capacity(32 + data.len());
        buf.extend_from_slice(&self.h);
        buf.extend_from_slice(data);
        self.h = sha256(&buf);
    }

    fn mix_key(&mut self, ikm: &[u8]) {
        let (ck, temp_key) = hkdf2(&self.ck, ikm);
        self.ck = ck;
        self.cipher = Some(CipherState::new(temp_key));
    }

    /// Encrypt with `h` as associated data (plaintext pass-through before the
    /// first `mix_key`), then absorb the ciphertext into `h`.
    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let h = self.h;
        let ciphertext = match self.cipher.as_mut() {
            Some(cipher) => cipher.encrypt_with_ad(&h, plaintext)?,
            None => plaintext.to_vec(),
        };
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let h = self.h;
        let plaintext = match self.cipher.as_mut() {
            Some(cipher) => cipher.decrypt_with_ad(&h, ciphertext)?,
            None => ciphertext.to_vec(),
        };
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derive the two transport ciphers: output 1 for initiator-to-responder
    /// traffic, output 2 for the reverse direction.
    fn split(&self) -> (CipherState, CipherState) {
        let (k1, k2) = hkdf2(&self.ck, &[]);
        (CipherState::new(k1), CipherState::new(k2))
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
        self.h.zeroize();
    }
}

/// Executor for the three-message XX pattern.
///
/// `write_message` and `read_message` are driven by an internal cursor and
/// enforce whose turn it is; after the third message [`Self::split`] yields
/// the transport ciphers exactly once.
pub struct HandshakeState {
    role: NoiseRole,
    symmetric: SymmetricState,
    local_static: StaticSecret,
    local_ephemeral: Option<StaticSecret>,
    remote_static: Option<PublicKey>,
    remote_ephemeral: Option<PublicKey>,
    message_index: usize,
    split_taken: bool,
    self_dial: bool,
    sent_messages: Vec<Vec<u8>>,
}

impl HandshakeState {
    pub fn new(role: NoiseRole, local_static: StaticSecret) -> Self {
        let mut symmetric = SymmetricState::new();
        // Empty prologue, mixed per the Noise initialization rules.
        symmetric.mix_hash(&[]);
        Self {
            role,
            symmetric,
            local_static,
            local_ephemeral: None,
            remote_static: None,
            remote_ephemeral: None,
            message_index: 0,
            split_taken: false,
            self_dial: false,
            sent_messages: Vec::new(),
        }
    }

    pub fn role(&self) -> NoiseRole {
        self.role
    }

    /// True when the next pattern message is ours to write.
    pub fn is_my_turn(&self) -> bool {
        if self.is_complete() {
            return false;
        }
        match self.role {
            NoiseRole::Initiator => self.message_index % 2 == 0,
            NoiseRole::Responder => self.message_index % 2 == 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.message_index >= MESSAGE_SIZES.len()
    }

    /// Emit the next pattern message.
    pub fn write_message(&mut self) -> Result<Vec<u8>, NoiseError> {
        if self.is_complete() || !self.is_my_turn() {
            return Err(NoiseError::InvalidState);
        }

        let message = match self.message_index {
            // -> e
            0 => {
                let e = StaticSecret::random_from_rng(OsRng);
                let e_pub = PublicKey::from(&e);
                self.local_ephemeral = Some(e);

                let mut message = e_pub.as_bytes().to_vec();
                self.symmetric.mix_hash(e_pub.as_bytes());
                let payload = self.symmetric.encrypt_and_hash(&[])?;
                message.extend_from_slice(&payload);
                message
            }
            // <- e, ee, s, es
            1 => {
                let re = self.remote_ephemeral.ok_or(NoiseError::InvalidState)?;
                let e = StaticSecret::random_from_rng(OsRng);
                let e_pub = PublicKey::from(&e);

                let mut message = e_pub.as_bytes().to_vec();
                self.symmetric.mix_hash(e_pub.as_bytes());
                self.symmetric.mix_key(&dh(&e, &re)?);
                self.local_ephemeral = Some(e);

                let s_pub = PublicKey::from(&self.local_static);
                let enc_s = self.symmetric.encrypt_and_hash(s_pub.as_bytes())?;
                message.extend_from_slice(&enc_s);

                self.symmetric.mix_key(&dh(&self.local_static, &re)?);
                let payload = self.symmetric.encrypt_and_hash(&[])?;
                message.extend_from_slice(&payload);
                message
            }
            // -> s, se
            _ => {
                let re = self.remote_ephemeral.ok_or(NoiseError::InvalidState)?;

                let s_pub = PublicKey::from(&self.local_static);
                let mut message = self.symmetric.encrypt_and_hash(s_pub.as_bytes())?;

                self.symmetric.mix_key(&dh(&self.local_static, &re)?);
                let payload = self.symmetric.encrypt_and_hash(&[])?;
                message.extend_from_slice(&payload);
                message
            }
        };

        self.sent_messages.push(message.clone());
        self.message_index += 1;
        Ok(message)
    }

    /// Consume the next pattern message from the peer.
    pub fn read_message(&mut self, message: &[u8]) -> Result<(), NoiseError> {
        if self.is_complete() || self.is_my_turn() {
            return Err(NoiseError::InvalidState);
        }
        if message.len() != MESSAGE_SIZES[self.message_index] {
            return Err(NoiseError::Malformed);
        }

        match self.message_index {
            // -> e
            0 => {
                let re = Self::public_key(&message[..KEY_SIZE])?;
                self.symmetric.mix_hash(re.as_bytes());
                self.remote_ephemeral = Some(re);
                self.symmetric.decrypt_and_hash(&message[KEY_SIZE..])?;
            }
            // <- e, ee, s, es
            1 => {
                let re = Self::public_key(&message[..KEY_SIZE])?;
                self.symmetric.mix_hash(re.as_bytes());
                {
                    let e = self.local_ephemeral.as_ref().ok_or(NoiseError::InvalidState)?;
                    let ee = dh(e, &re)?;
                    self.symmetric.mix_key(&ee);
                }

                let rs_bytes = self.symmetric.decrypt_and_hash(&message[KEY_SIZE..80])?;
                let rs = Self::public_key(&rs_bytes)?;
                self.note_remote_static(rs);

                {
                    let e = self.local_ephemeral.as_ref().ok_or(NoiseError::InvalidState)?;
                    let es = dh(e, &rs)?;
                    self.symmetric.mix_key(&es);
                }
                self.symmetric.decrypt_and_hash(&message[80..])?;
                self.remote_ephemeral = Some(re);
            }
            // -> s, se
            _ => {
                let rs_bytes = self.symmetric.decrypt_and_hash(&message[..48])?;
                let rs = Self::public_key(&rs_bytes)?;
                self.note_remote_static(rs);

                {
                    let e = self.local_ephemeral.as_ref().ok_or(NoiseError::InvalidState)?;
                    let se = dh(e, &rs)?;
                    self.symmetric.mix_key(&se);
                }
                self.symmetric.decrypt_and_hash(&message[48..])?;
            }
        }

        self.message_index += 1;
        Ok(())
    }

    /// Derive the transport ciphers, oriented for our role: `(send, recv)`.
    /// Valid exactly once, after the pattern completes.
    pub fn split(&mut self) -> Result<(CipherState, CipherState), NoiseError> {
        if !self.is_complete() || self.split_taken {
            return Err(NoiseError::InvalidState);
        }
        self.split_taken = true;
        let (c1, c2) = self.symmetric.split();
        Ok(match self.role {
            NoiseRole::Initiator => (c1, c2),
            NoiseRole::Responder => (c2, c1),
        })
    }

    /// Remote long-term key, available once the pattern completes.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        if !self.is_complete() {
            return None;
        }
        self.remote_static.map(|pk| pk.to_bytes())
    }

    /// Final handshake hash for channel binding, available after completion.
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        if !self.is_complete() {
            return None;
        }
        Some(self.symmetric.h)
    }

    /// True when the peer presented our own static key.
    pub fn is_self_dial(&self) -> bool {
        self.self_dial
    }

    /// The handshake messages we wrote, retained for diagnostics. At most
    /// two entries as initiator, one as responder; wiped on drop.
    pub fn sent_messages(&self) -> &[Vec<u8>] {
        &self.sent_messages
    }

    fn note_remote_static(&mut self, rs: PublicKey) {
        self.self_dial = rs == PublicKey::from(&self.local_static);
        self.remote_static = Some(rs);
    }

    fn public_key(bytes: &[u8]) -> Result<PublicKey, NoiseError> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| NoiseError::Malformed)?;
        Ok(PublicKey::from(raw))
    }
}

impl Drop for HandshakeState {
    fn drop(&mut self) {
        for message in &mut self.sent_messages {
            message.zeroize();
        }
    }
}

impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeState")
            .field("role", &self.role)
            .field("message_index", &self.message_index)
            .field("has_remote_static", &self.remote_static.is_some())
            .field("has_remote_ephemeral", &self.remote_ephemeral.is_some())
            .finish()
    }
}
