//! Cryptographic core for BitChat.
//!
//! Noise XX over Curve25519, ChaCha20-Poly1305 and SHA-256: low-level
//! primitives, per-direction cipher state, and the handshake engine.

pub mod cipher;
pub mod noise;
pub mod primitives;

pub use cipher::CipherState;
pub use noise::{
    HandshakeState, NoiseError, NoiseRole, HANDSHAKE_MSG1_SIZE, HANDSHAKE_MSG2_SIZE,
    HANDSHAKE_MSG3_SIZE, MAX_MESSAGE_SIZE, NOISE_PROTOCOL_NAME,
};
