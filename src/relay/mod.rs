//! Relay fallback framing.
//!
//! Encodes and parses the `bitchat1:` envelopes that carry BitChat packets
//! through the relay network when the mesh transport is unavailable.

pub mod envelope;
pub mod packet;

pub use envelope::{decode, encode_ack, encode_pm, NoisePayload, ENVELOPE_PREFIX};
pub use packet::{
    BitchatPacket, NoisePayloadType, PrivateMessage, INITIAL_TTL, MESSAGE_TYPE_NOISE_ENCRYPTED,
};
