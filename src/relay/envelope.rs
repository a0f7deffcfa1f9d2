//! `bitchat1:` relay envelopes.
//!
//! When the mesh transport is unavailable, payloads travel through the relay
//! network as opaque strings: a [`BitchatPacket`] encoded as unpadded
//! base64url behind a `bitchat1:` prefix.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::crypto::noise::NoiseError;
use crate::peer::PeerId;
use crate::relay::packet::{
    BitchatPacket, NoisePayloadType, PrivateMessage, MESSAGE_TYPE_NOISE_ENCRYPTED,
};

/// URI-style prefix of every relay envelope.
pub const ENVELOPE_PREFIX: &str = "bitchat1:";

/// Decoded payload of a relay envelope.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NoisePayload {
    PrivateMessage { message_id: String, content: String },
    Delivered { message_id: String },
    ReadReceipt { message_id: String },
}

/// Encode a private message envelope. Returns `None` when a field exceeds
/// what the TLV body can carry.
pub fn encode_pm(
    content: &str,
    message_id: &str,
    recipient: Option<PeerId>,
    sender: PeerId,
) -> Option<String> {
    let body = PrivateMessage {
        message_id: message_id.to_owned(),
        content: content.to_owned(),
    }
    .encode()?;

    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(NoisePayloadType::PrivateMessage as u8);
    payload.extend_from_slice(&body);
    seal(payload, recipient, sender)
}

/// Encode an acknowledgment envelope carrying a bare message id. `kind`
/// must be `Delivered` or `ReadReceipt`.
pub fn encode_ack(
    kind: NoisePayloadType,
    message_id: &str,
    recipient: Option<PeerId>,
    sender: PeerId,
) -> Option<String> {
    if kind == NoisePayloadType::PrivateMessage {
        return None;
    }
    let mut payload = Vec::with_capacity(1 + message_id.len());
    payload.push(kind as u8);
    payload.extend_from_slice(message_id.as_bytes());
    seal(payload, recipient, sender)
}

/// Parse and validate a relay envelope.
pub fn decode(envelope: &str) -> Result<(BitchatPacket, NoisePayload), NoiseError> {
    let encoded = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or(NoiseError::Malformed)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| NoiseError::Malformed)?;

    let packet = BitchatPacket::decode(&bytes)?;
    if packet.message_type != MESSAGE_TYPE_NOISE_ENCRYPTED {
        return Err(NoiseError::Malformed);
    }

    let (&type_byte, body) = packet.payload.split_first().ok_or(NoiseError::Malformed)?;
    let payload = match NoisePayloadType::from_byte(type_byte).ok_or(NoiseError::Malformed)? {
        NoisePayloadType::PrivateMessage => {
            let message = PrivateMessage::decode(body)?;
            NoisePayload::PrivateMessage {
                message_id: message.message_id,
                content: message.content,
            }
        }
        NoisePayloadType::Delivered => NoisePayload::Delivered {
            message_id: ack_id(body)?,
        },
        NoisePayloadType::ReadReceipt => NoisePayload::ReadReceipt {
            message_id: ack_id(body)?,
        },
    };

    Ok((packet, payload))
}

fn seal(payload: Vec<u8>, recipient: Option<PeerId>, sender: PeerId) -> Option<String> {
    let packet = BitchatPacket::noise_encrypted(sender, recipient, now_ms(), payload);
    let bytes = packet.encode().ok()?;
    Some(format!("{ENVELOPE_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes)))
}

fn ack_id(body: &[u8]) -> Result<String, NoiseError> {
    if body.is_empty() {
        return Err(NoiseError::Malformed);
    }
    String::from_utf8(body.to_vec()).map_err(|_| NoiseError::Malformed)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> PeerId {
        PeerId::from_bytes([0x11; 8])
    }

    fn recipient() -> PeerId {
        PeerId::from_bytes([0x22; 8])
    }

    #[test]
    fn pm_envelope_round_trips() {
        let envelope = encode_pm("msg", "mid-1", Some(recipient()), sender()).unwrap();
        assert!(envelope.starts_with(ENVELOPE_PREFIX));

        let encoded = &envelope[ENVELOPE_PREFIX.len()..];
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));

        let (packet, payload) = decode(&envelope).unwrap();
        assert_eq!(packet.sender_id, sender());
        assert_eq!(packet.recipient_id, Some(recipient()));
        assert_eq!(packet.payload[0], NoisePayloadType::PrivateMessage as u8);
        assert!(!packet.has_signature);
        assert_eq!(
            payload,
            NoisePayload::PrivateMessage {
                message_id: "mid-1".into(),
                content: "msg".into(),
            }
        );
    }

    #[test]
    fn ack_envelopes_round_trip() {
        let envelope =
            encode_ack(NoisePayloadType::Delivered, "mid-7", None, sender()).unwrap();
        let (packet, payload) = decode(&envelope).unwrap();
        assert!(packet.recipient_id.is_none());
        assert_eq!(
            payload,
            NoisePayload::Delivered {
                message_id: "mid-7".into()
            }
        );

        let envelope =
            encode_ack(NoisePayloadType::ReadReceipt, "mid-8", Some(recipient()), sender())
                .unwrap();
        let (_, payload) = decode(&envelope).unwrap();
        assert_eq!(
            payload,
            NoisePayload::ReadReceipt {
                message_id: "mid-8".into()
            }
        );
    }

    #[test]
    fn pm_kind_is_not_an_ack() {
        assert!(encode_ack(NoisePayloadType::PrivateMessage, "mid", None, sender()).is_none());
    }

    #[test]
    fn oversize_fields_refuse_to_encode() {
        let long = "x".repeat(256);
        assert!(encode_pm(&long, "mid", None, sender()).is_none());
        assert!(encode_pm("msg", &long, None, sender()).is_none());
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert!(matches!(decode("bogus:abc"), Err(NoiseError::Malformed)));
        assert!(matches!(
            decode("bitchat1:!!!not-base64!!!"),
            Err(NoiseError::Malformed)
        ));

        // Valid base64url, truncated packet.
        let truncated = format!("{ENVELOPE_PREFIX}{}", URL_SAFE_NO_PAD.encode([0u8; 4]));
        assert!(matches!(decode(&truncated), Err(NoiseError::Malformed)));
    }

    #[test]
    fn wrong_packet_type_is_rejected() {
        let envelope = encode_pm("msg", "mid", None, sender()).unwrap();
        let mut bytes = URL_SAFE_NO_PAD
            .decode(&envelope[ENVELOPE_PREFIX.len()..])
            .unwrap();
        bytes[0] = 0x04;
        let forged = format!("{ENVELOPE_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes));
        assert!(matches!(decode(&forged), Err(NoiseError::Malformed)));
    }

    #[test]
    fn empty_ack_id_is_rejected() {
        let packet = BitchatPacket::noise_encrypted(
            sender(),
            None,
            0,
            vec![NoisePayloadType::Delivered as u8],
        );
        let envelope = format!(
            "{ENVELOPE_PREFIX}{}",
            URL_SAFE_NO_PAD.encode(packet.encode().unwrap())
        );
        assert!(matches!(decode(&envelope), Err(NoiseError::Malformed)));
    }
}
