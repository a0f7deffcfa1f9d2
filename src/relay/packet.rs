//! BitChat packet codec.
//!
//! The binary envelope body carried through the relay fallback: a fixed
//! header addressing sender and optional recipient, a millisecond timestamp,
//! a TTL, and a typed payload. Private-message payload bodies use a small
//! TLV encoding with one-byte lengths.

use crate::crypto::noise::NoiseError;
use crate::peer::PeerId;

/// Packet type for Noise transport ciphertext.
pub const MESSAGE_TYPE_NOISE_ENCRYPTED: u8 = 0x12;

/// Initial time-to-live for relay-carried packets.
pub const INITIAL_TTL: u8 = 7;

const TLV_MESSAGE_ID: u8 = 0x00;
const TLV_CONTENT: u8 = 0x01;

/// Discriminator carried in the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoisePayloadType {
    PrivateMessage = 0x01,
    Delivered = 0x02,
    ReadReceipt = 0x03,
}

impl NoisePayloadType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::PrivateMessage),
            0x02 => Some(Self::Delivered),
            0x03 => Some(Self::ReadReceipt),
            _ => None,
        }
    }
}

/// A BitChat packet as carried through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitchatPacket {
    pub message_type: u8,
    pub sender_id: PeerId,
    pub recipient_id: Option<PeerId>,
    pub timestamp_ms: u64,
    pub ttl: u8,
    pub payload: Vec<u8>,
    pub has_signature: bool,
}

impl BitchatPacket {
    /// A `noiseEncrypted` packet with the standard initial TTL and no
    /// signature, as relay-adapted frames are sent.
    pub fn noise_encrypted(
        sender_id: PeerId,
        recipient_id: Option<PeerId>,
        timestamp_ms: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_type: MESSAGE_TYPE_NOISE_ENCRYPTED,
            sender_id,
            recipient_id,
            timestamp_ms,
            ttl: INITIAL_TTL,
            payload,
            has_signature: false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, NoiseError> {
        if self.payload.len() > u16::MAX as usize {
            return Err(NoiseError::MessageTooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(30 + self.payload.len());
        out.push(self.message_type);
        out.extend_from_slice(self.sender_id.as_bytes());
        match &self.recipient_id {
            Some(recipient) => {
                out.push(1);
                out.extend_from_slice(recipient.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.push(self.ttl);
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.push(u8::from(self.has_signature));
        Ok(out)
    }

    /// Strict decode: every field length is checked and trailing bytes are
    /// rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, NoiseError> {
        let mut cursor = Cursor::new(bytes);

        let message_type = cursor.take_byte()?;
        let sender_id = PeerId::from_bytes(cursor.take_array::<8>()?);
        let recipient_id = match cursor.take_byte()? {
            0 => None,
            1 => Some(PeerId::from_bytes(cursor.take_array::<8>()?)),
            _ => return Err(NoiseError::Malformed),
        };
        let timestamp_ms = u64::from_be_bytes(cursor.take_array::<8>()?);
        let ttl = cursor.take_byte()?;
        let payload_len = u16::from_be_bytes(cursor.take_array::<2>()?) as usize;
        let payload = cursor.take_slice(payload_len)?.to_vec();
        let has_signature = match cursor.take_byte()? {
            0 => false,
            1 => true,
            _ => return Err(NoiseError::Malformed),
        };
        cursor.finish()?;

        Ok(Self {
            message_type,
            sender_id,
            recipient_id,
            timestamp_ms,
            ttl,
            payload,
            has_signature,
        })
    }
}

/// TLV body of a `privateMessage` payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PrivateMessage {
    pub message_id: String,
    pub content: String,
}

impl PrivateMessage {
    /// Encode as `{messageID, content}` TLVs. Lengths are a single byte, so
    /// a field longer than 255 bytes cannot be represented and yields
    /// `None`.
    pub fn encode(&self) -> Option<Vec<u8>> {
        let message_id = self.message_id.as_bytes();
        let content = self.content.as_bytes();
        if message_id.len() > u8::MAX as usize || content.len() > u8::MAX as usize {
            return None;
        }
        let mut out = Vec::with_capacity(4 + message_id.len() + content.len());
        out.push(TLV_MESSAGE_ID);
        out.push(message_id.len() as u8);
        out.extend_from_slice(message_id);
        out.push(TLV_CONTENT);
        out.push(content.len() as u8);
        out.extend_from_slice(content);
        Some(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NoiseError> {
        let mut message_id = None;
        let mut content = None;

        let mut cursor = Cursor::new(bytes);
        while !cursor.is_empty() {
            let kind = cursor.take_byte()?;
            let len = cursor.take_byte()? as usize;
            let value = cursor.take_slice(len)?;
            match kind {
                TLV_MESSAGE_ID => {
                    message_id =
                        Some(String::from_utf8(value.to_vec()).map_err(|_| NoiseError::Malformed)?)
                }
                TLV_CONTENT => {
                    content =
                        Some(String::from_utf8(value.to_vec()).map_err(|_| NoiseError::Malformed)?)
                }
                // Unknown fields are skipped for forward compatibility.
                _ => {}
            }
        }

        match (message_id, content) {
            (Some(message_id), Some(content)) => Ok(Self {
                message_id,
                content,
            }),
            _ => Err(NoiseError::Malformed),
        }
    }
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take_byte(&mut self) -> Result<u8, NoiseError> {
        let (&byte, rest) = self.bytes.split_first().ok_or(NoiseError::Malformed)?;
        self.bytes = rest;
        Ok(byte)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], NoiseError> {
        if self.bytes.len() < len {
            return Err(NoiseError::Malformed);
        }
        let (taken, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(taken)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], NoiseError> {
        let slice = self.take_slice(N)?;
        slice.try_into().map_err(|_| NoiseError::Malformed)
    }

    fn finish(self) -> Result<(), NoiseError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(NoiseError::Malformed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(recipient: Option<PeerId>) -> BitchatPacket {
        BitchatPacket::noise_encrypted(
            PeerId::from_bytes([1; 8]),
            recipient,
            1_700_000_000_123,
            vec![0xAA, 0xBB, 0xCC],
        )
    }

    #[test]
    fn packet_round_trips_with_recipient() {
        let packet = sample_packet(Some(PeerId::from_bytes([2; 8])));
        let bytes = packet.encode().unwrap();
        assert_eq!(BitchatPacket::decode(&bytes).unwrap(), packet);
        // type + sender + flag + recipient + ts + ttl + len + payload + sig
        assert_eq!(bytes.len(), 1 + 8 + 1 + 8 + 8 + 1 + 2 + 3 + 1);
    }

    #[test]
    fn packet_round_trips_broadcast() {
        let packet = sample_packet(None);
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), 1 + 8 + 1 + 8 + 1 + 2 + 3 + 1);
        let decoded = BitchatPacket::decode(&bytes).unwrap();
        assert!(decoded.recipient_id.is_none());
        assert_eq!(decoded.ttl, INITIAL_TTL);
        assert!(!decoded.has_signature);
    }

    #[test]
    fn packet_rejects_truncation_and_trailing_bytes() {
        let packet = sample_packet(None);
        let bytes = packet.encode().unwrap();

        assert!(matches!(
            BitchatPacket::decode(&bytes[..bytes.len() - 1]),
            Err(NoiseError::Malformed)
        ));

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            BitchatPacket::decode(&extended),
            Err(NoiseError::Malformed)
        ));
    }

    #[test]
    fn packet_rejects_bad_flags() {
        let packet = sample_packet(None);
        let mut bytes = packet.encode().unwrap();
        bytes[9] = 2; // recipient flag
        assert!(matches!(
            BitchatPacket::decode(&bytes),
            Err(NoiseError::Malformed)
        ));
    }

    #[test]
    fn packet_rejects_oversize_payload() {
        let mut packet = sample_packet(None);
        packet.payload = vec![0; u16::MAX as usize + 1];
        assert!(matches!(
            packet.encode(),
            Err(NoiseError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn tlv_round_trips() {
        let message = PrivateMessage {
            message_id: "mid-1".into(),
            content: "msg".into(),
        };
        let bytes = message.encode().unwrap();
        assert_eq!(bytes[0], TLV_MESSAGE_ID);
        assert_eq!(bytes[1], 5);
        assert_eq!(PrivateMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn tlv_rejects_oversize_fields() {
        let message = PrivateMessage {
            message_id: "m".repeat(256),
            content: "x".into(),
        };
        assert!(message.encode().is_none());
    }

    #[test]
    fn tlv_requires_both_fields() {
        // Content TLV only.
        let bytes = [TLV_CONTENT, 2, b'h', b'i'];
        assert!(matches!(
            PrivateMessage::decode(&bytes),
            Err(NoiseError::Malformed)
        ));
    }

    #[test]
    fn tlv_skips_unknown_fields() {
        let message = PrivateMessage {
            message_id: "id".into(),
            content: "body".into(),
        };
        let mut bytes = message.encode().unwrap();
        bytes.extend_from_slice(&[0x7F, 1, 0xFF]);
        assert_eq!(PrivateMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn tlv_rejects_truncated_value() {
        let bytes = [TLV_MESSAGE_ID, 5, b'a'];
        assert!(matches!(
            PrivateMessage::decode(&bytes),
            Err(NoiseError::Malformed)
        ));
    }
}
