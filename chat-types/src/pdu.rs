//! PDU codec.
//!
//! A PDU is a one-byte type code, a four-byte big-endian payload length and
//! the payload itself. Decoding never truncates: a declared length larger
//! than the receive buffer or than the bytes at hand is a framing error.

use std::fmt;
use std::ops::BitOr;

use crate::{PayloadError, PduError};

/// Size of the fixed header (type + length).
pub const HEADER_LEN: usize = 5;

/// Capacity of the per-read receive buffer, header included.
pub const PDU_BUFFER_SIZE: usize = 64 * 1024;

/// Largest payload that fits the receive buffer.
pub const MAX_PAYLOAD_LEN: usize = PDU_BUFFER_SIZE - HEADER_LEN;

/// One-byte PDU type code.
///
/// [`PduType::ACK`] is a flag bit that composes with the other codes, so a
/// CONNECT reply is `DATA | ACK`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PduType(u8);

impl PduType {
    /// Client authentication: `"nickname|secret"`.
    pub const CLIENT_CONNECT: Self = Self(0x01);
    /// Opaque text for the receiver to display.
    pub const DATA: Self = Self(0x02);
    /// Request the federated nickname list.
    pub const LIST: Self = Self(0x03);
    /// Request the local nickname list of a partner server.
    pub const PEER_LIST: Self = Self(0x04);
    /// Direct message: `"recipient|message|sender"`.
    pub const DM: Self = Self(0x05);
    /// Keepalive, never answered.
    pub const PING: Self = Self(0x06);
    /// Federation link authentication: `"server|secret"`.
    pub const PEER_CONNECT: Self = Self(0x07);
    /// Acknowledgement flag.
    pub const ACK: Self = Self(0x80);

    /// Wrap a raw type byte. Unknown codes are preserved.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// The raw type byte.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Whether the ACK flag is set.
    pub const fn is_ack(self) -> bool {
        self.0 & Self::ACK.0 != 0
    }

    /// The code with the ACK flag cleared.
    pub const fn base(self) -> Self {
        Self(self.0 & !Self::ACK.0)
    }

    /// Human-readable name of the base code.
    pub fn name(self) -> &'static str {
        match self.base() {
            Self::CLIENT_CONNECT => "CLIENT_CONNECT",
            Self::DATA => "DATA",
            Self::LIST => "LIST",
            Self::PEER_LIST => "PEER_LIST",
            Self::DM => "DM",
            Self::PING => "PING",
            Self::PEER_CONNECT => "PEER_CONNECT",
            Self(0) if self.is_ack() => "ACK",
            _ => "UNKNOWN",
        }
    }
}

impl BitOr for PduType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ack() && self.base().0 != 0 {
            write!(f, "{}|ACK", self.name())
        } else {
            f.write_str(self.name())
        }
    }
}

impl fmt::Debug for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PduType({self}, {:#04x})", self.0)
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// Type code.
    pub kind: PduType,
    /// Raw payload. The wire length is always `payload.len()`.
    pub payload: Vec<u8>,
}

impl Pdu {
    /// Create a PDU from raw bytes.
    pub fn new(kind: PduType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Create a PDU with a text payload.
    pub fn text(kind: PduType, text: &str) -> Self {
        Self::new(kind, text.as_bytes())
    }

    /// Create a PDU with an empty payload.
    pub fn empty(kind: PduType) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str, PayloadError> {
        std::str::from_utf8(&self.payload).map_err(|_| PayloadError::InvalidUtf8)
    }

    /// Payload as text, replacing invalid sequences.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PduError> {
        encode(self.kind, &self.payload)
    }
}

/// Encode a PDU.
///
/// Fails if the payload cannot fit the length field or the receive buffer.
pub fn encode(kind: PduType, payload: &[u8]) -> Result<Vec<u8>, PduError> {
    if payload.len() > MAX_PAYLOAD_LEN || u32::try_from(payload.len()).is_err() {
        return Err(PduError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_LEN,
        });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(kind.as_byte());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse and validate a fixed header.
///
/// Returns the type and the declared payload length. A declared length above
/// [`MAX_PAYLOAD_LEN`] is rejected before anything is allocated for it.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(PduType, usize), PduError> {
    let kind = PduType::from_byte(header[0]);
    let declared = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    if declared > MAX_PAYLOAD_LEN {
        return Err(PduError::Oversized {
            declared,
            limit: MAX_PAYLOAD_LEN,
        });
    }

    Ok((kind, declared))
}

/// Decode the PDU at the start of `buffer`.
pub fn decode(buffer: &[u8]) -> Result<Pdu, PduError> {
    decode_prefix(buffer).map(|(pdu, _)| pdu)
}

/// Decode the PDU at the start of `buffer`, returning it with the number of
/// bytes it occupied.
pub fn decode_prefix(buffer: &[u8]) -> Result<(Pdu, usize), PduError> {
    let header: &[u8; HEADER_LEN] = buffer
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(PduError::TruncatedHeader {
            available: buffer.len(),
            required: HEADER_LEN,
        })?;

    let (kind, declared) = parse_header(header)?;

    let body = &buffer[HEADER_LEN..];
    if declared > body.len() {
        return Err(PduError::TruncatedPayload {
            declared,
            available: body.len(),
        });
    }

    let pdu = Pdu::new(kind, &body[..declared]);
    Ok((pdu, HEADER_LEN + declared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty_payload() {
        let bytes = encode(PduType::PING, b"").unwrap();
        assert_eq!(bytes, vec![0x06, 0, 0, 0, 0]);

        let pdu = decode(&bytes).unwrap();
        assert_eq!(pdu.kind, PduType::PING);
        assert!(pdu.payload.is_empty());
    }

    #[test]
    fn roundtrip_single_byte_payload() {
        let bytes = encode(PduType::DATA, b"x").unwrap();
        let pdu = decode(&bytes).unwrap();
        assert_eq!(pdu, Pdu::text(PduType::DATA, "x"));
    }

    #[test]
    fn roundtrip_max_payload() {
        let payload = vec![0xAB; MAX_PAYLOAD_LEN];
        let bytes = encode(PduType::DM, &payload).unwrap();
        assert_eq!(bytes.len(), PDU_BUFFER_SIZE);

        let pdu = decode(&bytes).unwrap();
        assert_eq!(pdu.kind, PduType::DM);
        assert_eq!(pdu.payload, payload);
    }

    #[test]
    fn encode_rejects_payload_over_capacity() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let err = encode(PduType::DATA, &payload).unwrap_err();
        assert_eq!(
            err,
            PduError::PayloadTooLarge {
                size: MAX_PAYLOAD_LEN + 1,
                limit: MAX_PAYLOAD_LEN
            }
        );
    }

    #[test]
    fn length_field_is_big_endian() {
        let bytes = encode(PduType::DATA, &[0u8; 258]).unwrap();
        assert_eq!(&bytes[1..5], &[0, 0, 1, 2]);
    }

    #[test]
    fn decode_rejects_short_header() {
        let err = decode(&[0x02, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            PduError::TruncatedHeader {
                available: 3,
                required: HEADER_LEN
            }
        );
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn decode_rejects_declared_length_beyond_received_bytes() {
        let mut bytes = encode(PduType::DATA, b"hello").unwrap();
        bytes.truncate(bytes.len() - 2);

        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            PduError::TruncatedPayload {
                declared: 5,
                available: 3
            }
        );
    }

    #[test]
    fn decode_rejects_declared_length_beyond_buffer_capacity() {
        // A full-capacity buffer whose header claims one byte more than fits.
        let mut bytes = vec![0u8; PDU_BUFFER_SIZE + 1];
        bytes[0] = PduType::DATA.as_byte();
        bytes[1..5].copy_from_slice(&((MAX_PAYLOAD_LEN + 1) as u32).to_be_bytes());

        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            PduError::Oversized {
                declared: MAX_PAYLOAD_LEN + 1,
                limit: MAX_PAYLOAD_LEN
            }
        );
    }

    #[test]
    fn decode_rejects_huge_declared_length() {
        let header = [0x02, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            parse_header(&header),
            Err(PduError::Oversized { .. })
        ));
    }

    #[test]
    fn decode_prefix_reports_consumed_bytes() {
        let mut bytes = encode(PduType::DATA, b"one").unwrap();
        bytes.extend(encode(PduType::PING, b"").unwrap());

        let (first, used) = decode_prefix(&bytes).unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(used, HEADER_LEN + 3);

        let (second, _) = decode_prefix(&bytes[used..]).unwrap();
        assert_eq!(second.kind, PduType::PING);
    }

    #[test]
    fn ack_flag_composes_with_data() {
        let kind = PduType::DATA | PduType::ACK;
        assert!(kind.is_ack());
        assert_eq!(kind.base(), PduType::DATA);
        assert_eq!(kind.to_string(), "DATA|ACK");

        let pdu = decode(&encode(kind, b"alice").unwrap()).unwrap();
        assert_eq!(pdu.kind, kind);
    }

    #[test]
    fn unknown_codes_survive_decode() {
        let pdu = decode(&[0x42, 0, 0, 0, 0]).unwrap();
        assert_eq!(pdu.kind.as_byte(), 0x42);
        assert_eq!(pdu.kind.name(), "UNKNOWN");
    }

    #[test]
    fn payload_str_rejects_invalid_utf8() {
        let pdu = Pdu::new(PduType::DATA, vec![0xFF, 0xFE]);
        assert_eq!(pdu.payload_str(), Err(PayloadError::InvalidUtf8));
        assert_eq!(pdu.payload_lossy(), "\u{FFFD}\u{FFFD}");
    }
}
