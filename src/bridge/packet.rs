//! Outer bridge packet building and header decoding.
//!
//! Packet structure:
//! - Type (1 byte)
//! - Payload length (2 bytes, LE)
//! - Payload (`length` bytes)

use super::types::OUTER_HEADER_SIZE;
use crate::error::{AppError, Result};

/// Build an outer packet around `payload`.
pub fn build_packet(packet_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u16::try_from(payload.len()).map_err(|_| AppError::PayloadTooLarge(payload.len()))?;

    let mut packet = Vec::with_capacity(OUTER_HEADER_SIZE + payload.len());
    packet.push(packet_type);
    packet.extend_from_slice(&length.to_le_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Decode the 3-byte header into `(type, payload length)`.
pub fn parse_header(header: &[u8; OUTER_HEADER_SIZE]) -> (u8, usize) {
    (header[0], u16::from_le_bytes([header[1], header[2]]) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::types::{PKT_QUERY_STATUS, PKT_WRITE_DATA};

    #[test]
    fn test_build_packet_structure() {
        let packet = build_packet(PKT_WRITE_DATA, &[0x11, 0x22, 0x33]).unwrap();
        assert_eq!(packet, vec![0x01, 0x03, 0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_build_empty_payload() {
        let packet = build_packet(PKT_QUERY_STATUS, &[]).unwrap();
        assert_eq!(packet, vec![0x03, 0x00, 0x00]);
    }

    #[test]
    fn test_length_is_little_endian() {
        let payload = vec![0u8; 0x1234];
        let packet = build_packet(PKT_WRITE_DATA, &payload).unwrap();
        assert_eq!(&packet[1..3], &[0x34, 0x12]);
        assert_eq!(packet.len(), 3 + 0x1234);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; 70_000];
        assert!(matches!(
            build_packet(PKT_WRITE_DATA, &payload),
            Err(AppError::PayloadTooLarge(70_000))
        ));
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header(&[0x81, 0x10, 0x27]), (0x81, 10000));
        assert_eq!(parse_header(&[0x82, 0x00, 0x00]), (0x82, 0));
    }
}
