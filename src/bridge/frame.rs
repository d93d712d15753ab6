//! Device frame codec.
//!
//! Frame structure: `AA BB | cmd | payload | CC DD`. There is no length field;
//! the frame always fills the whole outer packet payload.

use super::types::{FRAME_HEAD, FRAME_MIN_SIZE, FRAME_TAIL};

/// Build a device frame.
pub fn build_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_MIN_SIZE - 1 + payload.len());
    frame.extend_from_slice(&FRAME_HEAD);
    frame.push(cmd);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&FRAME_TAIL);
    frame
}

/// Parse a device frame into `(cmd, data)`.
///
/// Anything shorter than 6 bytes or with the wrong head/tail is not a frame.
pub fn parse_frame(raw: &[u8]) -> Option<(u8, &[u8])> {
    if raw.len() < FRAME_MIN_SIZE {
        return None;
    }
    if raw[..2] != FRAME_HEAD || raw[raw.len() - 2..] != FRAME_TAIL {
        return None;
    }
    Some((raw[2], &raw[3..raw.len() - 2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_frame_layout() {
        let frame = build_frame(0x04, &[]);
        assert_eq!(frame, vec![0xAA, 0xBB, 0x04, 0xCC, 0xDD]);

        let frame = build_frame(0x83, &[0x01]);
        assert_eq!(frame, vec![0xAA, 0xBB, 0x83, 0x01, 0xCC, 0xDD]);
    }

    #[test]
    fn test_round_trip_all_commands() {
        for cmd in 0..=255u8 {
            for len in [1usize, 2, 17, 250] {
                let payload: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(cmd)).collect();
                let frame = build_frame(cmd, &payload);
                let (parsed_cmd, data) = parse_frame(&frame).unwrap();
                assert_eq!(parsed_cmd, cmd);
                assert_eq!(data, payload.as_slice());
            }
        }
    }

    #[test]
    fn test_empty_payload_frame_is_too_short() {
        // A bare frame is 5 bytes; the parser requires at least one payload byte.
        assert!(parse_frame(&build_frame(0x04, &[])).is_none());
    }

    #[test]
    fn test_malformed_frames() {
        assert!(parse_frame(&[]).is_none());
        assert!(parse_frame(&[0xAA, 0xBB, 0x01, 0xCC, 0xDD]).is_none());
        assert!(parse_frame(&[0xAA, 0xBC, 0x01, 0x00, 0xCC, 0xDD]).is_none());
        assert!(parse_frame(&[0xAB, 0xBB, 0x01, 0x00, 0xCC, 0xDD]).is_none());
        assert!(parse_frame(&[0xAA, 0xBB, 0x01, 0x00, 0xCC, 0xDE]).is_none());
        assert!(parse_frame(&[0xAA, 0xBB, 0x01, 0x00, 0xCD, 0xDD]).is_none());
    }

    #[test]
    fn test_tail_pattern_inside_payload() {
        let frame = build_frame(0x81, &[0xCC, 0xDD, 0x00]);
        assert_eq!(parse_frame(&frame), Some((0x81, &[0xCC, 0xDD, 0x00][..])));
    }
}
