//! Response decoders for bridge and device replies.
//!
//! All decoders are total: short or garbled input degrades to default values.

use serde::Serialize;

/// BLE link status reported by the bridge (`PKT_STATUS_RESP`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub name: String,
    pub mac: String,
    /// Whether the connected peripheral is the bridge's configured target.
    pub is_target: bool,
}

/// Device information block (`PKT_INFO_RESP`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub battery_level: u8,
    pub signal_strength: u8,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub work_mode: u8,
    pub light_mode: u8,
    /// 0 = automatic mode.
    pub switch_state: u8,
    pub reserved: u8,
}

/// Animation state for one display mode (`READ_PIC_STATE`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PicState {
    pub mode: u8,
    pub start_index: u16,
    pub pic_length: u16,
    pub frame_interval: u16,
    pub all_mode_max_pic: u16,
}

const PIC_STATE_SIZE: usize = 9;

/// Cursor over a length-prefixed layout that yields nothing past the end.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    /// Up to `len` bytes; truncated when the buffer runs out.
    fn take(&mut self, len: usize) -> &'a [u8] {
        let end = (self.pos + len).min(self.data.len());
        let slice = &self.data[self.pos..end];
        self.pos = end;
        slice
    }

    fn string(&mut self) -> String {
        let len = self.byte().unwrap_or(0) as usize;
        String::from_utf8_lossy(self.take(len)).into_owned()
    }
}

/// Parse the bridge's BLE status response.
///
/// Layout: `connected | name_len | name | mac_len | mac | [is_target]`.
pub fn parse_status_response(data: &[u8]) -> DeviceStatus {
    if data.is_empty() {
        return DeviceStatus::default();
    }

    let mut reader = Reader::new(data);
    let connected = reader.byte().unwrap_or(0) != 0;
    let name = reader.string();
    let mac = reader.string();
    let is_target = reader.byte().unwrap_or(0) != 0;

    DeviceStatus {
        connected,
        name,
        mac,
        is_target,
    }
}

/// Parse the device info response; missing trailing fields read as 0.
pub fn parse_info_response(data: &[u8]) -> DeviceInfo {
    let field = |i: usize| data.get(i).copied().unwrap_or(0);
    DeviceInfo {
        battery_level: field(0),
        signal_strength: field(1),
        fw_major: field(2),
        fw_minor: field(3),
        work_mode: field(4),
        light_mode: field(5),
        switch_state: field(6),
        reserved: field(7),
    }
}

/// Parse a pic state record (status byte already stripped).
///
/// Layout: `mode:u8 | start:u16 | length:u16 | interval:u16 | max:u16`, all LE.
pub fn parse_pic_state_response(data: &[u8]) -> PicState {
    if data.len() < PIC_STATE_SIZE {
        return PicState::default();
    }
    let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);
    PicState {
        mode: data[0],
        start_index: u16_at(1),
        pic_length: u16_at(3),
        frame_interval: u16_at(5),
        all_mode_max_pic: u16_at(7),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_full() {
        let data = [1, 3, b'A', b'B', b'C', 2, b'X', b'Y', 1];
        let status = parse_status_response(&data);
        assert_eq!(
            status,
            DeviceStatus {
                connected: true,
                name: "ABC".to_string(),
                mac: "XY".to_string(),
                is_target: true,
            }
        );
    }

    #[test]
    fn test_status_without_target_byte() {
        let data = [1, 3, b'A', b'B', b'C', 2, b'X', b'Y'];
        let status = parse_status_response(&data);
        assert!(status.connected);
        assert_eq!(status.mac, "XY");
        assert!(!status.is_target);
    }

    #[test]
    fn test_status_empty() {
        assert_eq!(parse_status_response(&[]), DeviceStatus::default());
    }

    #[test]
    fn test_status_invalid_utf8() {
        let data = [0, 2, 0xFF, 0xFE, 0, 0];
        let status = parse_status_response(&data);
        assert!(!status.connected);
        assert_eq!(status.name, "\u{FFFD}\u{FFFD}");
        assert_eq!(status.mac, "");
    }

    #[test]
    fn test_status_truncated_name() {
        // name_len claims 10 bytes but only 2 follow
        let data = [1, 10, b'h', b'i'];
        let status = parse_status_response(&data);
        assert_eq!(status.name, "hi");
        assert_eq!(status.mac, "");
        assert!(!status.is_target);
    }

    #[test]
    fn test_info_short_buffer() {
        let info = parse_info_response(&[80, 200, 1, 2]);
        assert_eq!(info.battery_level, 80);
        assert_eq!(info.signal_strength, 200);
        assert_eq!(info.fw_major, 1);
        assert_eq!(info.fw_minor, 2);
        assert_eq!(info.work_mode, 0);
        assert_eq!(info.light_mode, 0);
        assert_eq!(info.switch_state, 0);
        assert_eq!(info.reserved, 0);
    }

    #[test]
    fn test_info_extra_bytes_ignored() {
        let info = parse_info_response(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(info.switch_state, 7);
        assert_eq!(info.reserved, 8);
    }

    #[test]
    fn test_pic_state() {
        let data = [2, 0x10, 0x00, 0x05, 0x00, 0x64, 0x00, 0x2C, 0x01];
        let state = parse_pic_state_response(&data);
        assert_eq!(
            state,
            PicState {
                mode: 2,
                start_index: 16,
                pic_length: 5,
                frame_interval: 100,
                all_mode_max_pic: 300,
            }
        );
    }

    #[test]
    fn test_pic_state_undersized() {
        assert_eq!(parse_pic_state_response(&[1, 2, 3]), PicState::default());
    }
}
