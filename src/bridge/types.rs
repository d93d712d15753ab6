//! Bridge protocol types and constants.

// Outer packet types, app -> bridge
pub const PKT_WRITE_DATA: u8 = 0x01;
pub const PKT_WRITE_CMD: u8 = 0x02;
pub const PKT_QUERY_STATUS: u8 = 0x03;
pub const PKT_QUERY_INFO: u8 = 0x04;

// Outer packet types, bridge -> app
pub const PKT_BLE_NOTIFY: u8 = 0x81;
pub const PKT_STATUS_RESP: u8 = 0x82;
pub const PKT_INFO_RESP: u8 = 0x83;

// Protocol constants
pub(crate) const OUTER_HEADER_SIZE: usize = 3; // type(1) + length(2)
pub(crate) const FRAME_HEAD: [u8; 2] = [0xAA, 0xBB];
pub(crate) const FRAME_TAIL: [u8; 2] = [0xCC, 0xDD];
pub(crate) const FRAME_MIN_SIZE: usize = 6;

/// Largest slice sent per PREPARE_WRITE / data packet pair.
pub const MAX_CHUNK: usize = 4096;
/// Large writes must start on a flash sector boundary.
pub const WRITE_ALIGNMENT: u32 = 4096;

/// Human-readable name of an outer packet type, for logs.
pub fn packet_name(packet_type: u8) -> &'static str {
    match packet_type {
        PKT_WRITE_DATA => "WriteData",
        PKT_WRITE_CMD => "WriteCmd",
        PKT_QUERY_STATUS => "QueryStatus",
        PKT_QUERY_INFO => "QueryInfo",
        PKT_BLE_NOTIFY => "BleNotify",
        PKT_STATUS_RESP => "StatusResp",
        PKT_INFO_RESP => "InfoResp",
        _ => "Unknown",
    }
}

/// Device command codes carried in the frame's command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceCmd {
    ChangeName = 0x01,
    ChangeAppearance = 0x02,
    SaveConfig = 0x04,
    UpdateCustomKey = 0x73,
    PrepareWrite = 0x80,
    WriteResult = 0x81,
    UpdatePic = 0x82,
    ReadPicState = 0x83,
    UpdateState = 0x90,
}

impl From<DeviceCmd> for u8 {
    fn from(cmd: DeviceCmd) -> Self {
        cmd as u8
    }
}

/// Sub-type byte leading an UPDATE_CUSTOM_KEY payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeySubType {
    /// Raw HID keycode list, at most 98 bytes.
    Shortcut = 0x73,
    /// Interleaved action/param pairs, at most 98 bytes.
    Macro = 0x74,
    /// ASCII label, at most 20 bytes.
    Description = 0x75,
}

/// Standard BLE appearance values accepted by `CHANGE_APPEARANCE`.
pub const APPEARANCES: &[(&str, u16)] = &[
    ("unknown", 0x0000),
    ("phone", 0x0040),
    ("computer", 0x0080),
    ("watch", 0x00C0),
    ("sports-watch", 0x00C1),
    ("clock", 0x0100),
    ("display", 0x0140),
    ("remote-control", 0x0180),
    ("eye-glasses", 0x01C0),
    ("tag", 0x0200),
    ("keyring", 0x0240),
    ("media-player", 0x0280),
    ("barcode-scanner", 0x02C0),
    ("thermometer", 0x0300),
    ("ear-thermometer", 0x0301),
    ("heart-rate-sensor", 0x0340),
    ("heart-rate-belt", 0x0341),
    ("blood-pressure", 0x0380),
    ("blood-pressure-arm", 0x0381),
    ("blood-pressure-wrist", 0x0382),
    ("hid", 0x03C0),
    ("keyboard", 0x03C1),
    ("mouse", 0x03C2),
    ("joystick", 0x03C3),
    ("gamepad", 0x03C4),
    ("digitizer-tablet", 0x03C5),
    ("card-reader", 0x03C6),
    ("digital-pen", 0x03C7),
    ("hid-barcode-scanner", 0x03C8),
];

/// Appearance shown by a stock macropad.
pub const APPEARANCE_KEYBOARD: u16 = 0x03C1;

/// Look up an appearance by name (case-insensitive).
pub fn appearance_by_name(name: &str) -> Option<u16> {
    let name = name.trim();
    APPEARANCES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|&(_, value)| value)
}

/// Host application state pushed to the device display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostState {
    Notification = 0,
    PermissionRequest = 1,
    PostToolUse = 2,
    PreToolUse = 3,
    SessionStart = 4,
    Stop = 5,
    TaskCompleted = 6,
    UserPromptSubmit = 7,
    SessionEnd = 8,
}

impl HostState {
    pub const ALL: [HostState; 9] = [
        Self::Notification,
        Self::PermissionRequest,
        Self::PostToolUse,
        Self::PreToolUse,
        Self::SessionStart,
        Self::Stop,
        Self::TaskCompleted,
        Self::UserPromptSubmit,
        Self::SessionEnd,
    ];

    /// Name used on the command line and in hook configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::PermissionRequest => "permission-request",
            Self::PostToolUse => "post-tool-use",
            Self::PreToolUse => "pre-tool-use",
            Self::SessionStart => "session-start",
            Self::Stop => "stop",
            Self::TaskCompleted => "task-completed",
            Self::UserPromptSubmit => "user-prompt-submit",
            Self::SessionEnd => "session-end",
        }
    }
}

impl std::str::FromStr for HostState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|state| state.name() == wanted)
            .ok_or_else(|| format!("unknown state '{s}'"))
    }
}

/// Packet handed from the transport's reader task to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterPacket {
    pub packet_type: u8,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_state_parse() {
        assert_eq!("stop".parse::<HostState>(), Ok(HostState::Stop));
        assert_eq!("Session_Start".parse::<HostState>(), Ok(HostState::SessionStart));
        assert!("bogus".parse::<HostState>().is_err());
    }

    #[test]
    fn test_appearance_lookup() {
        assert_eq!(appearance_by_name("keyboard"), Some(APPEARANCE_KEYBOARD));
        assert_eq!(appearance_by_name("Mouse"), Some(0x03C2));
        assert_eq!(appearance_by_name("toaster"), None);
    }

    #[test]
    fn test_host_state_codes_are_sequential() {
        for (i, state) in HostState::ALL.iter().enumerate() {
            assert_eq!(*state as u8 as usize, i);
        }
    }
}
