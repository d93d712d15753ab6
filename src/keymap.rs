//! Custom key bindings and their UPDATE_CUSTOM_KEY payload encoding.
//!
//! Payload formats by sub-type:
//! - shortcut: HID keycode list, at most 98 bytes
//! - macro: `action, param` pairs, at most 98 bytes
//! - description: ASCII label, at most 20 bytes

use crate::bridge::KeySubType;
use crate::error::{AppError, Result};

pub const NUM_KEYS: u8 = 4;
pub const NUM_MODES: u8 = 3;
pub const MAX_KEY_DATA_LEN: usize = 98;
pub const MAX_DESCRIPTION_LEN: usize = 20;

/// Device time unit for macro delays.
const DELAY_UNIT_MS: u32 = 3;

/// Action byte of a macro step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MacroAction {
    NoOp = 0,
    /// Press the HID keycode in `param`.
    Down = 1,
    /// Release the HID keycode in `param`.
    Up = 2,
    /// Wait `param` × 3 ms.
    Delay = 3,
    /// Release everything held.
    UpAll = 4,
}

impl TryFrom<u8> for MacroAction {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::NoOp),
            1 => Ok(Self::Down),
            2 => Ok(Self::Up),
            3 => Ok(Self::Delay),
            4 => Ok(Self::UpAll),
            other => Err(AppError::invalid_key_data(format!("unknown macro action {other}"))),
        }
    }
}

/// One step of a macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroStep {
    pub action: MacroAction,
    pub param: u8,
}

impl MacroStep {
    pub fn down(keycode: u8) -> Self {
        Self {
            action: MacroAction::Down,
            param: keycode,
        }
    }

    pub fn up(keycode: u8) -> Self {
        Self {
            action: MacroAction::Up,
            param: keycode,
        }
    }

    /// Delay rounded down to the device's 3 ms unit, capped at 765 ms.
    pub fn delay_ms(ms: u32) -> Self {
        Self {
            action: MacroAction::Delay,
            param: (ms / DELAY_UNIT_MS).min(u8::MAX as u32) as u8,
        }
    }

    pub fn up_all() -> Self {
        Self {
            action: MacroAction::UpAll,
            param: 0,
        }
    }
}

impl std::str::FromStr for MacroStep {
    type Err = AppError;

    /// Parse `action:param`, both decimal or `0x` hex.
    fn from_str(s: &str) -> Result<Self> {
        let (action, param) = s
            .split_once(':')
            .ok_or_else(|| AppError::invalid_key_data(format!("macro step '{s}' is not action:param")))?;
        Ok(Self {
            action: MacroAction::try_from(parse_byte(action)?)?,
            param: parse_byte(param)?,
        })
    }
}

/// Parse a byte written as decimal or `0x`-prefixed hex.
pub fn parse_byte(s: &str) -> Result<u8> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| AppError::invalid_key_data(format!("'{s}' is not a byte value")))
}

/// What a key does when pressed, or the label shown for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBinding {
    /// Keycodes pressed together (modifiers first).
    Shortcut(Vec<u8>),
    Macro(Vec<MacroStep>),
    Description(String),
}

impl KeyBinding {
    pub fn sub_type(&self) -> KeySubType {
        match self {
            Self::Shortcut(_) => KeySubType::Shortcut,
            Self::Macro(_) => KeySubType::Macro,
            Self::Description(_) => KeySubType::Description,
        }
    }

    /// Encode to the on-wire data following `sub_type | mode | key_index`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let data = match self {
            Self::Shortcut(keycodes) => keycodes.clone(),
            Self::Macro(steps) => steps.iter().flat_map(|s| [s.action as u8, s.param]).collect(),
            Self::Description(text) => text.as_bytes().to_vec(),
        };
        validate_key_data(self.sub_type(), &data)?;
        Ok(data)
    }

    /// Short human-readable label.
    pub fn label(&self) -> String {
        match self {
            Self::Description(text) => text.clone(),
            Self::Shortcut(keycodes) if keycodes.is_empty() => "None".to_string(),
            Self::Shortcut(keycodes) => keycodes
                .iter()
                .map(|k| format!("0x{k:02X}"))
                .collect::<Vec<_>>()
                .join("+"),
            Self::Macro(steps) if steps.is_empty() => "Macro (empty)".to_string(),
            Self::Macro(steps) => format!("Macro ({} steps)", steps.len()),
        }
    }
}

/// Check a raw payload against the limits of its sub-type.
pub fn validate_key_data(sub_type: KeySubType, data: &[u8]) -> Result<()> {
    match sub_type {
        KeySubType::Shortcut | KeySubType::Macro if data.len() > MAX_KEY_DATA_LEN => Err(AppError::invalid_key_data(
            format!("{sub_type:?} data is {} bytes, max {MAX_KEY_DATA_LEN}", data.len()),
        )),
        KeySubType::Macro if data.len() % 2 != 0 => Err(AppError::invalid_key_data(
            "macro data must be action/param pairs",
        )),
        KeySubType::Description if data.len() > MAX_DESCRIPTION_LEN => Err(AppError::invalid_key_data(format!(
            "description is {} bytes, max {MAX_DESCRIPTION_LEN}",
            data.len()
        ))),
        KeySubType::Description if !data.is_ascii() => {
            Err(AppError::invalid_key_data("description must be ASCII"))
        }
        _ => Ok(()),
    }
}

/// Range-check a mode / key slot.
pub fn validate_slot(mode: u8, key_index: u8) -> Result<()> {
    if mode >= NUM_MODES {
        return Err(AppError::validation(format!("mode {mode} out of range 0..{NUM_MODES}")));
    }
    if key_index >= NUM_KEYS {
        return Err(AppError::validation(format!(
            "key index {key_index} out of range 0..{NUM_KEYS}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_shortcut() {
        // Ctrl + C
        let binding = KeyBinding::Shortcut(vec![0xE0, 0x06]);
        assert_eq!(binding.encode().unwrap(), vec![0xE0, 0x06]);
        assert_eq!(binding.sub_type(), KeySubType::Shortcut);
        assert_eq!(binding.label(), "0xE0+0x06");
    }

    #[test]
    fn test_encode_macro() {
        let binding = KeyBinding::Macro(vec![
            MacroStep::down(0x04),
            MacroStep::delay_ms(30),
            MacroStep::up(0x04),
            MacroStep::up_all(),
        ]);
        assert_eq!(binding.encode().unwrap(), vec![1, 0x04, 3, 10, 2, 0x04, 4, 0]);
        assert_eq!(binding.label(), "Macro (4 steps)");
    }

    #[test]
    fn test_delay_is_capped() {
        assert_eq!(MacroStep::delay_ms(10_000).param, 255);
        assert_eq!(MacroStep::delay_ms(2).param, 0);
    }

    #[test]
    fn test_shortcut_too_long() {
        let binding = KeyBinding::Shortcut(vec![0x04; 99]);
        assert!(matches!(binding.encode(), Err(AppError::InvalidKeyData(_))));
        assert!(KeyBinding::Shortcut(vec![0x04; 98]).encode().is_ok());
    }

    #[test]
    fn test_macro_too_long() {
        let binding = KeyBinding::Macro(vec![MacroStep::down(4); 50]);
        assert!(binding.encode().is_err());
        let binding = KeyBinding::Macro(vec![MacroStep::down(4); 49]);
        assert!(binding.encode().is_ok());
    }

    #[test]
    fn test_odd_macro_data_rejected() {
        assert!(validate_key_data(KeySubType::Macro, &[1, 4, 2]).is_err());
    }

    #[test]
    fn test_description_limits() {
        assert!(KeyBinding::Description("Copy".into()).encode().is_ok());
        assert!(KeyBinding::Description("x".repeat(21)).encode().is_err());
        assert!(KeyBinding::Description("héllo".into()).encode().is_err());
    }

    #[test]
    fn test_validate_slot() {
        assert!(validate_slot(0, 0).is_ok());
        assert!(validate_slot(2, 3).is_ok());
        assert!(validate_slot(3, 0).is_err());
        assert!(validate_slot(0, 4).is_err());
    }

    #[test]
    fn test_parse_macro_step() {
        let step: MacroStep = "1:0x04".parse().unwrap();
        assert_eq!(step, MacroStep::down(0x04));
        assert!("9:1".parse::<MacroStep>().is_err());
        assert!("1".parse::<MacroStep>().is_err());
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0xE0").unwrap(), 0xE0);
        assert_eq!(parse_byte("42").unwrap(), 42);
        assert!(parse_byte("256").is_err());
    }
}
