//! Error types and handling.

use std::time::Duration;
use thiserror::Error;

/// Which half of a chunk transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStage {
    /// The PREPARE_WRITE command for the chunk.
    Prepare,
    /// The raw data packet and its WRITE_RESULT acknowledgment.
    Write,
}

impl std::fmt::Display for ChunkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepare => f.write_str("prepare"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Socket connect/send/recv failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted without an open connection
    #[error("Bridge not connected")]
    NotConnected,

    /// `open` called on a transport that is already open
    #[error("Bridge already connected")]
    AlreadyConnected,

    /// Connection dropped while a call was waiting for its reply
    #[error("Connection closed while waiting for a reply")]
    ConnectionClosed,

    /// No matching reply within the bound
    #[error("Timed out after {waited:?} waiting for response 0x{cmd:02X}")]
    Timeout { cmd: u8, waited: Duration },

    /// Reply carried a different command byte than the one awaited
    #[error("Unexpected response: 0x{actual:02X}, expected 0x{expected:02X}")]
    UnexpectedResponse { expected: u8, actual: u8 },

    /// Device reported a non-zero status byte (`None` when the reply was empty)
    #[error("Device error, cmd=0x{cmd:02X}, code={code:?}")]
    Device { cmd: u8, code: Option<u8> },

    /// Large write address not aligned to the flash sector size
    #[error("Address 0x{address:X} is not 4K aligned")]
    Misaligned { address: u32 },

    /// Chunked transfer aborted
    #[error("Chunk {stage} failed at offset {offset}: {source}")]
    ChunkFailed {
        stage: ChunkStage,
        offset: usize,
        #[source]
        source: Box<AppError>,
    },

    /// Outer packet payload does not fit the 16-bit length field
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Key binding payload breaks its limits
    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),

    /// Argument rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a validation error with message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a key data error with message
    pub fn invalid_key_data(msg: impl Into<String>) -> Self {
        Self::InvalidKeyData(msg.into())
    }
}
