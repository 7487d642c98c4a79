//! Wire format shared with the motion card.
//!
//! - [`frame`] - 16-byte frame header, message types, result codes
//! - [`codec`] - little-endian writer/reader over fixed-capacity buffers
//! - [`checksum`] - CRC-32 used as the frame checksum
//!
//! All multi-byte fields are little-endian, matching the card firmware.

pub mod codec;
pub mod checksum;
pub mod frame;

use thiserror::Error;

pub use codec::{WireReader, WireWriter};
pub use frame::{Frame, FrameHeader, MsgType, ResultCode};

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Writer ran out of space.
    #[error("buffer overflow (capacity {capacity} bytes)")]
    Overflow { capacity: usize },

    /// Reader ran out of input.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Declared payload length disagrees with the received byte count.
    #[error("length mismatch: header declares {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Payload larger than the frame allows.
    #[error("payload of {0} bytes exceeds frame limit")]
    PayloadTooLarge(usize),

    /// Checksum over header and payload does not match.
    #[error("checksum mismatch: header {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Unknown segment command code.
    #[error("unknown segment command {0}")]
    UnknownCommand(u8),

    /// Field value outside its encodable domain.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}
