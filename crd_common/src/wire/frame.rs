//! Card frame: 16-byte header followed by up to 1100 payload bytes.
//!
//! ```text
//! offset  size  field
//!      0     1  card id
//!      1     1  message type
//!      2     1  message subtype (FIFO index for crd data/clear)
//!      3     1  execution result (card → host)
//!      4     4  axis participation mask
//!      8     1  coordinate-system mask
//!      9     1  frame counter (incremented per new request)
//!     10     2  payload length
//!     12     4  CRC-32 over bytes 0..12 and the payload
//! ```

use heapless::Vec;
use static_assertions::const_assert_eq;

use super::checksum;
use super::{WireError, WireReader, WireWriter};
use crate::consts::{FRAME_HEADER_LEN, FRAME_LEN_MAX, FRAME_PAYLOAD_MAX};

/// Header bytes covered by the checksum (everything before the CRC field).
const CHECKED_HEADER_LEN: usize = 12;

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Coordinate-system parameters.
    CrdPrm = 0x20,
    /// Batch of planned segment records for one FIFO.
    CrdData = 0x21,
    /// Discard the card-side FIFO.
    CrdClear = 0x22,
    /// Start interpolation on the masked coordinate systems.
    CrdStart = 0x23,
    /// Full system status snapshot.
    SysStatus = 0x40,
}

impl MsgType {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x20 => Some(Self::CrdPrm),
            0x21 => Some(Self::CrdData),
            0x22 => Some(Self::CrdClear),
            0x23 => Some(Self::CrdStart),
            0x40 => Some(Self::SysStatus),
            _ => None,
        }
    }
}

/// Execution result reported by the card firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    /// Command could not be executed in the current card state.
    ExecFail = 1,
    /// Card license does not cover the command.
    LicenseWrong = 2,
    /// Parameter rejected by the firmware.
    DataWrong = 7,
}

impl ResultCode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::ExecFail),
            2 => Some(Self::LicenseWrong),
            7 => Some(Self::DataWrong),
            _ => None,
        }
    }
}

/// Frame header in host representation.
///
/// The `repr(C)` layout happens to match the wire layout byte for byte, but
/// encoding always goes through explicit little-endian writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    pub card_id: u8,
    pub msg_type: u8,
    pub subtype: u8,
    pub result: u8,
    pub axis_mask: u32,
    pub crd_mask: u8,
    pub frame_count: u8,
    pub payload_len: u16,
    pub checksum: u32,
}

const_assert_eq!(core::mem::size_of::<FrameHeader>(), FRAME_HEADER_LEN);

impl FrameHeader {
    #[inline]
    pub const fn kind(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msg_type)
    }

    #[inline]
    pub const fn result_code(&self) -> Option<ResultCode> {
        ResultCode::from_u8(self.result)
    }

    fn to_bytes(self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0] = self.card_id;
        out[1] = self.msg_type;
        out[2] = self.subtype;
        out[3] = self.result;
        out[4..8].copy_from_slice(&self.axis_mask.to_le_bytes());
        out[8] = self.crd_mask;
        out[9] = self.frame_count;
        out[10..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            card_id: r.get_u8()?,
            msg_type: r.get_u8()?,
            subtype: r.get_u8()?,
            result: r.get_u8()?,
            axis_mask: r.get_u32()?,
            crd_mask: r.get_u8()?,
            frame_count: r.get_u8()?,
            payload_len: r.get_u16()?,
            checksum: r.get_u32()?,
        })
    }
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8, FRAME_PAYLOAD_MAX>,
}

impl Frame {
    /// Request frame with an empty payload.
    pub fn new(card_id: u8, msg: MsgType, subtype: u8) -> Self {
        Self {
            header: FrameHeader {
                card_id,
                msg_type: msg as u8,
                subtype,
                ..FrameHeader::default()
            },
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Result<Self, WireError> {
        self.payload = Vec::from_slice(payload).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
        Ok(self)
    }

    /// Response skeleton echoing this frame's routing fields.
    pub fn reply(&self, result: ResultCode) -> Self {
        Self {
            header: FrameHeader {
                result: result as u8,
                payload_len: 0,
                checksum: 0,
                ..self.header
            },
            payload: Vec::new(),
        }
    }

    /// CRC over the checked header bytes and the payload.
    pub fn compute_checksum(&self) -> u32 {
        let header = self.header.to_bytes();
        let mut crc = checksum::digest();
        crc.update(&header[..CHECKED_HEADER_LEN]);
        crc.update(&self.payload);
        crc.finalize()
    }

    /// Fill in payload length and checksum.
    pub fn seal(&mut self) {
        self.header.payload_len = self.payload.len() as u16;
        self.header.checksum = self.compute_checksum();
    }

    /// Serialize header + payload. The frame should be sealed first.
    pub fn encode(&self) -> Result<Vec<u8, FRAME_LEN_MAX>, WireError> {
        let mut w = WireWriter::<FRAME_LEN_MAX>::new();
        w.put_bytes(&self.header.to_bytes())?;
        w.put_bytes(&self.payload)?;
        Ok(w.into_inner())
    }

    /// Parse and verify a received frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(bytes);
        let header = FrameHeader::read(&mut r)?;

        let declared = header.payload_len as usize;
        if declared > FRAME_PAYLOAD_MAX {
            return Err(WireError::PayloadTooLarge(declared));
        }
        if r.remaining() != declared {
            return Err(WireError::LengthMismatch {
                declared,
                actual: r.remaining(),
            });
        }

        let frame = Self {
            header,
            payload: Vec::from_slice(r.take(declared)?)
                .map_err(|_| WireError::PayloadTooLarge(declared))?,
        };

        let actual = frame.compute_checksum();
        if actual != header.checksum {
            return Err(WireError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(frame)
    }
}
