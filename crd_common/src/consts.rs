//! Card-wide constants.
//!
//! Single source of truth for the numeric limits of the motion card
//! firmware. Imported by all crates.

use static_assertions::const_assert;

/// Maximum number of axes in one coordinate system (and per-axis tables).
pub const AXIS_MAX: usize = 8;

/// Number of coordinate systems per card.
pub const CRDSYS_MAX: usize = 2;

/// Number of look-ahead FIFOs per coordinate system (double buffering).
pub const FIFO_PER_CRD: usize = 2;

/// Deepest look-ahead window the card driver supports (firmware `FROCAST_LEN`).
pub const LOOKAHEAD_CAPACITY: usize = 200;

/// Depth of the card-side interpolation FIFO, in records.
pub const CARD_FIFO_DEPTH: usize = 4096;

/// Fixed frame header size on the wire [bytes].
pub const FRAME_HEADER_LEN: usize = 16;

/// Maximum frame payload [bytes].
pub const FRAME_PAYLOAD_MAX: usize = 1100;

/// Maximum encoded frame size [bytes].
pub const FRAME_LEN_MAX: usize = FRAME_HEADER_LEN + FRAME_PAYLOAD_MAX;

/// Coordinate limit for rapid/line/arc records [pulse] (signed 24-bit).
pub const INTERP_POS_LIMIT: i64 = 8_388_608;

/// Coordinate limit for buffered single-axis moves [pulse] (28-bit).
pub const BUFFER_POS_LIMIT: i64 = 268_435_455;

/// Number of encoder channels reported in a status snapshot (axes + handwheel).
pub const ENCODER_COUNT: usize = AXIS_MAX + 1;

/// Coordinates reported per coordinate system in a status snapshot.
pub const CRD_POS_COUNT: usize = 5;

/// Default request-level retry count for Timeout / Nak responses.
pub const DEFAULT_RETRY_LIMIT: u8 = 3;

const_assert!(AXIS_MAX <= 8);
const_assert!(LOOKAHEAD_CAPACITY <= CARD_FIFO_DEPTH);
const_assert!(FRAME_PAYLOAD_MAX <= u16::MAX as usize);
