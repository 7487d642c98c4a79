//! Coordinate-system domain types.
//!
//! - [`segment`] - segment records and their wire encoding
//! - [`prm`] - coordinate-system context and look-ahead configuration
//! - [`status`] - status bitflags and the full system snapshot

pub mod prm;
pub mod segment;
pub mod status;

pub use prm::{AxisLimits, CrdPrm, LookAheadPrm, OriginPolicy};
pub use segment::{
    ArcDirection, ArcMove, ArcPlane, AxisMask, CmdCode, HelixMove, Record, Segment, SegmentError,
};
pub use status::{AllSysStatus, AxisStatus, CrdStatus};
