//! Common re-exports.
//!
//! ```rust
//! use crd_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    CardConfig, ConfigError, ConfigLoader, CrdConfig, LogLevel, ReplayConfig, SharedConfig,
};

// ─── Card Constants ─────────────────────────────────────────────────
pub use crate::consts::{AXIS_MAX, CRDSYS_MAX, FIFO_PER_CRD, LOOKAHEAD_CAPACITY};

// ─── Coordinate System ──────────────────────────────────────────────
pub use crate::crd::{
    AllSysStatus, AxisLimits, AxisStatus, CrdPrm, CrdStatus, LookAheadPrm, OriginPolicy, Segment,
    SegmentError,
};

// ─── Wire ───────────────────────────────────────────────────────────
pub use crate::wire::{Frame, MsgType, ResultCode, WireError};
