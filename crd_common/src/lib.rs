//! CRD Common Library
//!
//! Shared types for the coordinate-system ("crd") look-ahead planner and
//! everything that talks to the motion card on its behalf.
//!
//! # Module Structure
//!
//! - [`consts`] - Card limits (axis count, look-ahead depth, frame sizes)
//! - [`crd`] - Segment records, coordinate-system / look-ahead parameters, status
//! - [`wire`] - Frame header, checksum and little-endian byte codec
//! - [`config`] - TOML configuration loading
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! crd = { package = "crd_common", path = "../crd_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use crd_common::crd::segment::Segment;
//! use crd_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod crd;
pub mod prelude;
pub mod wire;
