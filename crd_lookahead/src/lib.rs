//! CRD Look-Ahead Library
//!
//! Host-side look-ahead planner for a multi-axis motion card. A motion
//! program arrives as a stream of segments (rapid, line, arc, dwell, I/O,
//! buffered axis moves). Each (coordinate system, FIFO) keeps a bounded
//! window of segments, plans the highest feasible junction speed between
//! them and ships planned records to the card in checksummed frames.
//!
//! # Module Structure
//!
//! - [`ring`] - Bounded look-ahead window, derived geometry, runtime state
//! - [`planner`] - Junction speed planning (backward/forward passes)
//! - [`dispatch`] - Drain loop batching planned records into frames
//! - [`transport`] - Request/acknowledge protocol with retries
//! - [`controller`] - Public surface: enqueue, flush, clear, context
//! - [`sim`] - In-process simulated card
//! - [`error`] - Error types
//!
//! # Usage
//!
//! ```rust,ignore
//! use crd_lookahead::{Controller, ControllerConfig, SimulatedCard};
//!
//! let ctl = Controller::new(SimulatedCard::new(0), ControllerConfig::default());
//! ctl.set_coordinate_system_context(0, crd_prm)?;
//! ctl.set_look_ahead_config(0, 0, la_prm)?;
//! ctl.enqueue_segment(0, 0, &segment)?;
//! ctl.flush_to_end_of_program(0, 0)?;
//! ```

pub mod controller;
pub mod dispatch;
pub mod error;
pub mod planner;
pub mod ring;
pub mod sim;
pub mod transport;

pub use controller::{Admission, Controller, ControllerConfig};
pub use dispatch::{DrainReason, DrainReport, SentSegment};
pub use error::{LinkError, LookAheadError};
pub use planner::{CancelToken, CornerModel, JunctionPlanner, PlanMode};
pub use ring::{LookAheadRing, ResidentSegment};
pub use sim::{Fault, SimulatedCard};
pub use transport::{CardLink, FrameTransport};
