//! Error types for the look-ahead core.

use crd::crd::SegmentError;
use crd::wire::{ResultCode, WireError};
use thiserror::Error;

/// Failure reported by a physical card link for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No response within the link's timeout.
    #[error("response timeout")]
    Timeout,

    /// Card refused the frame at the link level.
    #[error("frame not acknowledged")]
    Nak,

    /// Link-level integrity check failed.
    #[error("link checksum mismatch")]
    ChecksumMismatch,

    /// Link is gone (socket closed, device removed).
    #[error("link I/O failure: {0}")]
    Io(String),
}

/// Errors surfaced by the look-ahead controller.
#[derive(Debug, Clone, Error)]
pub enum LookAheadError {
    /// Segment rejected before enqueue; nothing was buffered.
    #[error("segment rejected: {0}")]
    Validation(#[from] SegmentError),

    /// Look-ahead window is full; retry after a drain.
    #[error("look-ahead buffer full")]
    BufferFull,

    #[error("transport timeout")]
    TransportTimeout,

    #[error("transport NAK")]
    TransportNak,

    /// Physical link I/O failure. Never retried.
    #[error("transport I/O: {0}")]
    TransportIo(String),

    /// Response failed its integrity check. Retried like a NAK.
    #[error("response checksum mismatch")]
    ChecksumMismatch,

    /// Retries exhausted or the link itself failed. Requires reopening the
    /// transport and clearing the buffer.
    #[error("link failure after {attempts} attempt(s): {last}")]
    LinkFailure {
        attempts: u32,
        #[source]
        last: Box<LookAheadError>,
    },

    /// Planner produced an impossible speed. Requires clearing the buffer.
    #[error("planner invariant violated at sequence {seq}: {detail}")]
    PlannerInvariant { seq: u64, detail: String },

    /// The speed left over from the last transmitted segment cannot be
    /// shed within the next one. Nothing was buffered; clear the buffer or
    /// send a longer segment.
    #[error("carried speed {speed} exceeds {limit} reachable within the next segment")]
    CarriedSpeed { speed: f64, limit: f64 },

    /// Coordinate-system context or look-ahead configuration missing.
    #[error("crd {crd} fifo {fifo} not configured")]
    NotConfigured { crd: usize, fifo: usize },

    #[error("invalid channel crd {crd} fifo {fifo}")]
    InvalidChannel { crd: usize, fifo: usize },

    /// Context change attempted while segments are buffered.
    #[error("crd {crd} has buffered segments")]
    ContextBusy { crd: usize },

    /// Card answered with a non-zero execution result.
    #[error("card rejected request: {code:?}")]
    CardRejected { code: Option<ResultCode>, raw: u8 },

    /// Recomputation interrupted by `clear_buffer`.
    #[error("planning aborted by buffer clear")]
    Aborted,

    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    /// Invalid configuration handed to the controller.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LookAheadError {
    /// Errors that need explicit recovery by the caller.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::LinkFailure { .. } | Self::PlannerInvariant { .. })
    }

    /// Per-attempt failures the transport resends on.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportTimeout | Self::TransportNak | Self::ChecksumMismatch
        )
    }
}

impl From<LinkError> for LookAheadError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::Timeout => Self::TransportTimeout,
            LinkError::Nak => Self::TransportNak,
            LinkError::ChecksumMismatch => Self::ChecksumMismatch,
            LinkError::Io(msg) => Self::LinkFailure {
                attempts: 1,
                last: Box::new(Self::TransportIo(msg)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let link = LookAheadError::LinkFailure {
            attempts: 4,
            last: Box::new(LookAheadError::TransportTimeout),
        };
        assert!(link.is_fatal());
        assert!(
            LookAheadError::PlannerInvariant {
                seq: 3,
                detail: "negative".into()
            }
            .is_fatal()
        );
        assert!(!LookAheadError::BufferFull.is_fatal());
        assert!(!LookAheadError::TransportNak.is_fatal());
    }

    #[test]
    fn link_errors_map_to_retryable_variants() {
        assert!(LookAheadError::from(LinkError::Timeout).is_retryable());
        assert!(LookAheadError::from(LinkError::Nak).is_retryable());
        assert!(LookAheadError::from(LinkError::ChecksumMismatch).is_retryable());
        let io = LookAheadError::from(LinkError::Io("closed".into()));
        assert!(io.is_fatal());
        assert!(!io.is_retryable());
    }

    #[test]
    fn link_failure_message_names_last_error() {
        let e = LookAheadError::LinkFailure {
            attempts: 4,
            last: Box::new(LookAheadError::TransportTimeout),
        };
        assert_eq!(e.to_string(), "link failure after 4 attempt(s): transport timeout");
    }
}
