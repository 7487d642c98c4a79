//! Drain loop: moves planned segments from the ring to the card.
//!
//! Contiguous drainable records at the front of the ring are packed into one
//! `CrdData` payload, each carrying its planned exit speed in the
//! end-velocity field. Entries leave the ring only once the card has
//! acknowledged the frame, so a failed exchange leaves the window intact.

use parking_lot::Mutex;
use static_assertions::const_assert;
use tracing::debug;

use crd::consts::FRAME_PAYLOAD_MAX;
use crd::crd::segment::RECORD_LEN_MAX;
use crd::crd::CmdCode;
use crd::wire::WireWriter;

use crate::error::LookAheadError;
use crate::planner::{CancelTicket, JunctionPlanner, PlanMode};
use crate::ring::{LookAheadRing, ResidentSegment, RuntimeFlags};
use crate::transport::{CardLink, FrameTransport};

const_assert!(RECORD_LEN_MAX + 2 <= FRAME_PAYLOAD_MAX);

/// Why a drain was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// Resident count reached the high-water mark.
    HighWater,
    /// End of program: plan with no successor and drain everything.
    EndOfProgram,
    /// An enqueue found the window full.
    BufferFull,
}

/// One segment handed to the card.
#[derive(Debug, Clone, PartialEq)]
pub struct SentSegment {
    pub seq: u64,
    pub seg_num: i32,
    pub cmd: CmdCode,
    pub exit_speed: f64,
}

/// Outcome of a drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub frames: usize,
    pub segments: usize,
    pub sent: Vec<SentSegment>,
}

impl DrainReport {
    pub fn merge(&mut self, other: DrainReport) {
        self.frames += other.frames;
        self.segments += other.segments;
        self.sent.extend(other.sent);
    }
}

/// Routing of one (coordinate system, FIFO) on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainTarget {
    pub crd: usize,
    pub fifo: usize,
    pub axis_mask: u32,
    /// Drain while at least this many segments are resident.
    pub high_water: usize,
}

/// Whether an entry's exit speed is final without finalize semantics.
#[inline]
fn settled(e: &ResidentSegment) -> bool {
    e.state.corner_cap.is_some()
}

pub fn drain<L: CardLink>(
    ring: &mut LookAheadRing,
    planner: &JunctionPlanner,
    transport: &Mutex<FrameTransport<L>>,
    target: &DrainTarget,
    reason: DrainReason,
    ticket: &CancelTicket<'_>,
) -> Result<DrainReport, LookAheadError> {
    let mut report = DrainReport::default();

    match reason {
        DrainReason::EndOfProgram => {
            planner.plan(ring, PlanMode::Finalize, ticket)?;
            while !ring.is_empty() {
                if send_batch(ring, transport, target, true, ticket, &mut report)? == 0 {
                    break;
                }
            }
        }
        DrainReason::BufferFull => {
            let finalize = !ring.peek_oldest().is_some_and(settled);
            if finalize {
                planner.plan(ring, PlanMode::Finalize, ticket)?;
            } else if ring.runtime.flags.contains(RuntimeFlags::NEEDS_PLAN) {
                planner.plan(ring, PlanMode::Provisional, ticket)?;
            }
            send_batch(ring, transport, target, finalize, ticket, &mut report)?;
        }
        DrainReason::HighWater => {
            if ring.runtime.flags.contains(RuntimeFlags::NEEDS_PLAN) {
                planner.plan(ring, PlanMode::Provisional, ticket)?;
            }
            while ring.len() >= target.high_water {
                if send_batch(ring, transport, target, false, ticket, &mut report)? == 0 {
                    break;
                }
            }
        }
    }

    if report.frames > 0 {
        debug!(
            crd = target.crd,
            fifo = target.fifo,
            ?reason,
            frames = report.frames,
            segments = report.segments,
            resident = ring.len(),
            "drained"
        );
    }
    Ok(report)
}

/// Send one frame of drainable records; returns how many left the ring.
fn send_batch<L: CardLink>(
    ring: &mut LookAheadRing,
    transport: &Mutex<FrameTransport<L>>,
    target: &DrainTarget,
    finalize: bool,
    ticket: &CancelTicket<'_>,
    report: &mut DrainReport,
) -> Result<usize, LookAheadError> {
    ticket.check()?;

    let mut w = WireWriter::<FRAME_PAYLOAD_MAX>::new();
    let mut count = 0;
    for e in ring.iter() {
        if !finalize && !settled(e) {
            break;
        }
        if w.remaining() < e.segment.encoded_len()? {
            break;
        }
        e.segment.encode_record(e.state.exit_speed, &mut w)?;
        count += 1;
    }
    if count == 0 {
        return Ok(0);
    }

    transport
        .lock()
        .send_records(target.crd, target.fifo, target.axis_mask, w.as_slice())?;
    report.frames += 1;

    for _ in 0..count {
        let Some(e) = ring.pop_oldest() else {
            break;
        };
        debug!(
            seq = e.seq,
            seg_num = e.segment.seg_num(),
            cmd = ?e.segment.code(),
            exit_speed = e.state.exit_speed,
            "segment sent"
        );
        report.segments += 1;
        report.sent.push(SentSegment {
            seq: e.seq,
            seg_num: e.segment.seg_num(),
            cmd: e.segment.code(),
            exit_speed: e.state.exit_speed,
        });
    }
    Ok(count)
}
