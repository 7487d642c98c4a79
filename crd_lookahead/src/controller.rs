//! Look-ahead controller for one card.
//!
//! Holds one look-ahead channel per (coordinate system, FIFO), each behind
//! its own mutex, and a single mutex over the card transport. Every method
//! takes `&self`, so separate threads can feed the two FIFOs of a
//! coordinate system concurrently.
//!
//! Lock order: FIFO 0, FIFO 1, transport. A thread holding the transport
//! never waits on a FIFO.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crd::config::CardConfig;
use crd::consts::{AXIS_MAX, CRDSYS_MAX, DEFAULT_RETRY_LIMIT, FIFO_PER_CRD};
use crd::crd::{AllSysStatus, CrdPrm, LookAheadPrm, OriginPolicy, Segment};

use crate::dispatch::{drain, DrainReason, DrainReport, DrainTarget};
use crate::error::LookAheadError;
use crate::planner::{CancelToken, JunctionPlanner, PlanMode};
use crate::ring::{AxisFrame, Enqueue, LookAheadRing, SequenceLedger};
use crate::transport::{CardLink, FrameTransport};

/// Largest accepted synthesized-velocity override.
pub const OVERRIDE_MAX: f64 = 2.0;

// ─── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub card_id: u8,
    pub retry_limit: u8,
    /// Resident count that triggers a drain; `None` drains only on
    /// buffer-full and end of program.
    pub high_water: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            card_id: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
            high_water: None,
        }
    }
}

impl From<&CardConfig> for ControllerConfig {
    fn from(card: &CardConfig) -> Self {
        Self {
            card_id: card.card_id,
            retry_limit: card.retry_limit,
            high_water: card.high_water.map(usize::from),
        }
    }
}

/// Result of [`Controller::enqueue_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { seq: u64 },
    /// Window full. A forced drain already ran; retry the same segment.
    BufferFull,
}

impl Admission {
    /// Sequence id, or `BufferFull` as an error.
    pub fn accepted(self) -> Result<u64, LookAheadError> {
        match self {
            Self::Accepted { seq } => Ok(seq),
            Self::BufferFull => Err(LookAheadError::BufferFull),
        }
    }
}

// ─── Channels ───────────────────────────────────────────────────────

#[derive(Debug)]
struct FifoChannel {
    crd_prm: Option<CrdPrm>,
    la_prm: Option<LookAheadPrm>,
    ring: LookAheadRing,
    planner: Option<JunctionPlanner>,
    frame: Option<AxisFrame>,
    override_ratio: f64,
}

impl FifoChannel {
    fn new() -> Self {
        Self {
            crd_prm: None,
            la_prm: None,
            ring: LookAheadRing::new(LookAheadPrm::MAX_DEPTH as usize),
            planner: None,
            frame: None,
            override_ratio: 1.0,
        }
    }

    fn rebuild(&mut self) {
        match (&self.crd_prm, &self.la_prm) {
            (Some(crd), Some(la)) => {
                self.planner = Some(JunctionPlanner::new(crd, la));
                self.frame = Some(AxisFrame::new(crd, la));
            }
            _ => {
                self.planner = None;
                self.frame = None;
            }
        }
    }
}

#[derive(Debug)]
struct FifoSlot {
    cancel: CancelToken,
    /// Boxed: the window is too large to live on a thread stack.
    chan: Mutex<Box<FifoChannel>>,
}

impl FifoSlot {
    fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            chan: Mutex::new(Box::new(FifoChannel::new())),
        }
    }
}

// ─── Controller ─────────────────────────────────────────────────────

/// Look-ahead front end of one motion card.
#[derive(Debug)]
pub struct Controller<L> {
    config: ControllerConfig,
    slots: [[FifoSlot; FIFO_PER_CRD]; CRDSYS_MAX],
    transport: Mutex<FrameTransport<L>>,
}

impl<L: CardLink> Controller<L> {
    pub fn new(link: L, config: ControllerConfig) -> Self {
        Self {
            config,
            slots: std::array::from_fn(|_| std::array::from_fn(|_| FifoSlot::new())),
            transport: Mutex::new(FrameTransport::new(link, config.card_id, config.retry_limit)),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn slot(&self, crd: usize, fifo: usize) -> Result<&FifoSlot, LookAheadError> {
        self.slots
            .get(crd)
            .and_then(|c| c.get(fifo))
            .ok_or(LookAheadError::InvalidChannel { crd, fifo })
    }

    fn target(&self, crd: usize, fifo: usize, prm: &CrdPrm, depth: usize) -> DrainTarget {
        DrainTarget {
            crd,
            fifo,
            axis_mask: prm.axis_mask(),
            high_water: self.config.high_water.map_or(depth, |hw| hw.clamp(1, depth)),
        }
    }

    /// Validate and buffer one segment, then replan and drain as needed.
    pub fn enqueue_segment(
        &self,
        crd: usize,
        fifo: usize,
        segment: &Segment,
    ) -> Result<Admission, LookAheadError> {
        let slot = self.slot(crd, fifo)?;
        let mut guard = slot.chan.lock();
        let ticket = slot.cancel.ticket();
        let chan = &mut **guard;

        let (Some(prm), Some(planner), Some(frame)) =
            (chan.crd_prm.as_ref(), chan.planner.as_ref(), chan.frame.as_ref())
        else {
            return Err(LookAheadError::NotConfigured { crd, fifo });
        };
        segment.validate(prm.dimension)?;
        let target = self.target(crd, fifo, prm, chan.ring.depth());

        if chan.ring.is_full() {
            debug!(crd, fifo, "look-ahead window full, forcing drain");
            drain(
                &mut chan.ring,
                planner,
                &self.transport,
                &target,
                DrainReason::BufferFull,
                &ticket,
            )?;
            return Ok(Admission::BufferFull);
        }

        planner.reconcile_carried(&mut chan.ring, segment, frame, chan.override_ratio)?;
        let seq = match chan.ring.enqueue(segment.clone(), frame) {
            Enqueue::Accepted(seq) => seq,
            Enqueue::Full(_) => return Ok(Admission::BufferFull),
        };
        planner.admit_tail(&mut chan.ring, chan.override_ratio);
        planner.plan(&mut chan.ring, PlanMode::Provisional, &ticket)?;

        if self.config.high_water.is_some() && chan.ring.len() >= target.high_water {
            drain(
                &mut chan.ring,
                planner,
                &self.transport,
                &target,
                DrainReason::HighWater,
                &ticket,
            )?;
        }
        Ok(Admission::Accepted { seq })
    }

    /// Discard every resident segment and the card-side FIFO.
    ///
    /// A plan or drain running on another thread is aborted first.
    pub fn clear_buffer(&self, crd: usize, fifo: usize) -> Result<(), LookAheadError> {
        let slot = self.slot(crd, fifo)?;
        slot.cancel.cancel();
        let mut chan = slot.chan.lock();
        let dropped = chan.ring.len();
        chan.ring.clear();
        info!(crd, fifo, dropped, "look-ahead buffer cleared");
        self.transport.lock().clear(crd, fifo)
    }

    /// Plan the tail with no successor and transmit every resident segment.
    pub fn flush_to_end_of_program(
        &self,
        crd: usize,
        fifo: usize,
    ) -> Result<DrainReport, LookAheadError> {
        let slot = self.slot(crd, fifo)?;
        let mut guard = slot.chan.lock();
        let ticket = slot.cancel.ticket();
        let chan = &mut **guard;
        let (Some(prm), Some(planner)) = (chan.crd_prm.as_ref(), chan.planner.as_ref()) else {
            return Err(LookAheadError::NotConfigured { crd, fifo });
        };
        let target = self.target(crd, fifo, prm, chan.ring.depth());
        let report = drain(
            &mut chan.ring,
            planner,
            &self.transport,
            &target,
            DrainReason::EndOfProgram,
            &ticket,
        )?;
        info!(crd, fifo, segments = report.segments, frames = report.frames, "program flushed");
        Ok(report)
    }

    /// Establish the coordinate system on the card and re-anchor both FIFOs.
    pub fn set_coordinate_system_context(
        &self,
        crd: usize,
        prm: CrdPrm,
    ) -> Result<(), LookAheadError> {
        prm.validate().map_err(LookAheadError::Config)?;
        let [s0, s1] = self
            .slots
            .get(crd)
            .ok_or(LookAheadError::InvalidChannel { crd, fifo: 0 })?;
        let mut c0 = s0.chan.lock();
        let mut c1 = s1.chan.lock();
        if !c0.ring.is_empty() || !c1.ring.is_empty() {
            return Err(LookAheadError::ContextBusy { crd });
        }
        for (fifo, chan) in [&**c0, &**c1].into_iter().enumerate() {
            if let Some(la) = &chan.la_prm {
                la.covers(prm.dimension)
                    .map_err(|e| LookAheadError::Config(format!("fifo {fifo}: {e}")))?;
            }
        }

        let mut transport = self.transport.lock();
        let mut start = [0i64; AXIS_MAX];
        if let OriginPolicy::User(origin) = prm.origin {
            let status = transport.query_status()?;
            for (k, pos) in start.iter_mut().enumerate().take(prm.dimension as usize) {
                if let Some(p) = prm.profile_index(k) {
                    *pos = status.prf_pos[p].round() as i64 - i64::from(origin[k]);
                }
            }
        }
        transport.send_prm(crd, &prm)?;
        drop(transport);

        for chan in [&mut **c0, &mut **c1] {
            chan.crd_prm = Some(prm.clone());
            chan.ring.establish(start);
            chan.rebuild();
        }
        info!(
            crd,
            dimension = prm.dimension,
            start = ?&start[..prm.dimension as usize],
            "coordinate system established"
        );
        Ok(())
    }

    /// Set window depth and axis ceilings of one FIFO.
    pub fn set_look_ahead_config(
        &self,
        crd: usize,
        fifo: usize,
        la: LookAheadPrm,
    ) -> Result<(), LookAheadError> {
        la.validate().map_err(LookAheadError::Config)?;
        let slot = self.slot(crd, fifo)?;
        let mut chan = slot.chan.lock();
        if !chan.ring.is_empty() {
            return Err(LookAheadError::ContextBusy { crd });
        }
        if let Some(prm) = &chan.crd_prm {
            la.covers(prm.dimension).map_err(LookAheadError::Config)?;
        }
        chan.ring.set_depth(la.depth as usize);
        debug!(crd, fifo, depth = la.depth, "look-ahead configured");
        chan.la_prm = Some(la);
        chan.rebuild();
        Ok(())
    }

    /// Scale the requested speed of segments enqueued from now on.
    pub fn set_override(&self, crd: usize, ratio: f64) -> Result<(), LookAheadError> {
        if !(ratio > 0.0 && ratio <= OVERRIDE_MAX) {
            return Err(LookAheadError::Config(format!(
                "override {ratio} outside (0, {OVERRIDE_MAX}]"
            )));
        }
        let [s0, s1] = self
            .slots
            .get(crd)
            .ok_or(LookAheadError::InvalidChannel { crd, fifo: 0 })?;
        let mut c0 = s0.chan.lock();
        let mut c1 = s1.chan.lock();
        c0.override_ratio = ratio;
        c1.override_ratio = ratio;
        debug!(crd, ratio, "override set");
        Ok(())
    }

    /// Queue a G05 record carrying a user segment number.
    pub fn set_user_segment_number(
        &self,
        crd: usize,
        fifo: usize,
        seg_num: i32,
    ) -> Result<Admission, LookAheadError> {
        self.enqueue_segment(crd, fifo, &Segment::SetSegmentNumber { seg_num })
    }

    /// Start interpolation on every coordinate system in `crd_mask`.
    pub fn start(&self, crd_mask: u8) -> Result<(), LookAheadError> {
        if crd_mask >> CRDSYS_MAX != 0 {
            return Err(LookAheadError::Config(format!(
                "crd mask {crd_mask:#04x} names a missing coordinate system"
            )));
        }
        for crd in 0..CRDSYS_MAX {
            if crd_mask & (1 << crd) == 0 {
                continue;
            }
            for (fifo, slot) in self.slots[crd].iter().enumerate() {
                let chan = slot.chan.lock();
                if !chan.ring.is_empty() {
                    warn!(crd, fifo, resident = chan.ring.len(), "starting with segments still buffered");
                }
            }
        }
        self.transport.lock().start(crd_mask)
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn remaining_buffer_space(&self, crd: usize, fifo: usize) -> Result<usize, LookAheadError> {
        Ok(self.slot(crd, fifo)?.chan.lock().ring.remaining_capacity())
    }

    pub fn resident_segment_count(&self, crd: usize, fifo: usize) -> Result<usize, LookAheadError> {
        Ok(self.slot(crd, fifo)?.chan.lock().ring.len())
    }

    pub fn snapshot_system_status(&self) -> Result<AllSysStatus, LookAheadError> {
        self.transport.lock().query_status()
    }

    /// Sequence id of the last segment the card acknowledged.
    pub fn last_acknowledged(&self, crd: usize, fifo: usize) -> Result<Option<u64>, LookAheadError> {
        Ok(self.slot(crd, fifo)?.chan.lock().ring.ledger.last_acked)
    }

    pub fn ledger(&self, crd: usize, fifo: usize) -> Result<SequenceLedger, LookAheadError> {
        Ok(self.slot(crd, fifo)?.chan.lock().ring.ledger)
    }

    /// Exit speed of the last transmitted segment.
    pub fn carried_speed(&self, crd: usize, fifo: usize) -> Result<f64, LookAheadError> {
        Ok(self.slot(crd, fifo)?.chan.lock().ring.runtime.carried_speed)
    }

    /// Sequence number and current planned exit speed of every resident
    /// segment, oldest first.
    pub fn planned_exits(&self, crd: usize, fifo: usize) -> Result<Vec<(u64, f64)>, LookAheadError> {
        let chan = self.slot(crd, fifo)?.chan.lock();
        Ok(chan
            .ring
            .iter()
            .map(|e| (e.seq, e.state.exit_speed))
            .collect())
    }

    /// Run `f` against the link while holding the transport lock.
    pub fn with_link<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        f(self.transport.lock().link_mut())
    }
}
