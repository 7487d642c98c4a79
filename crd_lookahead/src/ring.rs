//! Look-ahead ring buffer and per-FIFO runtime state.
//!
//! A fixed-capacity deque of resident segments. Enqueue derives each
//! segment's geometry (per-axis increments, path length, entry and exit
//! directions) against the modal position and advances it, so later
//! segments measure from where the machine will be once everything buffered
//! has executed. Only the dispatch loop removes entries; only the planner
//! rewrites exit speeds.

use bitflags::bitflags;
use heapless::Deque;
use static_assertions::const_assert;

use crd::consts::{AXIS_MAX, LOOKAHEAD_CAPACITY};
use crd::crd::{AxisMask, CrdPrm, LookAheadPrm, Segment};

const_assert!(LOOKAHEAD_CAPACITY > 0);

// ─── Axis frame ─────────────────────────────────────────────────────

/// Scales and profile mapping needed to turn pulse targets into geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisFrame {
    pub dimension: usize,
    /// Pulses per unit, per coordinate-system axis.
    pub scale: [f64; AXIS_MAX],
    /// Zero-based profile of each coordinate-system axis.
    pub profile: [Option<usize>; AXIS_MAX],
}

impl AxisFrame {
    pub fn new(crd: &CrdPrm, la: &LookAheadPrm) -> Self {
        let mut scale = [1.0; AXIS_MAX];
        let mut profile = [None; AXIS_MAX];
        for k in 0..crd.dimension as usize {
            if let Some(a) = la.axes.get(k) {
                scale[k] = a.scale;
            }
            profile[k] = crd.profile_index(k);
        }
        Self {
            dimension: crd.dimension as usize,
            scale,
            profile,
        }
    }

    /// Coordinate-system axis driven by zero-based profile `p`.
    fn axis_of_profile(&self, p: usize) -> Option<usize> {
        self.profile[..self.dimension]
            .iter()
            .position(|&q| q == Some(p))
    }

    /// Copy buffered profile targets onto the coordinate-system axes they drive.
    fn apply_profile_targets(
        &self,
        pos: &mut [i64; AXIS_MAX],
        axes: AxisMask,
        targets: &[i32; AXIS_MAX],
    ) {
        for (p, &t) in targets.iter().enumerate() {
            if !axes.has_profile(p) {
                continue;
            }
            if let Some(k) = self.axis_of_profile(p) {
                pos[k] = t as i64;
            }
        }
    }
}

// ─── Derived state ──────────────────────────────────────────────────

/// How an entry takes part in junction planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Path motion with non-zero length.
    Motion,
    /// Passes the speed through unchanged (I/O, segment numbers, rate
    /// settings, zero-length moves).
    Transparent,
    /// Brings the path to rest (dwell, blocking buffered move).
    Barrier,
}

/// Geometry and planning state of one resident segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentState {
    pub kind: EntryKind,
    /// Signed per-axis increment [unit].
    pub axis_len: [f64; AXIS_MAX],
    /// Synthesized path length [unit].
    pub length: f64,
    /// Unit direction at the start of the segment.
    pub dir_in: [f64; AXIS_MAX],
    /// Unit direction at the end of the segment.
    pub dir_out: [f64; AXIS_MAX],
    /// Largest share of the path speed each axis carries.
    pub axis_ratio: [f64; AXIS_MAX],
    /// Modal position once this entry has executed [pulse].
    pub end_modal: [i64; AXIS_MAX],
    /// Speed ceiling [unit/ms].
    pub ceiling: f64,
    /// Acceleration [unit/ms²].
    pub accel: f64,
    /// Junction cap towards the successor; `None` until it is known.
    pub corner_cap: Option<f64>,
    /// Backward-pass bound on the exit speed.
    pub bound: f64,
    /// Planned exit speed [unit/ms].
    pub exit_speed: f64,
}

impl SegmentState {
    fn new(kind: EntryKind, end_modal: [i64; AXIS_MAX]) -> Self {
        Self {
            kind,
            axis_len: [0.0; AXIS_MAX],
            length: 0.0,
            dir_in: [0.0; AXIS_MAX],
            dir_out: [0.0; AXIS_MAX],
            axis_ratio: [0.0; AXIS_MAX],
            end_modal,
            ceiling: f64::INFINITY,
            accel: 0.0,
            corner_cap: None,
            bound: f64::NAN,
            exit_speed: 0.0,
        }
    }
}

/// A buffered segment with its local sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidentSegment {
    pub seq: u64,
    pub segment: Segment,
    pub state: SegmentState,
}

// ─── Runtime state ──────────────────────────────────────────────────

bitflags! {
    /// Runtime flags of one look-ahead FIFO.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RuntimeFlags: u8 {
        /// Resident bounds are stale.
        const NEEDS_PLAN = 0x01;
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Running state carried across enqueues and drains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub flags: RuntimeFlags,
    /// Total buffered path length [unit].
    pub total_length: f64,
    /// Exit speed of the last transmitted segment.
    pub carried_speed: f64,
    /// Unit direction the last transmitted motion left along.
    pub carried_dir: [f64; AXIS_MAX],
    /// Position when the coordinate system was established [pulse].
    pub start_pos: [i64; AXIS_MAX],
    /// Position once every buffered segment has executed [pulse].
    pub modal_pos: [i64; AXIS_MAX],
    /// End of the most recently enqueued interpolated segment [pulse].
    pub end_pos: [i64; AXIS_MAX],
    /// Position once every acknowledged segment has executed [pulse].
    pub acked_pos: [i64; AXIS_MAX],
    /// Lowest sequence id whose own planning inputs changed.
    pub dirty_seq: Option<u64>,
}

/// Local sequence bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceLedger {
    pub next_seq: u64,
    pub last_acked: Option<u64>,
    /// User segment number of the last acknowledged segment.
    pub last_user_seg: i32,
}

/// Result of [`LookAheadRing::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueue {
    Accepted(u64),
    /// Window full; the segment is handed back untouched.
    Full(Segment),
}

// ─── Ring ───────────────────────────────────────────────────────────

/// Bounded look-ahead window of one (coordinate system, FIFO).
#[derive(Debug, Clone)]
pub struct LookAheadRing {
    entries: Deque<ResidentSegment, LOOKAHEAD_CAPACITY>,
    depth: usize,
    pub runtime: RuntimeState,
    pub ledger: SequenceLedger,
}

impl LookAheadRing {
    /// Empty ring of the given depth, clamped to `1..=LOOKAHEAD_CAPACITY`.
    pub fn new(depth: usize) -> Self {
        Self {
            entries: Deque::new(),
            depth: depth.clamp(1, LOOKAHEAD_CAPACITY),
            runtime: RuntimeState::default(),
            ledger: SequenceLedger::default(),
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Change the window depth. Only valid on an empty ring.
    pub fn set_depth(&mut self, depth: usize) -> bool {
        if !self.entries.is_empty() {
            return false;
        }
        self.depth = depth.clamp(1, LOOKAHEAD_CAPACITY);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.depth
    }

    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.depth.saturating_sub(self.entries.len())
    }

    pub fn peek_oldest(&self) -> Option<&ResidentSegment> {
        self.entries.front()
    }

    pub fn newest(&self) -> Option<&ResidentSegment> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ResidentSegment> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut ResidentSegment> {
        self.entries.iter_mut()
    }

    /// Index of sequence id `seq` in the window.
    pub fn index_of(&self, seq: u64) -> Option<usize> {
        let front = self.entries.front()?.seq;
        let idx = seq.checked_sub(front)? as usize;
        (idx < self.entries.len()).then_some(idx)
    }

    /// Mark `seq` as having changed planning inputs.
    pub(crate) fn mark_dirty(&mut self, seq: u64) {
        self.runtime.dirty_seq = Some(self.runtime.dirty_seq.map_or(seq, |d| d.min(seq)));
        self.runtime.flags.insert(RuntimeFlags::NEEDS_PLAN);
    }

    /// Re-anchor all positions at `pos` (new coordinate-system context).
    pub fn establish(&mut self, pos: [i64; AXIS_MAX]) {
        self.runtime.start_pos = pos;
        self.runtime.acked_pos = pos;
        self.clear();
    }

    /// Discard every resident segment and reset the carried speed.
    pub fn clear(&mut self) {
        self.entries.clear();
        let rt = &mut self.runtime;
        rt.flags = RuntimeFlags::empty();
        rt.total_length = 0.0;
        rt.carried_speed = 0.0;
        rt.carried_dir = [0.0; AXIS_MAX];
        rt.modal_pos = rt.acked_pos;
        rt.end_pos = rt.acked_pos;
        rt.dirty_seq = None;
    }

    /// Buffer a validated segment, deriving its geometry.
    pub fn enqueue(&mut self, segment: Segment, frame: &AxisFrame) -> Enqueue {
        if self.is_full() {
            return Enqueue::Full(segment);
        }

        let state = self.derive(&segment, frame);
        let seq = self.ledger.next_seq;
        let entry = ResidentSegment {
            seq,
            segment,
            state,
        };
        if let Err(rejected) = self.entries.push_back(entry) {
            return Enqueue::Full(rejected.segment);
        }

        self.ledger.next_seq += 1;
        let rt = &mut self.runtime;
        if let Some(e) = self.entries.back() {
            rt.total_length += e.state.length;
            rt.modal_pos = e.state.end_modal;
            if e.segment.is_motion() {
                rt.end_pos = e.state.end_modal;
            }
        }
        self.mark_dirty(seq);
        Enqueue::Accepted(seq)
    }

    /// Remove the oldest entry after the card acknowledged it.
    pub fn pop_oldest(&mut self) -> Option<ResidentSegment> {
        let e = self.entries.pop_front()?;
        let rt = &mut self.runtime;
        rt.total_length = (rt.total_length - e.state.length).max(0.0);
        rt.carried_speed = e.state.exit_speed;
        match e.state.kind {
            EntryKind::Motion => rt.carried_dir = e.state.dir_out,
            EntryKind::Barrier => rt.carried_dir = [0.0; AXIS_MAX],
            EntryKind::Transparent => {}
        }
        rt.acked_pos = e.state.end_modal;
        self.ledger.last_acked = Some(e.seq);
        self.ledger.last_user_seg = e.segment.seg_num();
        if self.entries.is_empty() {
            rt.total_length = 0.0;
            rt.dirty_seq = None;
        }
        Some(e)
    }

    /// Geometry `segment` would get if it were enqueued now.
    pub fn preview(&self, segment: &Segment, frame: &AxisFrame) -> SegmentState {
        self.derive(segment, frame)
    }

    fn derive(&self, segment: &Segment, frame: &AxisFrame) -> SegmentState {
        let mut pos = self.runtime.modal_pos;
        match segment {
            Segment::Rapid(m) => {
                for (k, &t) in m.targets.iter().enumerate() {
                    pos[k] = t as i64;
                }
                self.linear_state(pos, frame)
            }
            Segment::Line(m) => {
                for (k, &t) in m.targets.iter().enumerate() {
                    pos[k] = t as i64;
                }
                let mut s = self.linear_state(pos, frame);
                if m.precise_stop && s.kind == EntryKind::Transparent {
                    s.kind = EntryKind::Barrier;
                }
                s
            }
            Segment::ArcCw(a) | Segment::ArcCcw(a) => {
                let ccw = matches!(segment, Segment::ArcCcw(_));
                let (i, j) = a.plane.axes();
                let start = [self.runtime.modal_pos[i], self.runtime.modal_pos[j]];
                pos[i] = a.end[0] as i64;
                pos[j] = a.end[1] as i64;
                arc_state(start, a.center, pos, (i, j), ccw, &self.runtime.modal_pos, frame)
            }
            Segment::HelixCw(h) | Segment::HelixCcw(h) => {
                let ccw = matches!(segment, Segment::HelixCcw(_));
                let (i, j) = h.arc.plane.axes();
                let n = h.arc.plane.normal();
                let start = [self.runtime.modal_pos[i], self.runtime.modal_pos[j]];
                pos[i] = h.arc.end[0] as i64;
                pos[j] = h.arc.end[1] as i64;
                pos[n] = h.lead as i64;
                let modal = &self.runtime.modal_pos;
                let s = arc_state(start, h.arc.center, pos, (i, j), ccw, modal, frame);
                lift_helix(s, n, modal, frame)
            }
            Segment::BufferMove(m) => {
                frame.apply_profile_targets(&mut pos, m.axes, &m.positions);
                let kind = if m.modal.is_empty() {
                    EntryKind::Transparent
                } else {
                    EntryKind::Barrier
                };
                SegmentState::new(kind, pos)
            }
            Segment::BufferGear(g) => {
                frame.apply_profile_targets(&mut pos, g.axes, &g.positions);
                SegmentState::new(EntryKind::Transparent, pos)
            }
            Segment::Dwell(_) => SegmentState::new(EntryKind::Barrier, pos),
            Segment::SetSegmentNumber { .. }
            | Segment::SetIo(_)
            | Segment::BufferVel(_)
            | Segment::BufferAcc(_) => SegmentState::new(EntryKind::Transparent, pos),
        }
    }

    fn linear_state(&self, target: [i64; AXIS_MAX], frame: &AxisFrame) -> SegmentState {
        let mut axis_len = [0.0; AXIS_MAX];
        for k in 0..frame.dimension {
            axis_len[k] = (target[k] - self.runtime.modal_pos[k]) as f64 / frame.scale[k];
        }
        let length = norm(&axis_len);
        if length == 0.0 {
            return SegmentState::new(EntryKind::Transparent, target);
        }

        let mut s = SegmentState::new(EntryKind::Motion, target);
        s.axis_len = axis_len;
        s.length = length;
        for k in 0..frame.dimension {
            s.dir_in[k] = axis_len[k] / length;
            s.axis_ratio[k] = s.dir_in[k].abs();
        }
        s.dir_out = s.dir_in;
        s
    }
}

fn arc_state(
    start: [i64; 2],
    center: [i32; 2],
    target: [i64; AXIS_MAX],
    (i, j): (usize, usize),
    ccw: bool,
    modal: &[i64; AXIS_MAX],
    frame: &AxisFrame,
) -> SegmentState {
    let (si, sj) = (frame.scale[i], frame.scale[j]);
    // Radius vectors from the centre, in units.
    let rs = [-(center[0] as f64) / si, -(center[1] as f64) / sj];
    let re = [
        (target[i] - start[0] - center[0] as i64) as f64 / si,
        (target[j] - start[1] - center[1] as i64) as f64 / sj,
    ];
    let radius = rs[0].hypot(rs[1]);

    let a_s = rs[1].atan2(rs[0]);
    let a_e = re[1].atan2(re[0]);
    let tau = std::f64::consts::TAU;
    let mut sweep = if ccw { a_e - a_s } else { a_s - a_e }.rem_euclid(tau);
    if sweep < 1e-12 {
        sweep = tau;
    }

    let mut s = SegmentState::new(EntryKind::Motion, target);
    s.length = radius * sweep;
    if s.length == 0.0 {
        s.kind = EntryKind::Transparent;
        return s;
    }
    s.axis_len[i] = (target[i] - modal[i]) as f64 / si;
    s.axis_len[j] = (target[j] - modal[j]) as f64 / sj;

    let tangent = |r: [f64; 2]| {
        let n = r[0].hypot(r[1]).max(f64::MIN_POSITIVE);
        if ccw {
            [-r[1] / n, r[0] / n]
        } else {
            [r[1] / n, -r[0] / n]
        }
    };
    let (ti, to) = (tangent(rs), tangent(re));
    s.dir_in[i] = ti[0];
    s.dir_in[j] = ti[1];
    s.dir_out[i] = to[0];
    s.dir_out[j] = to[1];
    // Each plane axis reaches full path speed somewhere on the circle.
    s.axis_ratio[i] = 1.0;
    s.axis_ratio[j] = 1.0;
    s
}

/// Add the linear travel of axis `n` to a planar arc state. The path
/// length becomes the hypotenuse of arc length and rise; the plane
/// components of both tangents shrink by the same factor.
fn lift_helix(
    mut s: SegmentState,
    n: usize,
    modal: &[i64; AXIS_MAX],
    frame: &AxisFrame,
) -> SegmentState {
    let rise = (s.end_modal[n] - modal[n]) as f64 / frame.scale[n];
    if s.kind != EntryKind::Motion || rise == 0.0 {
        return s;
    }
    let arc_len = s.length;
    s.length = arc_len.hypot(rise);
    let k = arc_len / s.length;
    for dir in [&mut s.dir_in, &mut s.dir_out] {
        dir.iter_mut().for_each(|c| *c *= k);
        dir[n] = rise / s.length;
    }
    s.axis_ratio.iter_mut().for_each(|r| *r *= k);
    s.axis_ratio[n] = rise.abs() / s.length;
    s.axis_len[n] = rise;
    s
}

#[inline]
pub(crate) fn norm(v: &[f64; AXIS_MAX]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
