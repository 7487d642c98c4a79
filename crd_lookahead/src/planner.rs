//! Junction speed planner.
//!
//! Every resident segment gets an exit speed bounded by
//!
//! - its own ceiling (requested speed scaled by the override, the
//!   synthesized ceiling, per-axis speed ceilings, minimum even time),
//! - the junction cap towards its successor (corner markdown),
//! - the successor's ceiling and its ability to decelerate within its own
//!   length to its own bound (`sqrt(b_next² + 2·a_next·L_next)`),
//! - what is reachable from the entry speed (`sqrt(v_in² + 2·a·L)`).
//!
//! The backward pass starts at the newest entry and stops at the first
//! bound that did not change; the forward pass restarts from the earliest
//! changed index. Impossible speeds are reported, never clamped.

use std::sync::atomic::{AtomicU64, Ordering};

use heapless::Vec;
use tracing::{debug, trace};

use crd::consts::AXIS_MAX;
use crd::crd::{AxisLimits, CrdPrm, LookAheadPrm, Segment};

use crate::error::LookAheadError;
use crate::ring::{AxisFrame, EntryKind, LookAheadRing, RuntimeFlags, SegmentState};

/// Relative slack allowed when checking deceleration feasibility.
const FEASIBILITY_EPS: f64 = 1e-9;

/// Direction components below this do not load an axis at a junction.
const SHARE_EPS: f64 = 1e-12;

// ─── Cancellation ───────────────────────────────────────────────────

/// Generation counter bumped by `clear_buffer` to abort a running plan.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicU64);

impl CancelToken {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Invalidate every ticket issued so far.
    pub fn cancel(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn ticket(&self) -> CancelTicket<'_> {
        CancelTicket {
            token: self,
            seen: self.0.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of a [`CancelToken`] generation.
#[derive(Debug, Clone, Copy)]
pub struct CancelTicket<'a> {
    token: &'a CancelToken,
    seen: u64,
}

impl CancelTicket<'_> {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.0.load(Ordering::Acquire) != self.seen
    }

    #[inline]
    pub fn check(&self) -> Result<(), LookAheadError> {
        if self.is_cancelled() {
            Err(LookAheadError::Aborted)
        } else {
            Ok(())
        }
    }
}

// ─── Corner model ───────────────────────────────────────────────────

/// Corner markdown curve.
///
/// The weight `w = ((1 − cos θ) / 2)^markdown_exponent` runs from 0 for a
/// straight continuation to 1 for a reversal. Each axis limit interpolates
/// from its maximum speed down to its step speed by `w`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerModel {
    pub markdown_exponent: f64,
}

impl Default for CornerModel {
    fn default() -> Self {
        Self {
            markdown_exponent: 1.0,
        }
    }
}

impl CornerModel {
    #[inline]
    pub fn weight(&self, cos_theta: f64) -> f64 {
        ((1.0 - cos_theta.clamp(-1.0, 1.0)) / 2.0).powf(self.markdown_exponent)
    }
}

/// Semantics for entries whose successor is not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Assume the path may have to stop right after the newest entry.
    Provisional,
    /// Nothing follows: motion ends at its configured end velocity.
    Finalize,
}

/// What one planning run touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanReport {
    /// Entries visited by the backward pass.
    pub backward_visited: usize,
    /// Index the forward pass restarted from, if it ran.
    pub forward_from: Option<usize>,
}

// ─── Planner ────────────────────────────────────────────────────────

/// Junction planner of one (coordinate system, FIFO).
#[derive(Debug, Clone)]
pub struct JunctionPlanner {
    dimension: usize,
    syn_vel_max: f64,
    syn_acc_max: f64,
    even_time_ms: f64,
    axes: Vec<AxisLimits, AXIS_MAX>,
    corner: CornerModel,
}

impl JunctionPlanner {
    pub fn new(crd: &CrdPrm, la: &LookAheadPrm) -> Self {
        Self {
            dimension: (crd.dimension as usize).min(la.axes.len()),
            syn_vel_max: crd.syn_vel_max,
            syn_acc_max: crd.syn_acc_max,
            even_time_ms: crd.even_time_ms as f64,
            axes: la.axes.clone(),
            corner: CornerModel::default(),
        }
    }

    pub fn with_corner_model(mut self, corner: CornerModel) -> Self {
        self.corner = corner;
        self
    }

    pub fn corner_model(&self) -> CornerModel {
        self.corner
    }

    fn axis_limits(&self) -> impl Iterator<Item = (usize, &AxisLimits)> {
        self.axes.iter().take(self.dimension).enumerate()
    }

    /// Ceiling and acceleration of a motion entry.
    fn kinematic_limits(&self, segment: &Segment, s: &SegmentState, ratio: f64) -> (f64, f64) {
        let Some((syn_vel, syn_acc)) = segment.kinematics() else {
            return (f64::INFINITY, 0.0);
        };
        let mut ceiling = (syn_vel * ratio).min(self.syn_vel_max);
        let mut accel = syn_acc.min(self.syn_acc_max);
        for (k, lim) in self.axis_limits() {
            let share = s.axis_ratio[k];
            if share > SHARE_EPS {
                let per_unit = share * lim.scale;
                ceiling = ceiling.min(lim.speed_max / per_unit);
                accel = accel.min(lim.acc_max / per_unit);
            }
        }
        if self.even_time_ms > 0.0 {
            ceiling = ceiling.min(s.length / self.even_time_ms);
        }
        (ceiling, accel)
    }

    /// Maximum synthesized speed through the junction between a segment
    /// leaving along `out` and one entering along `inn`.
    pub fn junction_speed(&self, out: &[f64; AXIS_MAX], inn: &[f64; AXIS_MAX]) -> f64 {
        let cos: f64 = out.iter().zip(inn).map(|(a, b)| a * b).sum();
        let w = self.corner.weight(cos);
        let mut v = f64::INFINITY;
        for (k, lim) in self.axis_limits() {
            let share = out[k].abs().max(inn[k].abs());
            if share <= SHARE_EPS {
                continue;
            }
            let axis_speed = lim.speed_max - (lim.speed_max - lim.max_step_speed) * w;
            v = v.min(axis_speed / (share * lim.scale));
        }
        v
    }

    /// Derive limits of the newest entry and link it to its predecessors.
    pub fn admit_tail(&self, ring: &mut LookAheadRing, override_ratio: f64) {
        let mut dirty: Option<u64> = None;
        {
            let mut entries = ring.iter_mut().rev();
            let Some(tail) = entries.next() else {
                return;
            };

            let kind = tail.state.kind;
            if kind == EntryKind::Motion {
                let (c, a) = self.kinematic_limits(&tail.segment, &tail.state, override_ratio);
                tail.state.ceiling = c;
                tail.state.accel = a;
                if tail.segment.precise_stop() {
                    tail.state.corner_cap = Some(0.0);
                }
            } else if kind == EntryKind::Barrier {
                tail.state.corner_cap = Some(0.0);
            }
            let dir_in = tail.state.dir_in;

            if kind != EntryKind::Transparent {
                for prev in entries {
                    match prev.state.kind {
                        EntryKind::Transparent => {
                            if prev.state.corner_cap.is_none() {
                                prev.state.corner_cap = Some(f64::INFINITY);
                                dirty = Some(prev.seq);
                            }
                        }
                        EntryKind::Barrier => break,
                        EntryKind::Motion => {
                            if prev.state.corner_cap.is_none() {
                                let cap = if kind == EntryKind::Barrier {
                                    0.0
                                } else {
                                    self.junction_speed(&prev.state.dir_out, &dir_in)
                                };
                                trace!(seq = prev.seq, cap, "junction linked");
                                prev.state.corner_cap = Some(cap);
                                dirty = Some(prev.seq);
                            }
                            break;
                        }
                    }
                }
            }
        }

        if let Some(seq) = dirty {
            ring.mark_dirty(seq);
        }
    }

    /// Reconcile the speed carried over from the last transmitted segment
    /// with the segment about to open a new stretch of path.
    ///
    /// Applies only while nothing but transparent records is resident. A
    /// barrier stops the carried speed; motion caps it at the junction with
    /// the last transmitted direction and at its own ceiling. A segment too
    /// short to shed what remains is refused before anything is buffered.
    pub fn reconcile_carried(
        &self,
        ring: &mut LookAheadRing,
        segment: &Segment,
        frame: &AxisFrame,
        override_ratio: f64,
    ) -> Result<(), LookAheadError> {
        let carried = ring.runtime.carried_speed;
        if carried <= 0.0 || ring.iter().any(|e| e.state.kind != EntryKind::Transparent) {
            return Ok(());
        }
        let s = ring.preview(segment, frame);
        let speed = match s.kind {
            EntryKind::Transparent => return Ok(()),
            EntryKind::Barrier => 0.0,
            EntryKind::Motion => {
                let (ceiling, accel) = self.kinematic_limits(segment, &s, override_ratio);
                let v = carried
                    .min(ceiling)
                    .min(self.junction_speed(&ring.runtime.carried_dir, &s.dir_in));
                let shed = (2.0 * accel * s.length).sqrt();
                if v > shed + FEASIBILITY_EPS * shed.max(1.0) {
                    return Err(LookAheadError::CarriedSpeed { speed: v, limit: shed });
                }
                v
            }
        };
        if speed < carried {
            debug!(carried, speed, "carried speed capped at junction");
        }
        ring.runtime.carried_speed = speed;
        Ok(())
    }

    fn exit_limit(segment: &Segment, s: &SegmentState, mode: PlanMode) -> f64 {
        match s.kind {
            EntryKind::Barrier => 0.0,
            EntryKind::Motion if segment.precise_stop() => 0.0,
            kind => match (s.corner_cap, mode) {
                (Some(cap), _) => cap,
                // Passes the predecessor's speed through.
                (None, _) if kind == EntryKind::Transparent => f64::INFINITY,
                (None, PlanMode::Provisional) => 0.0,
                (None, PlanMode::Finalize) => segment.configured_vel_end(),
            },
        }
    }

    /// Recompute exit speeds of the resident window.
    pub fn plan(
        &self,
        ring: &mut LookAheadRing,
        mode: PlanMode,
        ticket: &CancelTicket<'_>,
    ) -> Result<PlanReport, LookAheadError> {
        let n = ring.len();
        let mut report = PlanReport::default();
        if n == 0 {
            ring.runtime.flags.remove(RuntimeFlags::NEEDS_PLAN);
            return Ok(report);
        }
        let dirty_idx = match ring.runtime.dirty_seq {
            Some(seq) => ring.iter().position(|e| e.seq >= seq).unwrap_or(n),
            None => n,
        };

        // Backward pass.
        let mut first_changed = n;
        let mut next: Option<(f64, f64, f64, f64)> = None;
        for (back, e) in ring.iter_mut().rev().enumerate() {
            ticket.check()?;
            let idx = n - 1 - back;
            let s = &mut e.state;

            let mut b = s.ceiling.min(Self::exit_limit(&e.segment, s, mode));
            if let Some((nb, nc, na, nl)) = next {
                b = b.min(nc).min((nb * nb + 2.0 * na * nl).sqrt());
            }
            if b.is_nan() || b < 0.0 {
                return Err(LookAheadError::PlannerInvariant {
                    seq: e.seq,
                    detail: format!("exit bound {b}"),
                });
            }

            report.backward_visited += 1;
            let unchanged = b == s.bound;
            s.bound = b;
            next = Some((b, s.ceiling, s.accel, s.length));
            if !unchanged {
                first_changed = idx;
            } else if idx <= dirty_idx && s.corner_cap.is_some() {
                break;
            }
        }

        // Forward pass.
        if first_changed < n {
            report.forward_from = Some(first_changed);
            let mut v_prev = if first_changed == 0 {
                ring.runtime.carried_speed
            } else {
                ring.iter()
                    .nth(first_changed - 1)
                    .map_or(0.0, |e| e.state.exit_speed)
            };
            for e in ring.iter_mut().skip(first_changed) {
                ticket.check()?;
                let s = &mut e.state;
                let reach_two_a_l = 2.0 * s.accel * s.length;
                let decel_limit = (s.bound * s.bound + reach_two_a_l).sqrt();
                if v_prev > decel_limit + FEASIBILITY_EPS * decel_limit.max(1.0) {
                    return Err(LookAheadError::PlannerInvariant {
                        seq: e.seq,
                        detail: format!(
                            "entry speed {v_prev} cannot decelerate to {} within {}",
                            s.bound, s.length
                        ),
                    });
                }
                let v = s.bound.min((v_prev * v_prev + reach_two_a_l).sqrt());
                if !v.is_finite() || v < 0.0 {
                    return Err(LookAheadError::PlannerInvariant {
                        seq: e.seq,
                        detail: format!("exit speed {v}"),
                    });
                }
                s.exit_speed = v;
                v_prev = v;
            }
        }

        ring.runtime.dirty_seq = None;
        ring.runtime.flags.remove(RuntimeFlags::NEEDS_PLAN);
        debug!(
            resident = n,
            visited = report.backward_visited,
            from = ?report.forward_from,
            ?mode,
            "look-ahead replanned"
        );
        Ok(report)
    }
}
