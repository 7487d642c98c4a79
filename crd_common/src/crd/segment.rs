//! Segment records: one variant per card command.
//!
//! Segments arrive already decoded from the motion program. They are
//! validated against the coordinate-system dimension before they may enter a
//! look-ahead ring, and serialized as `[cmd u8][len u8][body]` records inside
//! a `CrdData` frame payload.

use bitflags::bitflags;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{AXIS_MAX, BUFFER_POS_LIMIT, INTERP_POS_LIMIT};
use crate::wire::{WireError, WireReader, WireWriter};

/// Per-axis absolute targets of an interpolated move. `len()` is the move
/// dimension; entry `k` is coordinate-system axis `k`.
pub type Targets = Vec<i32, AXIS_MAX>;

/// Largest encoded record (header + body) [bytes].
pub const RECORD_LEN_MAX: usize = 64;

// ─── Command codes ──────────────────────────────────────────────────

/// Firmware command code of a segment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmdCode {
    Rapid = 1,
    Line = 2,
    ArcCw = 3,
    ArcCcw = 4,
    Dwell = 5,
    SetSegmentNumber = 6,
    HelixCw = 7,
    HelixCcw = 8,
    SetIo = 101,
    BufferMove = 103,
    BufferVel = 104,
    BufferAcc = 105,
    BufferGear = 106,
}

impl CmdCode {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Rapid),
            2 => Some(Self::Line),
            3 => Some(Self::ArcCw),
            4 => Some(Self::ArcCcw),
            5 => Some(Self::Dwell),
            6 => Some(Self::SetSegmentNumber),
            7 => Some(Self::HelixCw),
            8 => Some(Self::HelixCcw),
            101 => Some(Self::SetIo),
            103 => Some(Self::BufferMove),
            104 => Some(Self::BufferVel),
            105 => Some(Self::BufferAcc),
            106 => Some(Self::BufferGear),
            _ => None,
        }
    }
}

// ─── Axis mask ──────────────────────────────────────────────────────

bitflags! {
    /// Profile axes addressed by a buffered command (bit `p` = profile `p + 1`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AxisMask: u8 {
        const AXIS_1 = 0x01;
        const AXIS_2 = 0x02;
        const AXIS_3 = 0x04;
        const AXIS_4 = 0x08;
        const AXIS_5 = 0x10;
        const AXIS_6 = 0x20;
        const AXIS_7 = 0x40;
        const AXIS_8 = 0x80;
    }
}

impl Default for AxisMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl AxisMask {
    /// Mask selecting the zero-based profile index `profile`.
    #[inline]
    pub const fn profile(profile: usize) -> Self {
        Self::from_bits_retain(1 << (profile & 7))
    }

    #[inline]
    pub const fn has_profile(self, profile: usize) -> bool {
        profile < AXIS_MAX && self.bits() & (1 << profile) != 0
    }
}

// ─── Arc plane ──────────────────────────────────────────────────────

/// Interpolation plane of a circular move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ArcPlane {
    #[default]
    Xy = 0,
    Xz = 1,
    Yz = 2,
}

impl ArcPlane {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Xy),
            1 => Some(Self::Xz),
            2 => Some(Self::Yz),
            _ => None,
        }
    }

    /// Coordinate-system axis indices spanning the plane.
    #[inline]
    pub const fn axes(self) -> (usize, usize) {
        match self {
            Self::Xy => (0, 1),
            Self::Xz => (0, 2),
            Self::Yz => (1, 2),
        }
    }

    /// Axis normal to the plane, driven linearly by a helical move.
    #[inline]
    pub const fn normal(self) -> usize {
        match self {
            Self::Xy => 2,
            Self::Xz => 1,
            Self::Yz => 0,
        }
    }
}

/// Travel direction of a circular move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcDirection {
    Cw,
    Ccw,
}

// ─── Payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RapidMove {
    pub targets: Targets,
    pub syn_vel: f64,
    pub syn_acc: f64,
    #[serde(default)]
    pub seg_num: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearMove {
    pub targets: Targets,
    pub syn_vel: f64,
    pub syn_acc: f64,
    /// Requested speed at the end of the move when nothing follows.
    #[serde(default)]
    pub vel_end: f64,
    #[serde(default)]
    pub precise_stop: bool,
    #[serde(default)]
    pub seg_num: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcMove {
    #[serde(default)]
    pub plane: ArcPlane,
    /// In-plane end point [pulse].
    pub end: [i32; 2],
    /// Centre offset (I, J) relative to the start point [pulse].
    pub center: [i32; 2],
    pub syn_vel: f64,
    pub syn_acc: f64,
    #[serde(default)]
    pub vel_end: f64,
    #[serde(default)]
    pub precise_stop: bool,
    #[serde(default)]
    pub seg_num: i32,
}

/// Circular move in `arc.plane` while the plane's normal axis travels
/// linearly to `lead`; both finish together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelixMove {
    pub arc: ArcMove,
    /// Absolute target of the normal axis [pulse].
    pub lead: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dwell {
    pub delay_ms: u32,
    #[serde(default)]
    pub seg_num: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoWrite {
    #[serde(default)]
    pub card_index: u16,
    pub do_mask: u16,
    pub do_value: u16,
    #[serde(default)]
    pub seg_num: i32,
}

/// Buffered absolute move of profile axes, optionally blocking the program
/// until the masked `modal` axes arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedMove {
    pub axes: AxisMask,
    #[serde(default)]
    pub modal: AxisMask,
    pub positions: [i32; AXIS_MAX],
    #[serde(default)]
    pub seg_num: i32,
}

/// Buffered per-axis speed or acceleration for subsequent buffered moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedRate {
    pub axes: AxisMask,
    pub values: [f64; AXIS_MAX],
    #[serde(default)]
    pub seg_num: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedGear {
    pub axes: AxisMask,
    pub positions: [i32; AXIS_MAX],
    #[serde(default)]
    pub seg_num: i32,
}

/// A decoded motion program line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Segment {
    /// G00
    Rapid(RapidMove),
    /// G01
    Line(LinearMove),
    /// G02
    ArcCw(ArcMove),
    /// G03
    ArcCcw(ArcMove),
    /// G04
    Dwell(Dwell),
    /// G05
    SetSegmentNumber { seg_num: i32 },
    /// G02 with a third-axis lead
    HelixCw(HelixMove),
    /// G03 with a third-axis lead
    HelixCcw(HelixMove),
    SetIo(IoWrite),
    BufferMove(BufferedMove),
    BufferVel(BufferedRate),
    BufferAcc(BufferedRate),
    BufferGear(BufferedGear),
}

/// A segment as received by the card, with the planned exit speed that was
/// transmitted in its `velEnd` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub segment: Segment,
    pub exit_speed: f64,
}

// ─── Validation ─────────────────────────────────────────────────────

/// Reasons a segment is rejected before enqueue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    #[error("move dimension {dim} outside 1..={max}")]
    Dimension { dim: usize, max: u8 },

    #[error("axis {axis} coordinate {value} outside ±{limit}")]
    OutOfRange { axis: usize, value: i64, limit: i64 },

    #[error("{field} must be finite and positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("end velocity must be finite and non-negative, got {0}")]
    EndVelocity(f64),

    #[error("arc plane {plane:?} needs a coordinate system of dimension {needed}")]
    PlaneOutOfRange { plane: ArcPlane, needed: usize },

    #[error("arc centre offset is zero")]
    ZeroRadius,

    #[error("radius {radius} cannot reach an end point {chord} away")]
    RadiusTooSmall { radius: f64, chord: f64 },

    #[error("radius-form arc cannot describe a full circle")]
    FullCircleRadius,

    #[error("buffered command has an empty axis mask")]
    EmptyAxisMask,

    #[error("modal mask {modal:?} not contained in axis mask {axes:?}")]
    ModalOutsideMask { modal: AxisMask, axes: AxisMask },
}

fn check_positive(field: &'static str, value: f64) -> Result<(), SegmentError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SegmentError::NotPositive { field, value })
    }
}

fn check_vel_end(value: f64) -> Result<(), SegmentError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SegmentError::EndVelocity(value))
    }
}

fn check_range(axis: usize, value: i32, limit: i64) -> Result<(), SegmentError> {
    let v = value as i64;
    if (-limit..=limit).contains(&v) {
        Ok(())
    } else {
        Err(SegmentError::OutOfRange {
            axis,
            value: v,
            limit,
        })
    }
}

fn check_targets(targets: &Targets, dimension: u8) -> Result<(), SegmentError> {
    if targets.is_empty() || targets.len() > dimension as usize {
        return Err(SegmentError::Dimension {
            dim: targets.len(),
            max: dimension,
        });
    }
    for (axis, &t) in targets.iter().enumerate() {
        check_range(axis, t, INTERP_POS_LIMIT)?;
    }
    Ok(())
}

fn check_mask(axes: AxisMask) -> Result<(), SegmentError> {
    if axes.is_empty() {
        Err(SegmentError::EmptyAxisMask)
    } else {
        Ok(())
    }
}

impl ArcMove {
    fn validate(&self, dimension: u8) -> Result<(), SegmentError> {
        let (_, hi) = self.plane.axes();
        if hi >= dimension as usize {
            return Err(SegmentError::PlaneOutOfRange {
                plane: self.plane,
                needed: hi + 1,
            });
        }
        for (k, &v) in self.end.iter().chain(self.center.iter()).enumerate() {
            check_range(k % 2, v, INTERP_POS_LIMIT)?;
        }
        if self.center == [0, 0] {
            return Err(SegmentError::ZeroRadius);
        }
        check_positive("syn_vel", self.syn_vel)?;
        check_positive("syn_acc", self.syn_acc)?;
        check_vel_end(self.vel_end)
    }

    /// Centre offset of an arc given by radius. A negative radius selects
    /// the arc spanning more than half a circle.
    pub fn center_from_radius(
        start: [i32; 2],
        end: [i32; 2],
        radius: f64,
        direction: ArcDirection,
    ) -> Result<[i32; 2], SegmentError> {
        if !radius.is_finite() || radius == 0.0 {
            return Err(SegmentError::ZeroRadius);
        }
        let dx = end[0] as f64 - start[0] as f64;
        let dy = end[1] as f64 - start[1] as f64;
        let chord = dx.hypot(dy);
        if chord == 0.0 {
            return Err(SegmentError::FullCircleRadius);
        }
        let r = radius.abs();
        let half = chord / 2.0;
        if r < half * (1.0 - 1e-9) {
            return Err(SegmentError::RadiusTooSmall { radius, chord });
        }
        let h = (r * r - half * half).max(0.0).sqrt();

        // Left-hand normal of the chord; the minor CCW arc bends around it.
        let (nx, ny) = (-dy / chord, dx / chord);
        let mut side = match direction {
            ArcDirection::Ccw => 1.0,
            ArcDirection::Cw => -1.0,
        };
        if radius < 0.0 {
            side = -side;
        }
        let cx = start[0] as f64 + dx / 2.0 + side * h * nx;
        let cy = start[1] as f64 + dy / 2.0 + side * h * ny;
        Ok([
            (cx - start[0] as f64).round() as i32,
            (cy - start[1] as f64).round() as i32,
        ])
    }
}

impl HelixMove {
    fn validate(&self, dimension: u8) -> Result<(), SegmentError> {
        if dimension < 3 {
            return Err(SegmentError::PlaneOutOfRange {
                plane: self.arc.plane,
                needed: 3,
            });
        }
        self.arc.validate(dimension)?;
        check_range(self.arc.plane.normal(), self.lead, INTERP_POS_LIMIT)
    }
}

impl BufferedMove {
    fn validate(&self) -> Result<(), SegmentError> {
        check_mask(self.axes)?;
        if !self.axes.contains(self.modal) {
            return Err(SegmentError::ModalOutsideMask {
                modal: self.modal,
                axes: self.axes,
            });
        }
        for (p, &v) in self.positions.iter().enumerate() {
            if self.axes.has_profile(p) {
                check_range(p, v, BUFFER_POS_LIMIT)?;
            }
        }
        Ok(())
    }
}

impl BufferedRate {
    fn validate(&self, field: &'static str) -> Result<(), SegmentError> {
        check_mask(self.axes)?;
        for (p, &v) in self.values.iter().enumerate() {
            if self.axes.has_profile(p) {
                check_positive(field, v)?;
            }
        }
        Ok(())
    }
}

impl Segment {
    /// Build a circular move from a radius instead of a centre offset.
    ///
    /// `start` is the in-plane start point (the modal position of the plane
    /// axes); `arc.center` is overwritten with the resolved offset.
    pub fn arc_from_radius(
        direction: ArcDirection,
        start: [i32; 2],
        radius: f64,
        mut arc: ArcMove,
    ) -> Result<Self, SegmentError> {
        arc.center = ArcMove::center_from_radius(start, arc.end, radius, direction)?;
        Ok(match direction {
            ArcDirection::Cw => Self::ArcCw(arc),
            ArcDirection::Ccw => Self::ArcCcw(arc),
        })
    }

    /// Radius form of a helical move; see [`Segment::arc_from_radius`].
    pub fn helix_from_radius(
        direction: ArcDirection,
        start: [i32; 2],
        radius: f64,
        mut helix: HelixMove,
    ) -> Result<Self, SegmentError> {
        helix.arc.center = ArcMove::center_from_radius(start, helix.arc.end, radius, direction)?;
        Ok(match direction {
            ArcDirection::Cw => Self::HelixCw(helix),
            ArcDirection::Ccw => Self::HelixCcw(helix),
        })
    }

    /// Check the segment against the coordinate-system dimension.
    pub fn validate(&self, dimension: u8) -> Result<(), SegmentError> {
        match self {
            Self::Rapid(m) => {
                check_targets(&m.targets, dimension)?;
                check_positive("syn_vel", m.syn_vel)?;
                check_positive("syn_acc", m.syn_acc)
            }
            Self::Line(m) => {
                check_targets(&m.targets, dimension)?;
                check_positive("syn_vel", m.syn_vel)?;
                check_positive("syn_acc", m.syn_acc)?;
                check_vel_end(m.vel_end)
            }
            Self::ArcCw(a) | Self::ArcCcw(a) => a.validate(dimension),
            Self::HelixCw(h) | Self::HelixCcw(h) => h.validate(dimension),
            Self::Dwell(_) | Self::SetSegmentNumber { .. } | Self::SetIo(_) => Ok(()),
            Self::BufferMove(m) => m.validate(),
            Self::BufferVel(r) => r.validate("buffered velocity"),
            Self::BufferAcc(r) => r.validate("buffered acceleration"),
            Self::BufferGear(g) => {
                check_mask(g.axes)?;
                for (p, &v) in g.positions.iter().enumerate() {
                    if g.axes.has_profile(p) {
                        check_range(p, v, BUFFER_POS_LIMIT)?;
                    }
                }
                Ok(())
            }
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub const fn code(&self) -> CmdCode {
        match self {
            Self::Rapid(_) => CmdCode::Rapid,
            Self::Line(_) => CmdCode::Line,
            Self::ArcCw(_) => CmdCode::ArcCw,
            Self::ArcCcw(_) => CmdCode::ArcCcw,
            Self::Dwell(_) => CmdCode::Dwell,
            Self::SetSegmentNumber { .. } => CmdCode::SetSegmentNumber,
            Self::HelixCw(_) => CmdCode::HelixCw,
            Self::HelixCcw(_) => CmdCode::HelixCcw,
            Self::SetIo(_) => CmdCode::SetIo,
            Self::BufferMove(_) => CmdCode::BufferMove,
            Self::BufferVel(_) => CmdCode::BufferVel,
            Self::BufferAcc(_) => CmdCode::BufferAcc,
            Self::BufferGear(_) => CmdCode::BufferGear,
        }
    }

    /// User segment number carried for traceability.
    pub const fn seg_num(&self) -> i32 {
        match self {
            Self::Rapid(m) => m.seg_num,
            Self::Line(m) => m.seg_num,
            Self::ArcCw(a) | Self::ArcCcw(a) => a.seg_num,
            Self::Dwell(d) => d.seg_num,
            Self::SetSegmentNumber { seg_num } => *seg_num,
            Self::HelixCw(h) | Self::HelixCcw(h) => h.arc.seg_num,
            Self::SetIo(io) => io.seg_num,
            Self::BufferMove(m) => m.seg_num,
            Self::BufferVel(r) | Self::BufferAcc(r) => r.seg_num,
            Self::BufferGear(g) => g.seg_num,
        }
    }

    /// Interpolated path motion (rapid, line, arc, helix). Only these
    /// records carry a planned exit speed on the wire.
    pub const fn is_motion(&self) -> bool {
        matches!(
            self,
            Self::Rapid(_)
                | Self::Line(_)
                | Self::ArcCw(_)
                | Self::ArcCcw(_)
                | Self::HelixCw(_)
                | Self::HelixCcw(_)
        )
    }

    /// Requested synthesized velocity and acceleration of a path move.
    pub const fn kinematics(&self) -> Option<(f64, f64)> {
        match self {
            Self::Rapid(m) => Some((m.syn_vel, m.syn_acc)),
            Self::Line(m) => Some((m.syn_vel, m.syn_acc)),
            Self::ArcCw(a) | Self::ArcCcw(a) => Some((a.syn_vel, a.syn_acc)),
            Self::HelixCw(h) | Self::HelixCcw(h) => Some((h.arc.syn_vel, h.arc.syn_acc)),
            _ => None,
        }
    }

    /// End velocity used when the segment turns out to be the last one.
    pub const fn configured_vel_end(&self) -> f64 {
        match self {
            Self::Line(m) => m.vel_end,
            Self::ArcCw(a) | Self::ArcCcw(a) => a.vel_end,
            Self::HelixCw(h) | Self::HelixCcw(h) => h.arc.vel_end,
            _ => 0.0,
        }
    }

    pub const fn precise_stop(&self) -> bool {
        match self {
            Self::Line(m) => m.precise_stop,
            Self::ArcCw(a) | Self::ArcCcw(a) => a.precise_stop,
            Self::HelixCw(h) | Self::HelixCcw(h) => h.arc.precise_stop,
            _ => false,
        }
    }

    /// Non-motion command that brings the program to rest (dwell, blocking
    /// buffered move).
    pub fn is_barrier(&self) -> bool {
        match self {
            Self::Dwell(_) => true,
            Self::BufferMove(m) => !m.modal.is_empty(),
            _ => false,
        }
    }

    // ─── Wire encoding ──────────────────────────────────────────────

    fn encode_body<const N: usize>(
        &self,
        exit_speed: f64,
        w: &mut WireWriter<N>,
    ) -> Result<(), WireError> {
        match self {
            Self::Rapid(m) => {
                w.put_f32(m.syn_vel as f32)?;
                w.put_f32(m.syn_acc as f32)?;
                w.put_f32(exit_speed as f32)?;
                put_targets(w, &m.targets)?;
                w.put_i32(m.seg_num)
            }
            Self::Line(m) => {
                w.put_f32(m.syn_vel as f32)?;
                w.put_f32(m.syn_acc as f32)?;
                w.put_f32(exit_speed as f32)?;
                w.put_u8(m.precise_stop as u8)?;
                put_targets(w, &m.targets)?;
                w.put_i32(m.seg_num)
            }
            Self::ArcCw(a) | Self::ArcCcw(a) => {
                put_arc(w, a, exit_speed)?;
                w.put_i32(a.seg_num)
            }
            Self::HelixCw(h) | Self::HelixCcw(h) => {
                put_arc(w, &h.arc, exit_speed)?;
                w.put_i32(h.lead)?;
                w.put_i32(h.arc.seg_num)
            }
            Self::Dwell(d) => {
                w.put_u32(d.delay_ms)?;
                w.put_i32(d.seg_num)
            }
            Self::SetSegmentNumber { seg_num } => w.put_i32(*seg_num),
            Self::SetIo(io) => {
                w.put_u16(io.card_index)?;
                w.put_u16(io.do_mask)?;
                w.put_u16(io.do_value)?;
                w.put_i32(io.seg_num)
            }
            Self::BufferMove(m) => {
                w.put_u8(m.axes.bits())?;
                w.put_u8(m.modal.bits())?;
                for p in m.positions {
                    w.put_i32(p)?;
                }
                w.put_i32(m.seg_num)
            }
            Self::BufferVel(r) | Self::BufferAcc(r) => {
                w.put_u8(r.axes.bits())?;
                for v in r.values {
                    w.put_f32(v as f32)?;
                }
                w.put_i32(r.seg_num)
            }
            Self::BufferGear(g) => {
                w.put_u8(g.axes.bits())?;
                for p in g.positions {
                    w.put_i32(p)?;
                }
                w.put_i32(g.seg_num)
            }
        }
    }

    /// Append this segment as a `[cmd][len][body]` record carrying
    /// `exit_speed` in its end-velocity field.
    pub fn encode_record<const N: usize>(
        &self,
        exit_speed: f64,
        w: &mut WireWriter<N>,
    ) -> Result<(), WireError> {
        let mut body = WireWriter::<RECORD_LEN_MAX>::new();
        self.encode_body(exit_speed, &mut body)?;
        if w.remaining() < body.len() + 2 {
            return Err(WireError::Overflow { capacity: N });
        }
        w.put_u8(self.code() as u8)?;
        w.put_u8(body.len() as u8)?;
        w.put_bytes(body.as_slice())
    }

    /// Size of the encoded record [bytes].
    pub fn encoded_len(&self) -> Result<usize, WireError> {
        let mut w = WireWriter::<RECORD_LEN_MAX>::new();
        self.encode_record(0.0, &mut w)?;
        Ok(w.len())
    }

    /// Parse one record from a `CrdData` payload.
    pub fn decode_record(r: &mut WireReader<'_>) -> Result<Record, WireError> {
        let raw = r.get_u8()?;
        let code = CmdCode::from_u8(raw).ok_or(WireError::UnknownCommand(raw))?;
        let len = r.get_u8()? as usize;
        let mut b = WireReader::new(r.take(len)?);

        let mut exit_speed = 0.0;
        let segment = match code {
            CmdCode::Rapid => {
                let syn_vel = b.get_f32()? as f64;
                let syn_acc = b.get_f32()? as f64;
                exit_speed = b.get_f32()? as f64;
                let targets = get_targets(&mut b)?;
                Self::Rapid(RapidMove {
                    targets,
                    syn_vel,
                    syn_acc,
                    seg_num: b.get_i32()?,
                })
            }
            CmdCode::Line => {
                let syn_vel = b.get_f32()? as f64;
                let syn_acc = b.get_f32()? as f64;
                exit_speed = b.get_f32()? as f64;
                let precise_stop = b.get_u8()? != 0;
                let targets = get_targets(&mut b)?;
                Self::Line(LinearMove {
                    targets,
                    syn_vel,
                    syn_acc,
                    vel_end: exit_speed,
                    precise_stop,
                    seg_num: b.get_i32()?,
                })
            }
            CmdCode::ArcCw | CmdCode::ArcCcw => {
                let mut arc = get_arc(&mut b)?;
                exit_speed = arc.vel_end;
                arc.seg_num = b.get_i32()?;
                if code == CmdCode::ArcCw {
                    Self::ArcCw(arc)
                } else {
                    Self::ArcCcw(arc)
                }
            }
            CmdCode::HelixCw | CmdCode::HelixCcw => {
                let mut arc = get_arc(&mut b)?;
                exit_speed = arc.vel_end;
                let lead = b.get_i32()?;
                arc.seg_num = b.get_i32()?;
                let helix = HelixMove { arc, lead };
                if code == CmdCode::HelixCw {
                    Self::HelixCw(helix)
                } else {
                    Self::HelixCcw(helix)
                }
            }
            CmdCode::Dwell => Self::Dwell(Dwell {
                delay_ms: b.get_u32()?,
                seg_num: b.get_i32()?,
            }),
            CmdCode::SetSegmentNumber => Self::SetSegmentNumber {
                seg_num: b.get_i32()?,
            },
            CmdCode::SetIo => Self::SetIo(IoWrite {
                card_index: b.get_u16()?,
                do_mask: b.get_u16()?,
                do_value: b.get_u16()?,
                seg_num: b.get_i32()?,
            }),
            CmdCode::BufferMove => {
                let axes = AxisMask::from_bits_retain(b.get_u8()?);
                let modal = AxisMask::from_bits_retain(b.get_u8()?);
                let positions = get_positions(&mut b)?;
                Self::BufferMove(BufferedMove {
                    axes,
                    modal,
                    positions,
                    seg_num: b.get_i32()?,
                })
            }
            CmdCode::BufferVel | CmdCode::BufferAcc => {
                let axes = AxisMask::from_bits_retain(b.get_u8()?);
                let mut values = [0.0; AXIS_MAX];
                for v in values.iter_mut() {
                    *v = b.get_f32()? as f64;
                }
                let rate = BufferedRate {
                    axes,
                    values,
                    seg_num: b.get_i32()?,
                };
                if code == CmdCode::BufferVel {
                    Self::BufferVel(rate)
                } else {
                    Self::BufferAcc(rate)
                }
            }
            CmdCode::BufferGear => {
                let axes = AxisMask::from_bits_retain(b.get_u8()?);
                let positions = get_positions(&mut b)?;
                Self::BufferGear(BufferedGear {
                    axes,
                    positions,
                    seg_num: b.get_i32()?,
                })
            }
        };

        if !b.is_exhausted() {
            return Err(WireError::LengthMismatch {
                declared: len,
                actual: len - b.remaining(),
            });
        }
        Ok(Record {
            segment,
            exit_speed,
        })
    }
}

/// Shared arc body up to, not including, the trailing fields.
fn put_arc<const N: usize>(
    w: &mut WireWriter<N>,
    a: &ArcMove,
    exit_speed: f64,
) -> Result<(), WireError> {
    w.put_f32(a.syn_vel as f32)?;
    w.put_f32(a.syn_acc as f32)?;
    w.put_f32(exit_speed as f32)?;
    w.put_u8(a.plane as u8)?;
    w.put_u8(a.precise_stop as u8)?;
    for v in a.end.iter().chain(a.center.iter()) {
        w.put_i32(*v)?;
    }
    Ok(())
}

/// Inverse of [`put_arc`]; the transmitted exit speed lands in `vel_end`
/// and `seg_num` is left for the caller.
fn get_arc(b: &mut WireReader<'_>) -> Result<ArcMove, WireError> {
    let syn_vel = b.get_f32()? as f64;
    let syn_acc = b.get_f32()? as f64;
    let vel_end = b.get_f32()? as f64;
    let plane =
        ArcPlane::from_u8(b.get_u8()?).ok_or(WireError::InvalidField("arc plane"))?;
    let precise_stop = b.get_u8()? != 0;
    let end = [b.get_i32()?, b.get_i32()?];
    let center = [b.get_i32()?, b.get_i32()?];
    Ok(ArcMove {
        plane,
        end,
        center,
        syn_vel,
        syn_acc,
        vel_end,
        precise_stop,
        seg_num: 0,
    })
}

fn put_targets<const N: usize>(w: &mut WireWriter<N>, targets: &Targets) -> Result<(), WireError> {
    w.put_u8(targets.len() as u8)?;
    for &t in targets {
        w.put_i32(t)?;
    }
    Ok(())
}

fn get_targets(r: &mut WireReader<'_>) -> Result<Targets, WireError> {
    let dim = r.get_u8()? as usize;
    if dim == 0 || dim > AXIS_MAX {
        return Err(WireError::InvalidField("move dimension"));
    }
    let mut targets = Targets::new();
    for _ in 0..dim {
        targets
            .push(r.get_i32()?)
            .map_err(|_| WireError::InvalidField("move dimension"))?;
    }
    Ok(targets)
}

fn get_positions(r: &mut WireReader<'_>) -> Result<[i32; AXIS_MAX], WireError> {
    let mut out = [0; AXIS_MAX];
    for p in out.iter_mut() {
        *p = r.get_i32()?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(targets: &[i32], vel: f64, acc: f64) -> Segment {
        Segment::Line(LinearMove {
            targets: Targets::from_slice(targets).unwrap(),
            syn_vel: vel,
            syn_acc: acc,
            vel_end: 0.0,
            precise_stop: false,
            seg_num: 7,
        })
    }

    fn arc(end: [i32; 2], center: [i32; 2]) -> ArcMove {
        ArcMove {
            plane: ArcPlane::Xy,
            end,
            center,
            syn_vel: 10.0,
            syn_acc: 1.0,
            vel_end: 0.0,
            precise_stop: false,
            seg_num: 0,
        }
    }

    #[test]
    fn dimension_bounds() {
        assert!(line(&[1, 2, 3], 1.0, 1.0).validate(3).is_ok());
        assert_eq!(
            line(&[1, 2, 3], 1.0, 1.0).validate(2),
            Err(SegmentError::Dimension { dim: 3, max: 2 })
        );
        assert!(matches!(
            line(&[], 1.0, 1.0).validate(2),
            Err(SegmentError::Dimension { dim: 0, .. })
        ));
    }

    #[test]
    fn interpolation_range_is_inclusive() {
        assert!(line(&[8_388_608, -8_388_608], 1.0, 1.0).validate(2).is_ok());
        assert!(matches!(
            line(&[8_388_609], 1.0, 1.0).validate(1),
            Err(SegmentError::OutOfRange { axis: 0, .. })
        ));
    }

    #[test]
    fn kinematics_must_be_positive_and_finite() {
        assert!(matches!(
            line(&[1], 0.0, 1.0).validate(1),
            Err(SegmentError::NotPositive { field: "syn_vel", .. })
        ));
        assert!(matches!(
            line(&[1], 1.0, f64::NAN).validate(1),
            Err(SegmentError::NotPositive { field: "syn_acc", .. })
        ));
        let mut seg = line(&[1], 1.0, 1.0);
        if let Segment::Line(m) = &mut seg {
            m.vel_end = -1.0;
        }
        assert_eq!(seg.validate(1), Err(SegmentError::EndVelocity(-1.0)));
    }

    #[test]
    fn arc_checks_plane_and_radius() {
        assert!(Segment::ArcCw(arc([10, 0], [5, 0])).validate(2).is_ok());
        assert_eq!(
            Segment::ArcCw(arc([10, 0], [0, 0])).validate(2),
            Err(SegmentError::ZeroRadius)
        );
        let mut yz = arc([10, 0], [5, 0]);
        yz.plane = ArcPlane::Yz;
        assert_eq!(
            Segment::ArcCcw(yz).validate(2),
            Err(SegmentError::PlaneOutOfRange {
                plane: ArcPlane::Yz,
                needed: 3
            })
        );
    }

    #[test]
    fn helix_needs_all_three_axes() {
        let helix = HelixMove {
            arc: arc([10, 0], [5, 0]),
            lead: 500,
        };
        assert!(Segment::HelixCcw(helix.clone()).validate(3).is_ok());
        assert_eq!(
            Segment::HelixCcw(helix.clone()).validate(2),
            Err(SegmentError::PlaneOutOfRange {
                plane: ArcPlane::Xy,
                needed: 3
            })
        );
        let far = HelixMove {
            lead: 8_388_609,
            ..helix
        };
        assert!(matches!(
            Segment::HelixCw(far).validate(3),
            Err(SegmentError::OutOfRange { axis: 2, .. })
        ));
        assert_eq!(ArcPlane::Xz.normal(), 1);
        assert_eq!(ArcPlane::Yz.normal(), 0);
    }

    #[test]
    fn buffered_move_masks() {
        let mut m = BufferedMove {
            axes: AxisMask::AXIS_1,
            modal: AxisMask::AXIS_2,
            positions: [0; AXIS_MAX],
            seg_num: 0,
        };
        assert!(matches!(
            Segment::BufferMove(m.clone()).validate(1),
            Err(SegmentError::ModalOutsideMask { .. })
        ));
        m.modal = AxisMask::AXIS_1;
        m.positions[0] = 268_435_455;
        assert!(Segment::BufferMove(m.clone()).validate(1).is_ok());
        // Unmasked axes are not range-checked.
        m.positions[3] = i32::MAX;
        assert!(Segment::BufferMove(m.clone()).validate(1).is_ok());
        m.positions[0] = 268_435_456;
        assert!(matches!(
            Segment::BufferMove(m).validate(1),
            Err(SegmentError::OutOfRange { axis: 0, .. })
        ));
    }

    #[test]
    fn barrier_classification() {
        assert!(Segment::Dwell(Dwell { delay_ms: 5, seg_num: 0 }).is_barrier());
        let non_blocking = Segment::BufferMove(BufferedMove {
            axes: AxisMask::AXIS_4,
            modal: AxisMask::empty(),
            positions: [0; AXIS_MAX],
            seg_num: 0,
        });
        assert!(!non_blocking.is_barrier());
        assert!(!line(&[1], 1.0, 1.0).is_barrier());
    }

    #[test]
    fn quarter_circle_from_radius() {
        // (1000, 0) -> (0, 1000) counter-clockwise around the origin.
        let c = ArcMove::center_from_radius([1000, 0], [0, 1000], 1000.0, ArcDirection::Ccw)
            .unwrap();
        assert_eq!(c, [-1000, 0]);
        // Same chord clockwise, minor arc: centre mirrored across the chord.
        let c = ArcMove::center_from_radius([1000, 0], [0, 1000], 1000.0, ArcDirection::Cw)
            .unwrap();
        assert_eq!(c, [0, 1000]);
        // Negative radius flips to the major arc.
        let c = ArcMove::center_from_radius([1000, 0], [0, 1000], -1000.0, ArcDirection::Ccw)
            .unwrap();
        assert_eq!(c, [0, 1000]);
    }

    #[test]
    fn radius_form_rejects_unreachable_and_full_circle() {
        assert!(matches!(
            ArcMove::center_from_radius([0, 0], [100, 0], 10.0, ArcDirection::Cw),
            Err(SegmentError::RadiusTooSmall { .. })
        ));
        assert_eq!(
            ArcMove::center_from_radius([5, 5], [5, 5], 10.0, ArcDirection::Cw),
            Err(SegmentError::FullCircleRadius)
        );
    }

    #[test]
    fn arc_from_radius_picks_variant() {
        let seg = Segment::arc_from_radius(ArcDirection::Cw, [0, 0], 50.0, arc([100, 0], [0, 0]))
            .unwrap();
        match seg {
            Segment::ArcCw(a) => assert_eq!(a.center, [50, 0]),
            other => panic!("unexpected {other:?}"),
        }
        let helix = HelixMove {
            arc: arc([100, 0], [0, 0]),
            lead: 30,
        };
        let seg = Segment::helix_from_radius(ArcDirection::Ccw, [0, 0], 50.0, helix).unwrap();
        match seg {
            Segment::HelixCcw(h) => assert_eq!((h.arc.center, h.lead), ([50, 0], 30)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn record_carries_planned_exit_speed() {
        let seg = line(&[100, -200], 12.5, 3.0);
        let mut w = WireWriter::<128>::new();
        seg.encode_record(4.25, &mut w).unwrap();
        assert_eq!(w.as_slice()[0], CmdCode::Line as u8);
        assert_eq!(w.as_slice()[1] as usize, w.len() - 2);

        let rec = Segment::decode_record(&mut WireReader::new(w.as_slice())).unwrap();
        assert_eq!(rec.exit_speed, 4.25);
        match rec.segment {
            Segment::Line(m) => {
                assert_eq!(m.targets.as_slice(), &[100, -200]);
                assert_eq!(m.seg_num, 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn helix_record_keeps_lead_and_plane() {
        let mut a = arc([0, 1000], [-1000, 0]);
        a.plane = ArcPlane::Yz;
        a.seg_num = 42;
        let seg = Segment::HelixCw(HelixMove { arc: a, lead: -250 });
        let mut w = WireWriter::<128>::new();
        seg.encode_record(7.5, &mut w).unwrap();
        assert_eq!(w.as_slice()[0], CmdCode::HelixCw as u8);

        let rec = Segment::decode_record(&mut WireReader::new(w.as_slice())).unwrap();
        assert_eq!(rec.exit_speed, 7.5);
        match rec.segment {
            Segment::HelixCw(h) => {
                assert_eq!(h.lead, -250);
                assert_eq!(h.arc.plane, ArcPlane::Yz);
                assert_eq!(h.arc.center, [-1000, 0]);
                assert_eq!(h.arc.seg_num, 42);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn record_overflow_leaves_writer_untouched() {
        let seg = line(&[1, 2, 3, 4, 5, 6, 7, 8], 1.0, 1.0);
        let mut w = WireWriter::<20>::new();
        assert!(seg.encode_record(0.0, &mut w).is_err());
        assert!(w.is_empty());
    }

    #[test]
    fn unknown_command_rejected() {
        let bytes = [99u8, 0];
        assert_eq!(
            Segment::decode_record(&mut WireReader::new(&bytes)),
            Err(WireError::UnknownCommand(99))
        );
    }

    #[test]
    fn program_line_from_toml() {
        #[derive(Deserialize)]
        struct Program {
            segment: std::vec::Vec<Segment>,
        }
        let text = r#"
            [[segment]]
            cmd = "line"
            targets = [1000, 0]
            syn_vel = 100.0
            syn_acc = 50.0

            [[segment]]
            cmd = "dwell"
            delay_ms = 20

            [[segment]]
            cmd = "buffer_move"
            axes = "AXIS_3"
            positions = [0, 0, 500, 0, 0, 0, 0, 0]
        "#;
        let p: Program = toml::from_str(text).unwrap();
        assert_eq!(p.segment.len(), 3);
        assert_eq!(p.segment[0].code(), CmdCode::Line);
        assert!(p.segment[1].is_barrier());
        assert!(!p.segment[2].is_barrier());
    }
}
