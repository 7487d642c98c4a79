//! Coordinate-system context and look-ahead configuration.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::consts::{AXIS_MAX, LOOKAHEAD_CAPACITY};
use crate::wire::{WireError, WireReader, WireWriter};

/// Encoded size of a `CrdPrm` frame payload [bytes].
pub const CRD_PRM_LEN: usize = 1 + AXIS_MAX + 8 + 8 + 2 + 1 + 4 * AXIS_MAX;

// ─── Coordinate System Context ──────────────────────────────────────

/// Where coordinate-system zero sits when the context is established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginPolicy {
    /// The current planned position becomes the origin.
    #[default]
    CurrentPosition,
    /// Explicit machine-coordinate origin per coordinate-system axis [pulse].
    User([i32; AXIS_MAX]),
}

/// Coordinate-system parameters. Immutable while a program runs.
///
/// # TOML Example
///
/// ```toml
/// [crd.prm]
/// dimension = 3
/// profile = [1, 2, 3, 0, 0, 0, 0, 0]
/// syn_vel_max = 500.0
/// syn_acc_max = 20.0
/// even_time_ms = 5
/// origin = "current_position"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdPrm {
    /// Number of coordinate-system axes.
    pub dimension: u8,
    /// 1-based profile number of each coordinate-system axis.
    pub profile: [u8; AXIS_MAX],
    /// Synthesized velocity ceiling [unit/ms].
    pub syn_vel_max: f64,
    /// Synthesized acceleration ceiling [unit/ms²].
    pub syn_acc_max: f64,
    /// Minimum constant-velocity time per segment [ms].
    #[serde(default)]
    pub even_time_ms: u16,
    #[serde(default)]
    pub origin: OriginPolicy,
}

impl CrdPrm {
    pub const MAX_SYN_VEL: f64 = 1.0e6;
    pub const MAX_SYN_ACC: f64 = 1.0e6;
    pub const MAX_EVEN_TIME_MS: u16 = 1000;

    /// Validate dimension, profile mapping and ceilings.
    pub fn validate(&self) -> Result<(), String> {
        let dim = self.dimension as usize;
        if dim == 0 || dim > AXIS_MAX {
            return Err(format!("dimension {dim} outside 1..={AXIS_MAX}"));
        }
        let mut seen = 0u8;
        for (k, &p) in self.profile[..dim].iter().enumerate() {
            if p == 0 || p as usize > AXIS_MAX {
                return Err(format!("axis {k} maps to invalid profile {p}"));
            }
            let bit = 1u8 << (p - 1);
            if seen & bit != 0 {
                return Err(format!("profile {p} mapped twice"));
            }
            seen |= bit;
        }
        if !(self.syn_vel_max > 0.0 && self.syn_vel_max <= Self::MAX_SYN_VEL) {
            return Err(format!(
                "syn_vel_max {} outside (0, {}]",
                self.syn_vel_max,
                Self::MAX_SYN_VEL
            ));
        }
        if !(self.syn_acc_max > 0.0 && self.syn_acc_max <= Self::MAX_SYN_ACC) {
            return Err(format!(
                "syn_acc_max {} outside (0, {}]",
                self.syn_acc_max,
                Self::MAX_SYN_ACC
            ));
        }
        if self.even_time_ms > Self::MAX_EVEN_TIME_MS {
            return Err(format!(
                "even_time_ms {} exceeds {}",
                self.even_time_ms,
                Self::MAX_EVEN_TIME_MS
            ));
        }
        Ok(())
    }

    /// Zero-based profile index of coordinate-system axis `axis`.
    #[inline]
    pub fn profile_index(&self, axis: usize) -> Option<usize> {
        if axis >= self.dimension as usize {
            return None;
        }
        match self.profile.get(axis) {
            Some(&p) if p > 0 => Some(p as usize - 1),
            _ => None,
        }
    }

    /// Axis participation mask (bit = zero-based profile index).
    pub fn axis_mask(&self) -> u32 {
        (0..self.dimension as usize)
            .filter_map(|k| self.profile_index(k))
            .fold(0, |m, p| m | (1u32 << p))
    }

    pub fn encode<const N: usize>(&self, w: &mut WireWriter<N>) -> Result<(), WireError> {
        w.put_u8(self.dimension)?;
        w.put_bytes(&self.profile)?;
        w.put_f64(self.syn_vel_max)?;
        w.put_f64(self.syn_acc_max)?;
        w.put_u16(self.even_time_ms)?;
        let (flag, origin) = match self.origin {
            OriginPolicy::CurrentPosition => (0u8, [0; AXIS_MAX]),
            OriginPolicy::User(o) => (1u8, o),
        };
        w.put_u8(flag)?;
        for v in origin {
            w.put_i32(v)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let dimension = r.get_u8()?;
        let mut profile = [0u8; AXIS_MAX];
        profile.copy_from_slice(r.take(AXIS_MAX)?);
        let syn_vel_max = r.get_f64()?;
        let syn_acc_max = r.get_f64()?;
        let even_time_ms = r.get_u16()?;
        let flag = r.get_u8()?;
        let mut origin = [0i32; AXIS_MAX];
        for v in origin.iter_mut() {
            *v = r.get_i32()?;
        }
        let origin = match flag {
            0 => OriginPolicy::CurrentPosition,
            1 => OriginPolicy::User(origin),
            _ => return Err(WireError::InvalidField("origin policy")),
        };
        Ok(Self {
            dimension,
            profile,
            syn_vel_max,
            syn_acc_max,
            even_time_ms,
            origin,
        })
    }
}

// ─── Look-Ahead Configuration ───────────────────────────────────────

/// Per-axis ceilings used by the junction planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Maximum axis speed [pulse/ms].
    pub speed_max: f64,
    /// Maximum axis acceleration [pulse/ms²].
    pub acc_max: f64,
    /// Largest speed jump the axis tolerates at a reversal [pulse/ms].
    pub max_step_speed: f64,
    /// Pulses per physical unit.
    pub scale: f64,
}

impl AxisLimits {
    fn validate(&self, axis: usize) -> Result<(), String> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(format!("axis {axis}: {name} must be finite and positive, got {v}"))
            }
        };
        positive("speed_max", self.speed_max)?;
        positive("acc_max", self.acc_max)?;
        positive("scale", self.scale)?;
        if !(self.max_step_speed >= 0.0 && self.max_step_speed <= self.speed_max) {
            return Err(format!(
                "axis {axis}: max_step_speed {} outside [0, speed_max]",
                self.max_step_speed
            ));
        }
        Ok(())
    }
}

/// Look-ahead window and axis ceilings for one (coordinate system, FIFO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookAheadPrm {
    /// Window depth in segments.
    pub depth: u16,
    /// Ceilings indexed by coordinate-system axis.
    pub axes: Vec<AxisLimits, AXIS_MAX>,
}

impl LookAheadPrm {
    pub const MIN_DEPTH: u16 = 1;
    pub const MAX_DEPTH: u16 = LOOKAHEAD_CAPACITY as u16;

    pub fn validate(&self) -> Result<(), String> {
        if !(Self::MIN_DEPTH..=Self::MAX_DEPTH).contains(&self.depth) {
            return Err(format!(
                "depth {} outside {}..={}",
                self.depth,
                Self::MIN_DEPTH,
                Self::MAX_DEPTH
            ));
        }
        if self.axes.is_empty() {
            return Err("no axis limits configured".to_string());
        }
        for (k, a) in self.axes.iter().enumerate() {
            a.validate(k)?;
        }
        Ok(())
    }

    /// Check that every axis of a coordinate system has limits.
    pub fn covers(&self, dimension: u8) -> Result<(), String> {
        if self.axes.len() < dimension as usize {
            return Err(format!(
                "{} axis limits configured, coordinate system has {dimension} axes",
                self.axes.len()
            ));
        }
        Ok(())
    }
}
