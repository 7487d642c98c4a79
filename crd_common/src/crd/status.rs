//! System status snapshot returned by the card.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::consts::{AXIS_MAX, CRDSYS_MAX, CRD_POS_COUNT, ENCODER_COUNT};
use crate::wire::{WireError, WireReader, WireWriter};

bitflags! {
    /// Per-axis status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AxisStatus: u32 {
        const ESTOP          = 0x0000_0001;
        /// Servo drive alarm.
        const SV_ALARM       = 0x0000_0002;
        const POS_SOFT_LIMIT = 0x0000_0004;
        const NEG_SOFT_LIMIT = 0x0000_0008;
        /// Following error above the configured band.
        const FOLLOW_ERR     = 0x0000_0010;
        const POS_HARD_LIMIT = 0x0000_0020;
        const NEG_HARD_LIMIT = 0x0000_0040;
        /// Smooth stop triggered by input.
        const IO_SMS_STOP    = 0x0000_0080;
        /// Emergency stop triggered by input.
        const IO_EMG_STOP    = 0x0000_0100;
        const ENABLE         = 0x0000_0200;
        /// Profile generator is moving.
        const RUNNING        = 0x0000_0400;
        /// Motor settled within the arrival band.
        const ARRIVE         = 0x0000_0800;
        const HOME_RUNNING   = 0x0000_1000;
        const HOME_SUCCESS   = 0x0000_2000;
        const HOME_SWITCH    = 0x0000_4000;
        const INDEX          = 0x0000_8000;
        const GEAR_START     = 0x0001_0000;
        const GEAR_FINISH    = 0x0002_0000;
    }
}

impl Default for AxisStatus {
    fn default() -> Self {
        Self::empty()
    }
}

impl AxisStatus {
    /// Any stop or alarm condition that halts interpolation.
    pub const FAULT_MASK: Self = Self::ESTOP
        .union(Self::SV_ALARM)
        .union(Self::FOLLOW_ERR)
        .union(Self::POS_HARD_LIMIT)
        .union(Self::NEG_HARD_LIMIT)
        .union(Self::IO_EMG_STOP);

    #[inline]
    pub const fn is_faulted(self) -> bool {
        self.intersects(Self::FAULT_MASK)
    }
}

bitflags! {
    /// Coordinate-system run state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CrdStatus: u16 {
        const PROG_RUN      = 0x0001;
        /// Smooth stop in progress.
        const PROG_STOP     = 0x0002;
        const PROG_ESTOP    = 0x0004;
        /// Card FIFO 0 executed to completion.
        const FIFO_FINISH_0 = 0x0010;
        const FIFO_FINISH_1 = 0x0020;
    }
}

impl Default for CrdStatus {
    fn default() -> Self {
        Self::empty()
    }
}

impl CrdStatus {
    /// Finish flag of card FIFO `fifo`.
    #[inline]
    pub const fn fifo_finish(fifo: usize) -> Self {
        if fifo == 0 {
            Self::FIFO_FINISH_0
        } else {
            Self::FIFO_FINISH_1
        }
    }
}

/// Encoded size of [`AllSysStatus`] [bytes].
pub const ALL_SYS_STATUS_LEN: usize = ENCODER_COUNT * 8
    + AXIS_MAX * 8
    + AXIS_MAX * 4
    + 2 * 2
    + CRDSYS_MAX * 4
    + CRDSYS_MAX * 4
    + CRDSYS_MAX * 2
    + CRDSYS_MAX * 4
    + CRDSYS_MAX * 8
    + CRDSYS_MAX * CRD_POS_COUNT * 8
    + 5 * 4
    + 4 * 4;

/// Full card status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllSysStatus {
    /// Encoder positions (axes + handwheel) [pulse].
    pub enc_pos: [f64; ENCODER_COUNT],
    /// Planned (profile) positions [pulse].
    pub prf_pos: [f64; AXIS_MAX],
    pub axis_status: [AxisStatus; AXIS_MAX],
    pub adc: [i16; 2],
    /// Last executed user segment number per coordinate system.
    pub user_seg_num: [i32; CRDSYS_MAX],
    /// Records still queued on the card per coordinate system.
    pub remainder_seg_num: [i32; CRDSYS_MAX],
    pub crd_status: [CrdStatus; CRDSYS_MAX],
    /// Free card FIFO space per coordinate system [records].
    pub crd_space: [i32; CRDSYS_MAX],
    /// Synthesized velocity per coordinate system [unit/ms].
    pub crd_vel: [f64; CRDSYS_MAX],
    pub crd_pos: [[f64; CRD_POS_COUNT]; CRDSYS_MAX],
    pub limit_pos: i32,
    pub limit_neg: i32,
    pub alarm: i32,
    pub home: i32,
    pub mpg: i32,
    pub gpi: [i32; 4],
}

impl AllSysStatus {
    pub fn encode<const N: usize>(&self, w: &mut WireWriter<N>) -> Result<(), WireError> {
        for &v in &self.enc_pos {
            w.put_f64(v)?;
        }
        for &v in &self.prf_pos {
            w.put_f64(v)?;
        }
        for s in &self.axis_status {
            w.put_u32(s.bits())?;
        }
        for &v in &self.adc {
            w.put_i16(v)?;
        }
        for &v in self.user_seg_num.iter().chain(&self.remainder_seg_num) {
            w.put_i32(v)?;
        }
        for s in &self.crd_status {
            w.put_u16(s.bits())?;
        }
        for &v in &self.crd_space {
            w.put_i32(v)?;
        }
        for &v in &self.crd_vel {
            w.put_f64(v)?;
        }
        for &v in self.crd_pos.iter().flatten() {
            w.put_f64(v)?;
        }
        for v in [self.limit_pos, self.limit_neg, self.alarm, self.home, self.mpg] {
            w.put_i32(v)?;
        }
        for &v in &self.gpi {
            w.put_i32(v)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let mut s = Self::default();
        for v in s.enc_pos.iter_mut().chain(s.prf_pos.iter_mut()) {
            *v = r.get_f64()?;
        }
        for a in s.axis_status.iter_mut() {
            *a = AxisStatus::from_bits_retain(r.get_u32()?);
        }
        for v in s.adc.iter_mut() {
            *v = r.get_i16()?;
        }
        for v in s.user_seg_num.iter_mut().chain(s.remainder_seg_num.iter_mut()) {
            *v = r.get_i32()?;
        }
        for c in s.crd_status.iter_mut() {
            *c = CrdStatus::from_bits_retain(r.get_u16()?);
        }
        for v in s.crd_space.iter_mut() {
            *v = r.get_i32()?;
        }
        for v in s.crd_vel.iter_mut() {
            *v = r.get_f64()?;
        }
        for v in s.crd_pos.iter_mut().flatten() {
            *v = r.get_f64()?;
        }
        s.limit_pos = r.get_i32()?;
        s.limit_neg = r.get_i32()?;
        s.alarm = r.get_i32()?;
        s.home = r.get_i32()?;
        s.mpg = r.get_i32()?;
        for v in s.gpi.iter_mut() {
            *v = r.get_i32()?;
        }
        Ok(s)
    }
}
