//! Shared fixtures for the integration scenarios.

mod concurrency;
mod properties;
mod scenarios;
mod transport;

use crd::crd::segment::{Dwell, LinearMove, Targets};
use crd::prelude::*;
use crd_lookahead::{Admission, Controller, ControllerConfig, LookAheadError, SimulatedCard};

pub fn crd_prm(dim: u8) -> CrdPrm {
    let mut profile = [0u8; AXIS_MAX];
    for (k, p) in profile.iter_mut().take(dim as usize).enumerate() {
        *p = k as u8 + 1;
    }
    CrdPrm {
        dimension: dim,
        profile,
        syn_vel_max: 500.0,
        syn_acc_max: 1000.0,
        even_time_ms: 0,
        origin: OriginPolicy::CurrentPosition,
    }
}

/// Axis speed 100 pulse/ms, step speed 2, unit scale.
pub fn la_prm(depth: u16, dim: u8) -> LookAheadPrm {
    let mut axes = heapless::Vec::new();
    for _ in 0..dim {
        axes.push(AxisLimits {
            speed_max: 100.0,
            acc_max: 1.0e5,
            max_step_speed: 2.0,
            scale: 1.0,
        })
        .unwrap();
    }
    LookAheadPrm { depth, axes }
}

pub fn line(targets: &[i32], syn_vel: f64, syn_acc: f64) -> Segment {
    line_ending(targets, syn_vel, syn_acc, 0.0)
}

pub fn line_ending(targets: &[i32], syn_vel: f64, syn_acc: f64, vel_end: f64) -> Segment {
    Segment::Line(LinearMove {
        targets: Targets::from_slice(targets).unwrap(),
        syn_vel,
        syn_acc,
        vel_end,
        precise_stop: false,
        seg_num: 0,
    })
}

pub fn numbered(segment: Segment, n: i32) -> Segment {
    match segment {
        Segment::Line(mut m) => {
            m.seg_num = n;
            Segment::Line(m)
        }
        Segment::Dwell(mut d) => {
            d.seg_num = n;
            Segment::Dwell(d)
        }
        other => other,
    }
}

pub fn dwell(delay_ms: u32) -> Segment {
    Segment::Dwell(Dwell {
        delay_ms,
        seg_num: 0,
    })
}

/// Controller with both FIFOs of coordinate system 0 configured.
pub fn controller(dim: u8, depth: u16, config: ControllerConfig) -> Controller<SimulatedCard> {
    let ctl = Controller::new(SimulatedCard::new(config.card_id), config);
    ctl.set_look_ahead_config(0, 0, la_prm(depth, dim)).unwrap();
    ctl.set_look_ahead_config(0, 1, la_prm(depth, dim)).unwrap();
    ctl.set_coordinate_system_context(0, crd_prm(dim)).unwrap();
    ctl
}

/// Enqueue, retrying after forced drains.
pub fn push(
    ctl: &Controller<SimulatedCard>,
    fifo: usize,
    segment: &Segment,
) -> Result<u64, LookAheadError> {
    loop {
        match ctl.enqueue_segment(0, fifo, segment)? {
            Admission::Accepted { seq } => return Ok(seq),
            Admission::BufferFull => continue,
        }
    }
}
