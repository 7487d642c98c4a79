//! Planner micro-benchmark.
//!
//! Measures the cost of keeping a full look-ahead window planned:
//! - steady state: retire the oldest entry, admit one segment, replan
//! - finalize: plan the whole window with no successor

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use crd::consts::AXIS_MAX;
use crd::crd::segment::{LinearMove, Targets};
use crd::crd::{AxisLimits, CrdPrm, LookAheadPrm, OriginPolicy, Segment};
use crd_lookahead::planner::{CancelToken, JunctionPlanner, PlanMode};
use crd_lookahead::ring::{AxisFrame, LookAheadRing};

fn reference_crd() -> CrdPrm {
    let mut profile = [0u8; AXIS_MAX];
    profile[0] = 1;
    profile[1] = 2;
    CrdPrm {
        dimension: 2,
        profile,
        syn_vel_max: 500.0,
        syn_acc_max: 1000.0,
        even_time_ms: 0,
        origin: OriginPolicy::CurrentPosition,
    }
}

fn reference_la(depth: u16) -> LookAheadPrm {
    let mut axes = heapless::Vec::new();
    for _ in 0..2 {
        let _ = axes.push(AxisLimits {
            speed_max: 100.0,
            acc_max: 1.0e4,
            max_step_speed: 2.0,
            scale: 1.0,
        });
    }
    LookAheadPrm { depth, axes }
}

/// Zig-zag along x: every junction is a real corner.
fn zigzag(k: usize) -> Segment {
    let x = (k as i32 + 1) * 100;
    let y = if k % 2 == 0 { 50 } else { 0 };
    Segment::Line(LinearMove {
        targets: Targets::from_slice(&[x, y]).unwrap_or_default(),
        syn_vel: 80.0,
        syn_acc: 5.0,
        vel_end: 0.0,
        precise_stop: false,
        seg_num: k as i32,
    })
}

struct Window {
    ring: LookAheadRing,
    frame: AxisFrame,
    planner: JunctionPlanner,
    cancel: CancelToken,
    next: usize,
}

impl Window {
    fn full(depth: u16) -> Self {
        let crd = reference_crd();
        let la = reference_la(depth);
        let mut w = Self {
            ring: LookAheadRing::new(depth as usize),
            frame: AxisFrame::new(&crd, &la),
            planner: JunctionPlanner::new(&crd, &la),
            cancel: CancelToken::new(),
            next: 0,
        };
        while !w.ring.is_full() {
            w.admit();
        }
        w
    }

    fn admit(&mut self) {
        self.ring.enqueue(zigzag(self.next), &self.frame);
        self.next += 1;
        self.planner.admit_tail(&mut self.ring, 1.0);
        let _ = self
            .planner
            .plan(&mut self.ring, PlanMode::Provisional, &self.cancel.ticket());
    }
}

fn bench_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner_steady_state");
    group.sample_size(200);

    for &depth in &[16u16, 64, 200] {
        let mut w = Window::full(depth);
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &_d| {
            b.iter(|| {
                w.ring.pop_oldest();
                w.admit();
            });
        });
    }

    group.finish();
}

fn bench_finalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner_finalize");

    for &depth in &[16u16, 64, 200] {
        let w = Window::full(depth);
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &_d| {
            b.iter_batched_ref(
                || w.ring.clone(),
                |ring| {
                    let _ = w.planner.plan(ring, PlanMode::Finalize, &w.cancel.ticket());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_steady_state, bench_finalize);
criterion_main!(benches);
