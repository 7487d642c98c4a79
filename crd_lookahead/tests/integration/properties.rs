//! Randomised programs: whatever the window depth and drain cadence, the
//! planned exit speeds stay within every ceiling while resident, and the
//! transmitted ones are reachable from one segment to the next.

use proptest::prelude::*;

use super::{controller, line, push};
use crd_lookahead::ControllerConfig;

/// (dx, dy, flip dx, syn_vel, syn_acc)
type Step = (i32, i32, bool, f64, f64);

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        (1i32..2000, -2000i32..2000, any::<bool>(), 1.0f64..200.0, 1.0f64..100.0),
        1..40,
    )
}

fn close_enough(lhs: f64, rhs: f64) -> bool {
    lhs <= rhs + 1e-4 * (1.0 + rhs.abs())
}

/// Speed ceiling of a straight move: requested speed, the coordinate
/// system's 500 and each axis' 100 over its share of the direction.
fn line_ceiling(dx: i32, dy: i32, syn_vel: f64) -> f64 {
    let len = f64::from(dx).hypot(f64::from(dy));
    [dx, dy]
        .iter()
        .filter(|d| **d != 0)
        .map(|d| 100.0 * len / f64::from(d.abs()))
        .fold(syn_vel.min(500.0), f64::min)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn exit_speeds_are_bounded_and_reachable(
        program in steps(),
        depth in 1u16..30,
        high_water in prop::option::of(1usize..30),
    ) {
        let ctl = controller(2, depth, ControllerConfig {
            high_water,
            ..ControllerConfig::default()
        });

        let (mut x, mut y) = (0i32, 0i32);
        let mut lengths = Vec::new();
        let mut ceilings: Vec<(u64, f64)> = Vec::new();
        for &(dx, dy, flip, vel, acc) in &program {
            let dx = if flip { -dx } else { dx };
            x += dx;
            y += dy;
            lengths.push(f64::from(dx).hypot(f64::from(dy)));
            let pushed = push(&ctl, 0, &line(&[x, y], vel, acc));
            prop_assert!(pushed.is_ok());
            ceilings.push((pushed.unwrap(), line_ceiling(dx, dy, vel)));

            for (seq, exit) in ctl.planned_exits(0, 0).unwrap() {
                let cap = ceilings.iter().find(|(s, _)| *s == seq).map(|(_, c)| *c);
                prop_assert!(cap.is_some(), "resident {} was never pushed", seq);
                let cap = cap.unwrap();
                prop_assert!(close_enough(exit, cap), "resident {} plans {} over {}", seq, exit, cap);
            }
        }
        prop_assert!(ctl.flush_to_end_of_program(0, 0).is_ok());

        let exits: Vec<f64> = ctl.with_link(|card| {
            card.received(0, 0).iter().map(|r| r.exit_speed).collect()
        });
        prop_assert_eq!(exits.len(), program.len());
        prop_assert_eq!(*exits.last().unwrap_or(&-1.0), 0.0);

        let mut prev = 0.0f64;
        for (k, &v) in exits.iter().enumerate() {
            let (_, _, _, vel, acc) = program[k];
            prop_assert!(v.is_finite() && v >= 0.0, "segment {} exit {}", k, v);
            prop_assert!(close_enough(v, vel), "segment {} exit {} over {}", k, v, vel);
            if let Some(next) = program.get(k + 1) {
                prop_assert!(close_enough(v, next.3), "segment {} exit {} over next {}", k, v, next.3);
            }
            let span = 2.0 * acc * lengths[k];
            prop_assert!(close_enough(v * v, prev * prev + span), "segment {} accelerates too hard", k);
            prop_assert!(close_enough(prev * prev, v * v + span), "segment {} brakes too hard", k);
            prev = v;
        }
    }
}
