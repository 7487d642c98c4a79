//! Both FIFOs of a coordinate system driven from separate threads.

use std::thread;

use super::{controller, line, numbered, push};
use crd_lookahead::{ControllerConfig, LookAheadError};

#[test]
fn fifos_feed_independently() {
    let ctl = controller(
        2,
        16,
        ControllerConfig {
            high_water: Some(8),
            ..ControllerConfig::default()
        },
    );

    thread::scope(|s| {
        for fifo in 0..2 {
            let ctl = &ctl;
            s.spawn(move || {
                for k in 1..=50 {
                    let x = k * 100;
                    let y = if fifo == 0 { 0 } else { x };
                    push(ctl, fifo, &numbered(line(&[x, y], 100.0, 50.0), k)).unwrap();
                }
                ctl.flush_to_end_of_program(0, fifo).unwrap();
            });
        }
    });

    for fifo in 0..2 {
        assert_eq!(ctl.resident_segment_count(0, fifo).unwrap(), 0);
        let on_card: Vec<i32> = ctl.with_link(|card| {
            card.received(0, fifo)
                .iter()
                .map(|r| r.segment.seg_num())
                .collect()
        });
        assert_eq!(on_card, (1..=50).collect::<Vec<_>>(), "fifo {fifo}");
    }
    ctl.with_link(|card| assert_eq!(card.duplicates(), 0));
}

#[test]
fn clear_races_enqueue_without_corrupting_the_window() {
    let ctl = controller(
        1,
        12,
        ControllerConfig {
            high_water: Some(6),
            ..ControllerConfig::default()
        },
    );

    thread::scope(|s| {
        s.spawn(|| {
            for k in 1..=200 {
                match push(&ctl, 0, &line(&[k * 10], 100.0, 50.0)) {
                    Ok(_) | Err(LookAheadError::Aborted) => {}
                    Err(e) => panic!("unexpected {e:?}"),
                }
            }
        });
        s.spawn(|| {
            for _ in 0..20 {
                ctl.clear_buffer(0, 0).unwrap();
                thread::yield_now();
            }
        });
    });

    ctl.clear_buffer(0, 0).unwrap();
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 0);
    assert_eq!(ctl.remaining_buffer_space(0, 0).unwrap(), 12);
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 0.0);

    push(&ctl, 0, &line(&[5000], 100.0, 50.0)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.segments, 1);
    assert_eq!(report.sent[0].exit_speed, 0.0);
}
