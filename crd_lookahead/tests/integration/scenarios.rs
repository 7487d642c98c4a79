//! End-to-end planning scenarios.

use super::{controller, dwell, line, line_ending, numbered, push};
use crd_lookahead::{Admission, ControllerConfig, LookAheadError};

#[test]
fn window_holds_exactly_its_capacity() {
    let ctl = controller(1, 200, ControllerConfig::default());
    for k in 1..=200 {
        let adm = ctl.enqueue_segment(0, 0, &line(&[k * 10], 100.0, 50.0)).unwrap();
        assert!(matches!(adm, Admission::Accepted { .. }), "segment {k}");
    }
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 200);
    assert_eq!(ctl.remaining_buffer_space(0, 0).unwrap(), 0);

    let adm = ctl.enqueue_segment(0, 0, &line(&[2010], 100.0, 50.0)).unwrap();
    assert_eq!(adm, Admission::BufferFull);
    // The forced drain made room; nothing was overwritten.
    assert!(ctl.remaining_buffer_space(0, 0).unwrap() > 0);
    let received = ctl.with_link(|card| card.received(0, 0).len());
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap() + received, 200);
}

#[test]
fn reversal_runs_through_at_step_speed() {
    let ctl = controller(1, 10, ControllerConfig::default());
    push(&ctl, 0, &line(&[1000], 100.0, 50.0)).unwrap();
    push(&ctl, 0, &line(&[0], 100.0, 50.0)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.sent[0].exit_speed, 2.0);
    assert_eq!(report.sent[1].exit_speed, 0.0);
}

#[test]
fn collinear_segments_converge_to_requested_speed() {
    let ctl = controller(1, 10, ControllerConfig::default());
    for k in 1..=3 {
        push(&ctl, 0, &line(&[k * 1000], 100.0, 50.0)).unwrap();
    }
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    let exits: Vec<f64> = report.sent.iter().map(|s| s.exit_speed).collect();
    assert_eq!(exits, [100.0, 100.0, 0.0]);

    let received = ctl.with_link(|card| card.received(0, 0).to_vec());
    assert_eq!(received[0].exit_speed, 100.0);
}

#[test]
fn clear_discards_window_and_restarts_from_rest() {
    let ctl = controller(
        1,
        10,
        ControllerConfig {
            high_water: Some(3),
            ..ControllerConfig::default()
        },
    );
    for k in 1..=3 {
        push(&ctl, 0, &line(&[k * 1000], 100.0, 50.0)).unwrap();
    }
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 100.0);
    push(&ctl, 0, &line(&[4000], 100.0, 50.0)).unwrap();

    ctl.clear_buffer(0, 0).unwrap();
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 0);
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 0.0);
    assert_eq!(ctl.with_link(|card| card.pending(0, 0)), 0);

    // Resumes from the last acknowledged position (2000).
    push(&ctl, 0, &line(&[10_000], 100.0, 50.0)).unwrap();
    push(&ctl, 0, &line(&[10_010], 100.0, 0.5)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    // The 10-unit tail at 0.5 units/ms² can only shed sqrt(2·0.5·10).
    assert!((report.sent[0].exit_speed - 10f64.sqrt()).abs() < 1e-9);
}

#[test]
fn flush_drains_in_order_and_ends_at_requested_velocity() {
    let ctl = controller(2, 20, ControllerConfig::default());
    let targets = [[1000, 0], [2000, 0], [2000, 1000], [3000, 1000]];
    for (k, t) in targets.iter().enumerate() {
        push(&ctl, 0, &numbered(line(t, 100.0, 50.0), k as i32 + 1)).unwrap();
    }
    push(&ctl, 0, &numbered(line_ending(&[4000, 1000], 100.0, 50.0, 20.0), 5)).unwrap();

    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.segments, 5);
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 0);

    let seg_nums: Vec<i32> = report.sent.iter().map(|s| s.seg_num).collect();
    assert_eq!(seg_nums, [1, 2, 3, 4, 5]);
    assert_eq!(report.sent[4].exit_speed, 20.0);
    // Right-angle corners: 100 - (100 - 2) / 2.
    assert!((report.sent[1].exit_speed - 51.0).abs() < 1e-9);
    assert_eq!(report.sent[0].exit_speed, 100.0);

    let received = ctl.with_link(|card| card.received(0, 0).to_vec());
    let on_card: Vec<i32> = received.iter().map(|r| r.segment.seg_num()).collect();
    assert_eq!(on_card, [1, 2, 3, 4, 5]);
    assert_eq!(received[4].exit_speed, 20.0);
}

#[test]
fn acknowledged_segments_are_never_resent() {
    let ctl = controller(
        1,
        10,
        ControllerConfig {
            high_water: Some(4),
            ..ControllerConfig::default()
        },
    );
    for k in 1..=30 {
        push(&ctl, 0, &numbered(line(&[k * 100], 100.0, 50.0), k)).unwrap();
    }
    let acked = ctl.last_acknowledged(0, 0).unwrap().unwrap();
    assert!(acked > 0);
    ctl.flush_to_end_of_program(0, 0).unwrap();

    let on_card: Vec<i32> = ctl.with_link(|card| {
        card.received(0, 0)
            .iter()
            .map(|r| r.segment.seg_num())
            .collect()
    });
    assert_eq!(on_card, (1..=30).collect::<Vec<_>>());
    assert_eq!(ctl.last_acknowledged(0, 0).unwrap(), Some(29));
    assert_eq!(ctl.ledger(0, 0).unwrap().last_user_seg, 30);
}

#[test]
fn dwell_splits_the_path() {
    let ctl = controller(1, 10, ControllerConfig::default());
    push(&ctl, 0, &line(&[1000], 100.0, 50.0)).unwrap();
    push(&ctl, 0, &line(&[2000], 100.0, 50.0)).unwrap();
    push(&ctl, 0, &dwell(100)).unwrap();
    push(&ctl, 0, &line(&[3000], 100.0, 50.0)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    let exits: Vec<f64> = report.sent.iter().map(|s| s.exit_speed).collect();
    assert_eq!(exits, [100.0, 0.0, 0.0, 0.0]);
}

#[test]
fn program_runs_to_its_end_position() {
    let ctl = controller(2, 5, ControllerConfig::default());
    let square = [[1000, 0], [1000, 1000], [0, 1000], [0, 0], [500, 500]];
    for _ in 0..3 {
        for t in &square {
            push(&ctl, 0, &line(t, 100.0, 50.0)).unwrap();
        }
    }
    ctl.flush_to_end_of_program(0, 0).unwrap();
    ctl.start(0b01).unwrap();
    let status = ctl.snapshot_system_status().unwrap();
    assert_eq!(status.crd_pos[0][..2], [500.0, 500.0]);
    assert_eq!(status.prf_pos[..2], [500.0, 500.0]);
    assert_eq!(ctl.with_link(|card| card.received(0, 0).len()), 15);
}

fn flushed_at_twenty() -> crd_lookahead::Controller<crd_lookahead::SimulatedCard> {
    let ctl = controller(1, 10, ControllerConfig::default());
    push(&ctl, 0, &line_ending(&[1000], 100.0, 50.0, 20.0)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.sent[0].exit_speed, 20.0);
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 20.0);
    ctl
}

#[test]
fn dwell_after_flush_stops_the_carried_speed() {
    let ctl = flushed_at_twenty();
    push(&ctl, 0, &dwell(10)).unwrap();
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 0.0);
    push(&ctl, 0, &line(&[1001], 100.0, 50.0)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.segments, 2);
}

#[test]
fn reversal_after_flush_is_capped_at_step_speed() {
    let ctl = flushed_at_twenty();
    push(&ctl, 0, &line(&[999], 100.0, 50.0)).unwrap();
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 2.0);
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.sent[0].exit_speed, 0.0);
}

#[test]
fn unsheddable_carried_speed_is_refused_without_buffering() {
    let ctl = flushed_at_twenty();
    // One pulse at 50 units/ms² sheds at most sqrt(100) = 10.
    let err = ctl
        .enqueue_segment(0, 0, &line(&[1001], 100.0, 50.0))
        .unwrap_err();
    assert!(matches!(
        err,
        LookAheadError::CarriedSpeed { speed, limit } if speed == 20.0 && limit == 10.0
    ));
    assert!(!err.is_fatal());
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 0);

    // A long enough segment is still accepted.
    push(&ctl, 0, &line(&[1100], 100.0, 50.0)).unwrap();
    assert_eq!(ctl.carried_speed(0, 0).unwrap(), 20.0);

    ctl.clear_buffer(0, 0).unwrap();
    push(&ctl, 0, &line(&[1001], 100.0, 50.0)).unwrap();
}
