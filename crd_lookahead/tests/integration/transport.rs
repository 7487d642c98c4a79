//! Link faults seen through the controller.

use super::{controller, line, push};
use crd::wire::ResultCode;
use crd_lookahead::{ControllerConfig, Fault, LookAheadError};

fn three_lines(ctl: &crd_lookahead::Controller<crd_lookahead::SimulatedCard>) {
    for k in 1..=3 {
        push(ctl, 0, &line(&[k * 1000], 100.0, 50.0)).unwrap();
    }
}

#[test]
fn lost_reply_is_resent_without_double_execution() {
    let ctl = controller(1, 10, ControllerConfig::default());
    three_lines(&ctl);
    ctl.with_link(|card| card.inject(Fault::Timeout));

    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.frames, 1);
    ctl.with_link(|card| {
        assert_eq!(card.duplicates(), 1);
        assert_eq!(card.received(0, 0).len(), 3);
        assert_eq!(card.pending(0, 0), 3);
        let sent = card.requests();
        assert_eq!(sent[sent.len() - 1], sent[sent.len() - 2]);
    });
}

#[test]
fn corrupted_reply_is_retried() {
    let ctl = controller(1, 10, ControllerConfig::default());
    three_lines(&ctl);
    ctl.with_link(|card| card.inject(Fault::CorruptResponse));

    ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 0);
    ctl.with_link(|card| {
        assert_eq!(card.duplicates(), 1);
        assert_eq!(card.received(0, 0).len(), 3);
    });
}

#[test]
fn exhausted_retries_keep_window_until_cleared() {
    let ctl = controller(
        1,
        10,
        ControllerConfig {
            retry_limit: 2,
            ..ControllerConfig::default()
        },
    );
    three_lines(&ctl);
    ctl.with_link(|card| {
        for _ in 0..3 {
            card.inject(Fault::Nak);
        }
    });

    let err = ctl.flush_to_end_of_program(0, 0).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, LookAheadError::LinkFailure { attempts: 3, .. }));
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 3);
    assert_eq!(ctl.last_acknowledged(0, 0).unwrap(), None);
    assert_eq!(ctl.with_link(|card| card.received(0, 0).len()), 0);

    ctl.clear_buffer(0, 0).unwrap();
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 0);
    push(&ctl, 0, &line(&[500], 100.0, 50.0)).unwrap();
    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.segments, 1);
    assert_eq!(ctl.with_link(|card| card.received(0, 0).len()), 1);
}

#[test]
fn card_rejection_is_not_retried() {
    let ctl = controller(1, 10, ControllerConfig::default());
    three_lines(&ctl);
    ctl.with_link(|card| card.inject(Fault::Reject(ResultCode::DataWrong)));

    let err = ctl.flush_to_end_of_program(0, 0).unwrap_err();
    assert!(matches!(
        err,
        LookAheadError::CardRejected {
            code: Some(ResultCode::DataWrong),
            ..
        }
    ));
    assert!(!err.is_fatal());
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 3);

    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.segments, 3);
    assert_eq!(ctl.with_link(|card| card.received(0, 0).len()), 3);
}

#[test]
fn high_water_failure_keeps_the_new_segment() {
    let ctl = controller(
        1,
        10,
        ControllerConfig {
            high_water: Some(2),
            ..ControllerConfig::default()
        },
    );
    push(&ctl, 0, &line(&[1000], 100.0, 50.0)).unwrap();
    ctl.with_link(|card| card.inject(Fault::Disconnect));

    let err = ctl
        .enqueue_segment(0, 0, &line(&[2000], 100.0, 50.0))
        .unwrap_err();
    assert!(matches!(err, LookAheadError::LinkFailure { attempts: 1, .. }));
    assert_eq!(ctl.resident_segment_count(0, 0).unwrap(), 2);

    let report = ctl.flush_to_end_of_program(0, 0).unwrap();
    assert_eq!(report.segments, 2);
    assert_eq!(report.sent[0].exit_speed, 100.0);
}
