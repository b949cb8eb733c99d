use ftcycle::{
    clock::slot::slot_at,
    config::AutomationConfig,
    error::ConfigError,
    qso::{
        arbiter::{CycleClaim, arbitrate, collision_between, validate_operators},
        context::OperatorContext,
        machine::{QsoCommand, QsoEvent, QsoStateMachine},
        message::{FtMessage, format_report},
        state::QsoPhase,
    },
    types::{CycleType, DecodedFrame, ModeDescriptor, SlotInfo},
};

fn slot(n: u64) -> SlotInfo {
    slot_at(&ModeDescriptor::ft8(), n * 15_000)
}

fn frame(message: &str, snr: i32, at: u64) -> DecodedFrame {
    DecodedFrame {
        message: message.to_string(),
        snr,
        dt_seconds: 0.1,
        freq_hz: 1_500.0,
        timestamp_ms: at,
    }
}

fn step(machine: &mut QsoStateMachine, n: u64) -> (Option<String>, Vec<QsoEvent>) {
    let s = slot(n);
    let may = machine.context().may_transmit_in(&ModeDescriptor::ft8(), &s);
    let out = machine.on_cycle_start(&s, may);
    (out.transmission.map(|t| t.message), out.events)
}

#[test]
fn messages_parse_and_render() {
    assert_eq!(
        FtMessage::parse("cq dx k1abc fn42"),
        FtMessage::Cq {
            modifier: Some("DX".to_string()),
            from: "K1ABC".to_string(),
            grid: Some("FN42".to_string()),
        }
    );
    assert_eq!(
        FtMessage::parse("K1ABC W9XYZ R-07"),
        FtMessage::RogerReport {
            to: "K1ABC".to_string(),
            from: "W9XYZ".to_string(),
            snr: -7,
        }
    );
    assert!(matches!(
        FtMessage::parse("K1ABC W9XYZ RR73"),
        FtMessage::Roger { with_73: true, .. }
    ));
    assert!(matches!(FtMessage::parse("TNX FER QSO 73 GL"), FtMessage::FreeText(_)));
    assert_eq!(FtMessage::parse("W9XYZ K1ABC +03").to_string(), "W9XYZ K1ABC +03");
    assert_eq!(format_report(-5), "-05");
    assert_eq!(format_report(42), "+30");
}

#[test]
fn caller_times_out_to_idle_after_configured_cycles() {
    let cfg = AutomationConfig {
        max_cycles_without_reply: 3,
        auto_resume_cq_after_fail: false,
        ..AutomationConfig::default()
    };
    let mut a = QsoStateMachine::new(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]), cfg);
    a.command(QsoCommand::CallCq);

    let mut sent = 0;
    let mut timeout_at = None;
    for n in 0..12 {
        let (tx, events) = step(&mut a, n);
        sent += usize::from(tx.is_some());
        if events.iter().any(|e| matches!(e, QsoEvent::Timeout { cycles: 3, .. })) {
            timeout_at = Some(n);
        }
    }
    assert_eq!(timeout_at, Some(6));
    assert_eq!(sent, 3);
    assert_eq!(a.phase(), QsoPhase::Idle);
}

#[test]
fn timeout_resumes_cq_when_configured() {
    let cfg = AutomationConfig {
        max_cycles_without_reply: 2,
        auto_resume_cq_after_fail: true,
        ..AutomationConfig::default()
    };
    let mut a = QsoStateMachine::new(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]), cfg);
    a.command(QsoCommand::CallCq);
    for n in 0..4 {
        step(&mut a, n);
    }
    let (tx, events) = step(&mut a, 4);
    assert!(events.iter().any(|e| matches!(e, QsoEvent::Timeout { .. })));
    assert_eq!(tx.as_deref(), Some("CQ K1ABC FN42"));
    assert_eq!(a.phase(), QsoPhase::CallingCQ);
    assert_eq!(a.state().cycles_without_reply, 0);
}

#[test]
fn waiting_counts_cycles_without_a_grant() {
    let cfg = AutomationConfig {
        max_cycles_without_reply: 3,
        ..AutomationConfig::default()
    };
    let mut a = QsoStateMachine::new(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]), cfg);
    a.command(QsoCommand::CallCq);
    let (tx, _) = step(&mut a, 0);
    assert!(tx.is_some());

    // Every later cycle is lost to arbitration.
    let mut timeout_at = None;
    for n in 1..200 {
        let out = a.on_cycle_start(&slot(n), false);
        assert!(out.transmission.is_none());
        if out.events.iter().any(|e| matches!(e, QsoEvent::Timeout { cycles: 3, .. })) {
            timeout_at = Some(n);
            break;
        }
    }
    assert_eq!(timeout_at, Some(4));
    assert_eq!(a.phase(), QsoPhase::Idle);
    assert_eq!(a.staged(), None);
}

#[test]
fn continuous_mode_listens_one_slot_before_resending() {
    let mode = ModeDescriptor {
        cycle_type: CycleType::Continuous,
        ..ModeDescriptor::ft8()
    };
    let cfg = AutomationConfig {
        max_cycles_without_reply: 2,
        ..AutomationConfig::default()
    };
    let mut a = QsoStateMachine::new(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]), cfg);
    a.command(QsoCommand::CallCq);

    let mut pattern = Vec::new();
    let mut timeout_at = None;
    for n in 0..8 {
        let s = slot_at(&mode, n * 15_000);
        let out = a.on_cycle_start(&s, a.context().may_transmit_in(&mode, &s));
        pattern.push(out.transmission.is_some());
        if out.events.iter().any(|e| matches!(e, QsoEvent::Timeout { .. })) {
            timeout_at = Some(n);
            break;
        }
    }
    assert_eq!(pattern, vec![true, false, true, false, false]);
    assert_eq!(timeout_at, Some(4));

    // A reply decoded in the listening slot is answered, not timed out.
    let mut b = QsoStateMachine::new(
        1,
        OperatorContext::new("K1ABC", "FN42", 1_500, &[0]),
        AutomationConfig::default(),
    );
    b.command(QsoCommand::CallCq);
    let s0 = slot_at(&mode, 0);
    b.on_cycle_start(&s0, true);
    let s1 = slot_at(&mode, 15_000);
    assert!(b.on_cycle_start(&s1, true).transmission.is_none());
    b.on_decoded(frame("K1ABC W9XYZ EN52", -12, 28_000));
    let out = b.on_cycle_start(&slot_at(&mode, 30_000), true);
    assert_eq!(out.transmission.map(|t| t.message).as_deref(), Some("W9XYZ K1ABC -12"));
    assert_eq!(b.state().cycles_without_reply, 0);
}

#[test]
fn operators_only_transmit_in_their_own_cycles() {
    let cfg = AutomationConfig::default();
    let mut a = QsoStateMachine::new(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]), cfg.clone());
    let mut b = QsoStateMachine::new(2, OperatorContext::new("W9XYZ", "EN52", 1_200, &[1]), cfg);
    a.command(QsoCommand::CallCq);
    b.command(QsoCommand::CallCq);

    for n in 0..6 {
        let (tx_a, _) = step(&mut a, n);
        let (tx_b, _) = step(&mut b, n);
        assert_eq!(tx_a.is_some(), n % 2 == 0, "slot {n}");
        assert_eq!(tx_b.is_some(), n % 2 == 1, "slot {n}");
        assert_eq!(a.is_transmitting(), n % 2 == 0);
    }
}

#[test]
fn staged_phase_waits_for_a_granted_cycle() {
    let mut a = QsoStateMachine::new(
        1,
        OperatorContext::new("K1ABC", "FN42", 1_500, &[0]),
        AutomationConfig::default(),
    );
    a.command(QsoCommand::CallCq);
    let (tx, _) = step(&mut a, 1);
    assert!(tx.is_none());
    assert_eq!(a.phase(), QsoPhase::Idle);
    assert_eq!(a.staged(), Some(QsoPhase::CallingCQ));

    let (tx, _) = step(&mut a, 2);
    assert_eq!(tx.as_deref(), Some("CQ K1ABC FN42"));
}

#[test]
fn full_exchange_between_two_operators() {
    let cfg = AutomationConfig::default();
    let mut a = QsoStateMachine::new(1, OperatorContext::new("K1ABC", "FN42", 1_500, &[0]), cfg.clone());
    let mut b_ctx = OperatorContext::new("W9XYZ", "EN52", 1_200, &[1]);
    b_ctx.target_call = Some("K1ABC".to_string());
    let mut b = QsoStateMachine::new(2, b_ctx, cfg);
    a.command(QsoCommand::CallCq);

    let mut on_air = Vec::new();
    let mut completed = Vec::new();
    for n in 0..7 {
        let (tx_a, ev_a) = step(&mut a, n);
        let (tx_b, ev_b) = step(&mut b, n);
        for event in ev_a.into_iter().chain(ev_b) {
            if let QsoEvent::Completed(done) = event {
                completed.push((n, done));
            }
        }
        if let Some(msg) = tx_a {
            b.on_decoded(frame(&msg, -7, n * 15_000 + 13_000));
            on_air.push(msg);
        }
        if let Some(msg) = tx_b {
            a.on_decoded(frame(&msg, -12, n * 15_000 + 13_000));
            on_air.push(msg);
        }
    }

    assert_eq!(
        on_air,
        vec![
            "CQ K1ABC FN42",
            "K1ABC W9XYZ EN52",
            "W9XYZ K1ABC -12",
            "K1ABC W9XYZ R-07",
            "W9XYZ K1ABC RR73",
            "K1ABC W9XYZ 73",
            "CQ K1ABC FN42",
        ]
    );

    assert_eq!(completed.len(), 2);
    let (n, done) = &completed[0];
    assert_eq!(*n, 5);
    assert_eq!(done.operator_id, 1);
    assert_eq!(done.their_call, "W9XYZ");
    assert_eq!(done.their_grid.as_deref(), Some("EN52"));
    assert_eq!(done.report_sent, Some(-12));
    assert_eq!(done.report_received, Some(-7));
    assert_eq!(done.slot_start_ms, 4 * 15_000);

    let (n, done) = &completed[1];
    assert_eq!(*n, 6);
    assert_eq!(done.operator_id, 2);
    assert_eq!(done.their_call, "K1ABC");
    assert_eq!(done.their_grid.as_deref(), Some("FN42"));
    assert_eq!(done.report_sent, Some(-7));
    assert_eq!(done.report_received, Some(-12));
}

#[test]
fn unrelated_traffic_is_ignored() {
    let mut a = QsoStateMachine::new(
        1,
        OperatorContext::new("K1ABC", "FN42", 1_500, &[0]),
        AutomationConfig::default(),
    );
    a.command(QsoCommand::CallCq);
    step(&mut a, 0);
    a.on_decoded(frame("N0CALL W9XYZ EN52", -3, 16_000));
    a.on_decoded(frame("CQ W9XYZ EN52", -3, 16_500));
    step(&mut a, 1);
    step(&mut a, 2);
    assert!(a.state().target_call.is_none());
    assert_eq!(a.state().cycles_without_reply, 1);
}

#[test]
fn manual_mode_sends_queued_text_only() {
    let mut a = QsoStateMachine::new(
        1,
        OperatorContext::new("K1ABC", "FN42", 1_500, &[0]),
        AutomationConfig::default(),
    );
    a.command(QsoCommand::SetManual(true));
    a.command(QsoCommand::QueueMessage("tnx 73 gl".to_string()));
    let (tx, _) = step(&mut a, 0);
    assert_eq!(tx.as_deref(), Some("TNX 73 GL"));
    assert!(a.is_transmitting());
    let (tx, _) = step(&mut a, 2);
    assert!(tx.is_none());
    assert_eq!(a.phase(), QsoPhase::Manual);
}

#[test]
fn collisions_are_detected_by_cycle_and_frequency() {
    let a = OperatorContext::new("K1ABC", "FN42", 1_500, &[0]);
    let b = OperatorContext::new("W9XYZ", "EN52", 1_520, &[0, 1]);
    let far = OperatorContext::new("N0CALL", "EM48", 1_800, &[0]);
    let odd = OperatorContext::new("G4ABC", "IO91", 1_500, &[1]);

    assert_eq!(collision_between(&a, &b, 50), Some(0));
    assert_eq!(collision_between(&a, &far, 50), None);
    assert_eq!(collision_between(&a, &odd, 50), None);

    match validate_operators([(1, &a), (2, &far), (3, &b)], 50) {
        Err(ConfigError::CycleCollision {
            cycle_index,
            first,
            second,
        }) => assert_eq!((cycle_index, first, second), (0, 1, 3)),
        other => panic!("expected collision, got {other:?}"),
    }
    assert!(validate_operators([(1, &a), (2, &far), (3, &odd)], 50).is_ok());
}

#[test]
fn arbitration_prefers_contact_in_progress() {
    let mode = ModeDescriptor::ft8();
    let a = OperatorContext::new("K1ABC", "FN42", 1_500, &[0]);
    let b = OperatorContext::new("W9XYZ", "EN52", 1_510, &[0]);
    let s = slot(2);

    let grant = arbitrate(
        &mode,
        &s,
        &[
            CycleClaim { operator_id: 1, context: &a, in_progress: false },
            CycleClaim { operator_id: 2, context: &b, in_progress: true },
        ],
        50,
    );
    assert!(grant.may_transmit(2));
    assert!(!grant.may_transmit(1));
    assert_eq!(grant.collisions.len(), 1);
    assert_eq!((grant.collisions[0].granted, grant.collisions[0].denied), (2, 1));

    let grant = arbitrate(
        &mode,
        &s,
        &[
            CycleClaim { operator_id: 2, context: &b, in_progress: false },
            CycleClaim { operator_id: 1, context: &a, in_progress: false },
        ],
        50,
    );
    assert!(grant.may_transmit(1));
    assert!(!grant.may_transmit(2));

    let odd = arbitrate(
        &mode,
        &slot(3),
        &[CycleClaim { operator_id: 1, context: &a, in_progress: true }],
        50,
    );
    assert!(!odd.may_transmit(1));
    assert!(odd.collisions.is_empty());
}
