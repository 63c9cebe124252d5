// SPDX-License-Identifier: PMPL-1.0-or-later

//! Session behaviour against real subprocesses.

#![cfg(unix)]

mod common;

use common::FakeEngine;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use uci_stress::error::SessionError;
use uci_stress::session::{BestMove, Position, Session, SubjectCommand};

const HANDSHAKE: Duration = Duration::from_secs(5);

#[test]
fn handshake_completes_and_bestmove_is_parsed() {
    let engine = FakeEngine::answering(r#"echo "info depth 1 score cp 20"; echo "bestmove e2e4 ponder e7e5""#);
    let layout = engine.layout();
    let mut session = Session::start(&engine.command(), "s1", &layout, HANDSHAKE)
        .expect("fake engine should start");

    assert!(!session.degraded());
    let reply = session.best_move(Position::StartPos { moves: &[] }, 1, Duration::from_secs(5));
    assert_eq!(reply, Some(BestMove::Move("e2e4".to_string())));

    session.terminate();
    let raw = fs::read_to_string(layout.engine_log("s1")).unwrap();
    assert!(raw.contains("uciok"));
    assert!(raw.contains("bestmove e2e4 ponder e7e5"));
}

#[test]
fn silent_subject_leaves_a_degraded_session() {
    let engine = FakeEngine::silent();
    let started = Instant::now();
    let mut session = Session::start(
        &engine.command(),
        "quiet",
        &engine.layout(),
        Duration::from_millis(200),
    )
    .expect("spawn should still succeed");

    assert!(session.degraded());
    assert!(session.is_alive());
    assert!(started.elapsed() >= Duration::from_millis(200));
    session.terminate();
    assert!(!session.is_alive());
}

#[test]
fn anomalies_drain_once() {
    let engine = FakeEngine::with_handlers(
        r#"echo "==12==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x1" >&2"#,
        "",
    );
    let layout = engine.layout();
    let session = Session::start(&engine.command(), "asan", &layout, HANDSHAKE).unwrap();

    let first: Vec<String> = session.drain_anomalies().collect();
    assert_eq!(first.len(), 1);
    assert!(first[0].contains("heap-buffer-overflow"));
    assert_eq!(session.drain_anomalies().count(), 0);

    let anomaly_log = fs::read_to_string(layout.anomaly_log("asan")).unwrap();
    assert!(anomaly_log.contains("heap-buffer-overflow"));
}

#[test]
fn null_tokens_are_recognised() {
    let engine = FakeEngine::answering(r#"echo "bestmove (none)""#);
    let mut session = Session::start(&engine.command(), "none", &engine.layout(), HANDSHAKE).unwrap();
    let reply = session.best_move(Position::Fen("7k/8/8/8/8/8/8/K7 w - - 0 1"), 1, Duration::from_secs(5));
    assert_eq!(reply, Some(BestMove::Null));
}

#[test]
fn exit_is_observed_after_the_stream_closes() {
    let engine = FakeEngine::answering("exit 7");
    let mut session = Session::start(&engine.command(), "dies", &engine.layout(), HANDSHAKE).unwrap();

    let reply = session.best_move(Position::StartPos { moves: &[] }, 1, Duration::from_secs(5));
    assert_eq!(reply, None);

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = session.exit_status() {
            break status;
        }
        assert!(Instant::now() < deadline, "subject should have exited");
        thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(status.code(), Some(7));
    assert!(session.wait_for_reader(Duration::from_secs(1)));
    assert!(session.stream_closed());
}

#[test]
fn closed_input_marks_the_session_dead() {
    let engine = FakeEngine::answering("exec 0<&-; exec sleep 5");
    let mut session = Session::start(&engine.command(), "deaf", &engine.layout(), HANDSHAKE).unwrap();

    let reply = session.best_move(Position::StartPos { moves: &[] }, 1, Duration::from_millis(300));
    assert_eq!(reply, None);
    assert!(session.exit_status().is_none());

    let started = Instant::now();
    assert!(!session.new_game());
    assert!(started.elapsed() < HANDSHAKE);
    assert!(!session.is_alive());
}

#[test]
fn missing_program_is_a_spawn_failure() {
    let engine = FakeEngine::silent();
    let command = SubjectCommand::new(engine.path().join("no-such-engine"));
    match Session::start(&command, "missing", &engine.layout(), HANDSHAKE) {
        Err(SessionError::Spawn { program, .. }) => assert!(program.ends_with("no-such-engine")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("spawn should fail"),
    }
}
