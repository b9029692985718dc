use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedReceiver;

use super::helpers::*;
use crate::debug::{DebugCommand, DebugEvent, DebugManager, DebugSession};
use crate::executor::{ExecResult, ExecutionStrategy};
use crate::values::Value;

fn drain(events: &mut UnboundedReceiver<DebugEvent>) -> Vec<DebugEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[test]
fn test_stepping_pauses_before_each_statement() {
    let env = env_with(vec![function(
        "main",
        1,
        0,
        block(vec![store(0, int(1)), ret(local(0))]),
    )]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let (session, commands, mut events) = DebugSession::in_memory();
    // One command per statement, queued up front; the gate consumes them
    // in order.
    commands.send(DebugCommand::Step).unwrap();
    commands.send(DebugCommand::Step).unwrap();

    let strategy = ExecutionStrategy::debug(env, session);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(1)),
        other => panic!("expected completion, got {:?}", other),
    }

    let seen = drain(&mut events);
    assert_eq!(
        seen,
        vec![
            DebugEvent::Paused {
                unit: "demo.app:main".into(),
                statement: "store".into(),
                depth: 1,
            },
            DebugEvent::Paused {
                unit: "demo.app:main".into(),
                statement: "return".into(),
                depth: 1,
            },
        ]
    );
}

#[test]
fn test_breakpoint_rearms_in_free_run() {
    let helper = function("helper", 0, 0, ret(int(5)));
    let main = function(
        "main",
        1,
        0,
        block(vec![
            store(0, call("helper", vec![])),
            ret(bin(crate::program::BinOp::Add, local(0), int(1))),
        ]),
    );
    let env = env_with(vec![main, helper]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let (session, commands, mut events) = DebugSession::in_memory();
    session.set_breakpoint("demo.app:helper".into());
    commands.send(DebugCommand::Continue).unwrap();
    commands.send(DebugCommand::Step).unwrap();
    commands.send(DebugCommand::Continue).unwrap();

    let strategy = ExecutionStrategy::debug(env, session);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(6)),
        other => panic!("expected completion, got {:?}", other),
    }

    let seen = drain(&mut events);
    assert_eq!(
        seen,
        vec![
            DebugEvent::Paused {
                unit: "demo.app:main".into(),
                statement: "store".into(),
                depth: 1,
            },
            DebugEvent::Resumed,
            DebugEvent::BreakpointHit {
                unit: "demo.app:helper".into(),
            },
            DebugEvent::Paused {
                unit: "demo.app:helper".into(),
                statement: "return".into(),
                depth: 2,
            },
            DebugEvent::Paused {
                unit: "demo.app:main".into(),
                statement: "return".into(),
                depth: 1,
            },
            DebugEvent::Resumed,
        ]
    );
}

#[test]
fn test_detach_releases_the_program() {
    let env = env_with(vec![function("main", 3, 0, loop_body(3, 5))]);
    let (mut ctx, unit) = context_for(&env, "main", vec![Value::Int(10)]);

    let (session, commands, mut events) = DebugSession::in_memory();
    commands.send(DebugCommand::Detach).unwrap();

    let strategy = ExecutionStrategy::debug(env, session);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(7)),
        other => panic!("expected completion, got {:?}", other),
    }

    // One pause, then the program runs free with no further events.
    let seen = drain(&mut events);
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], DebugEvent::Paused { .. }));
    assert_eq!(seen[1], DebugEvent::Resumed);
}

#[test]
fn test_disconnected_client_does_not_wedge_execution() {
    let env = env_with(vec![function("main", 0, 0, ret(int(3)))]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let (session, commands, _events) = DebugSession::in_memory();
    drop(commands);

    let strategy = ExecutionStrategy::debug(env, session);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(3)),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_suspension_survives_gating() {
    let env = env_with(vec![function(
        "main",
        0,
        1,
        ret(blocking("echo", vec![int(3)], 0)),
    )]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let (session, commands, _events) = DebugSession::in_memory();
    commands.send(DebugCommand::Step).unwrap();
    commands.send(DebugCommand::Step).unwrap();

    let strategy = ExecutionStrategy::debug(env, session);
    let token = match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Suspended(token) => token,
        other => panic!("expected suspension, got {:?}", other),
    };
    assert_eq!(token.pending.op, "echo");

    // The gate fires again at the resumed statement, then the unit
    // completes with the injected value.
    match strategy.resume(&mut ctx, token, Value::Int(3)) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(3)),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_manager_blocks_until_client_attaches() {
    let manager = DebugManager::new(0);
    let port = manager.init().await.unwrap();

    // Nobody attached yet: the wait must not return.
    let waited =
        tokio::time::timeout(Duration::from_millis(50), manager.wait_till_client_connect()).await;
    assert!(waited.is_err());
    assert!(manager.session().is_none());

    let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), manager.wait_till_client_connect())
        .await
        .unwrap();
    let session = manager.session().expect("session after attach");

    // Wire commands reach the attached session.
    client
        .write_all(b"{\"cmd\":\"set_breakpoint\",\"unit\":\"demo.app:main\"}\n")
        .await
        .unwrap();
    for _ in 0..100 {
        if session.has_breakpoint("demo.app:main") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(session.has_breakpoint("demo.app:main"));
}
