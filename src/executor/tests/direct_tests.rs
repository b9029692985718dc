use super::helpers::*;
use crate::errors::EngineError;
use crate::executor::{ExecResult, ExecutionStrategy};
use crate::program::{BinOp, Expr, Stmt};
use crate::values::Value;

#[test]
fn test_loop_with_break_and_continue() {
    let env = env_with(vec![function("main", 3, 0, loop_body(3, 5))]);
    let (mut ctx, unit) = context_for(&env, "main", vec![Value::Int(10)]);

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        // 1 + 2 + 4; 3 skipped, loop left at 5
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(7)),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_completion_fills_return_slot() {
    let env = env_with(vec![function("main", 0, 0, ret(int(9)))]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let strategy = ExecutionStrategy::direct(env);
    strategy.continue_execution(&mut ctx, &unit);
    let frame = ctx.control_stack.current_frame().unwrap();
    assert_eq!(frame.returns[0], Value::Int(9));
}

#[test]
fn test_function_call_pushes_and_pops_frame() {
    let double = function(
        "double",
        1,
        0,
        ret(bin(BinOp::Mul, local(0), int(2))),
    );
    let main = function(
        "main",
        1,
        0,
        block(vec![
            store(0, call("double", vec![int(21)])),
            ret(local(0)),
        ]),
    );
    let env = env_with(vec![main, double]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(42)),
        other => panic!("expected completion, got {:?}", other),
    }
    // Only the root frame remains.
    assert_eq!(ctx.control_stack.depth(), 1);
}

#[test]
fn test_blocking_op_runs_inline() {
    let env = env_with(vec![function(
        "main",
        1,
        1,
        block(vec![
            store(0, blocking("echo", vec![int(5)], 0)),
            ret(bin(BinOp::Add, local(0), int(1))),
        ]),
    )]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Completed(v) => assert_eq!(v, Value::Int(6)),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_division_overflow_is_a_failure_not_a_panic() {
    // i64::MIN / -1 has no i64 representation; it must surface as an
    // execution failure like the zero-divisor case.
    let env = env_with(vec![function(
        "main",
        0,
        0,
        ret(bin(BinOp::Div, int(i64::MIN), int(-1))),
    )]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Failed(EngineError::Execution { message }) => {
            assert!(message.contains("overflow"))
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_division_by_zero_is_a_failure() {
    let env = env_with(vec![function(
        "main",
        0,
        0,
        ret(bin(BinOp::Div, int(1), int(0))),
    )]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Failed(EngineError::Execution { message }) => {
            assert!(message.contains("division by zero"))
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn test_fail_statement_keeps_failed_frames() {
    let boom = function(
        "boom",
        0,
        0,
        Stmt::Fail {
            message: Expr::LitStr { v: "nope".into() },
        },
    );
    let main = function(
        "main",
        0,
        0,
        Stmt::Expr {
            expr: call("boom", vec![]),
        },
    );
    let env = env_with(vec![main, boom]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Failed(EngineError::Execution { message }) => {
            assert_eq!(message, "nope")
        }
        other => panic!("expected failure, got {:?}", other),
    }
    // Callee frame left in place for trace rendering.
    assert_eq!(ctx.control_stack.depth(), 2);
    let trace = ctx.control_stack.drain_trace();
    assert_eq!(trace[0], "at demo.app:boom (app.ql:1)");
    assert_eq!(trace[1], "at demo.app:main (app.ql:1)");
}

#[test]
fn test_cancelled_context_stops_at_checkpoint() {
    let noop = function("noop", 0, 0, Stmt::Return { value: None });
    let main = function(
        "main",
        0,
        0,
        Stmt::Expr {
            expr: call("noop", vec![]),
        },
    );
    let env = env_with(vec![main, noop]);
    let (mut ctx, unit) = context_for(&env, "main", vec![]);
    ctx.cancel();

    let strategy = ExecutionStrategy::direct(env);
    match strategy.continue_execution(&mut ctx, &unit) {
        ExecResult::Failed(EngineError::Cancelled) => {}
        other => panic!("expected cancellation, got {:?}", other),
    }
}

#[test]
fn test_resume_is_rejected() {
    let env = env_with(vec![function("main", 0, 0, Stmt::Return { value: None })]);
    let strategy = ExecutionStrategy::direct(env.clone());

    // A direct strategy has no suspensions to resume; forge a token through
    // the suspendable strategy to prove the rejection.
    let suspender = env_with(vec![function(
        "wait",
        0,
        1,
        ret(blocking("echo", vec![int(1)], 0)),
    )]);
    let (mut ctx, unit) = context_for(&suspender, "wait", vec![]);
    let non_blocking = ExecutionStrategy::non_blocking(suspender);
    let token = match non_blocking.continue_execution(&mut ctx, &unit) {
        ExecResult::Suspended(token) => token,
        other => panic!("expected suspension, got {:?}", other),
    };

    match strategy.resume(&mut ctx, token, Value::Null) {
        ExecResult::Failed(EngineError::InvalidResume(_)) => {}
        other => panic!("expected invalid resume, got {:?}", other),
    }
}
