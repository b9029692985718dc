//! Non-blocking (suspendable) execution
//!
//! A resumable statement-frame machine adapted to the shared frame/context
//! model:
//!
//! 1. All machine state lives in `frames: Vec<StepFrame>` — no Rust
//!    recursion, so the machine can stop anywhere and be carried inside a
//!    resume token
//! 2. Each statement gets one frame tracking its micro-step
//! 3. The `Control` enum centralizes break/continue/return/fail/suspend;
//!    when control is active the machine unwinds instead of dispatching
//! 4. The machine is pure with respect to I/O: it never performs a blocking
//!    operation, it only yields one
//!
//! Function calls push a real `StackFrame` on the context's control stack
//! and a `Call` boundary frame in the machine; a suspension inside a callee
//! therefore captures the whole chain. Resume results are injected through
//! the suspended frame's temp slot, so re-entry lands exactly where the
//! machine stopped.

use std::sync::Arc;

use uuid::Uuid;

use super::eval::{eval_pure, render_message};
use super::{ExecResult, PendingOp, ResumeToken};
use crate::context::Context;
use crate::env::{RuntimeEnvironment, Unit};
use crate::errors::EngineError;
use crate::frame::new_frame;
use crate::program::{Expr, Stmt};
use crate::values::Value;

/* ===================== Machine State ===================== */

/// Active control flow. When control is not `None` the machine unwinds the
/// frame stack to find the matching handler instead of dispatching.
#[derive(Debug, Clone)]
pub(crate) enum Control {
    None,
    Return(Value),
    Break,
    Continue,
    Fail(EngineError),
    Suspend(PendingOp),
}

/// What to do with a callee's return value at its `Call` boundary.
#[derive(Debug, Clone)]
pub(crate) enum Dest {
    /// Write into a local slot of the caller
    Local(usize),
    /// Drop it (expression statement)
    Discard,
    /// It becomes the caller's own return value
    Propagate,
}

#[derive(Debug, Clone)]
pub(crate) enum FrameKind {
    Block { idx: usize },
    Store { slot: usize },
    ExprStmt,
    If,
    While,
    Return,
    BreakStmt,
    ContinueStmt,
    FailStmt,
    /// Function-call boundary: a callee body is running above this frame and
    /// a `StackFrame` was pushed on the context for it.
    Call { dest: Dest },
}

#[derive(Debug, Clone)]
pub(crate) struct StepFrame {
    pub kind: FrameKind,
    pub node: Stmt,
}

/// Resumable machine state for one invocation.
#[derive(Debug)]
pub(crate) struct Machine {
    pub frames: Vec<StepFrame>,
    pub control: Control,
}

impl Machine {
    pub fn for_body(body: &Stmt) -> Self {
        let mut machine = Machine {
            frames: Vec::new(),
            control: Control::None,
        };
        push_stmt(&mut machine, body);
        machine
    }

    /// True when the next dispatch starts a statement (used by the debug
    /// gate; block and call boundary frames are structural).
    pub fn at_statement(&self) -> bool {
        matches!(self.control, Control::None)
            && self
                .frames
                .last()
                .map(|f| !matches!(f.kind, FrameKind::Block { .. } | FrameKind::Call { .. }))
                .unwrap_or(false)
    }

    pub fn current_statement_label(&self) -> &'static str {
        self.frames.last().map(|f| statement_label(&f.node)).unwrap_or("")
    }
}

pub(crate) fn statement_label(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Block { .. } => "block",
        Stmt::Store { .. } => "store",
        Stmt::If { .. } => "if",
        Stmt::While { .. } => "while",
        Stmt::Return { .. } => "return",
        Stmt::Expr { .. } => "expr",
        Stmt::Break => "break",
        Stmt::Continue => "continue",
        Stmt::Fail { .. } => "fail",
    }
}

/// Result of executing one machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MachineStep {
    Continue,
    Done,
}

/* ===================== Frame Management ===================== */

fn push_stmt(machine: &mut Machine, stmt: &Stmt) {
    let kind = match stmt {
        Stmt::Block { .. } => FrameKind::Block { idx: 0 },
        Stmt::Store { slot, .. } => FrameKind::Store { slot: *slot },
        Stmt::Expr { .. } => FrameKind::ExprStmt,
        Stmt::If { .. } => FrameKind::If,
        Stmt::While { .. } => FrameKind::While,
        Stmt::Return { .. } => FrameKind::Return,
        Stmt::Break => FrameKind::BreakStmt,
        Stmt::Continue => FrameKind::ContinueStmt,
        Stmt::Fail { .. } => FrameKind::FailStmt,
    };
    machine.frames.push(StepFrame {
        kind,
        node: stmt.clone(),
    });
}

/* ===================== Step Loop ===================== */

/// Execute one step: unwind if control flow is active, otherwise dispatch
/// the top frame.
pub(crate) fn step(machine: &mut Machine, ctx: &mut Context, env: &RuntimeEnvironment) -> MachineStep {
    if !matches!(machine.control, Control::None) {
        return unwind(machine, ctx);
    }

    let Some(top) = machine.frames.last() else {
        // No frames left: the body ended without an explicit return.
        return MachineStep::Done;
    };
    let (kind, node) = (top.kind.clone(), top.node.clone());

    match (kind, node) {
        (FrameKind::Block { idx }, Stmt::Block { body }) => execute_block(machine, idx, &body),
        (FrameKind::Store { slot }, Stmt::Store { expr, .. }) => {
            execute_store(machine, ctx, env, slot, &expr)
        }
        (FrameKind::ExprStmt, Stmt::Expr { expr }) => execute_expr_stmt(machine, ctx, env, &expr),
        (FrameKind::If, Stmt::If { test, then_s, else_s }) => {
            execute_if(machine, ctx, &test, &then_s, else_s.as_deref())
        }
        (FrameKind::While, Stmt::While { test, body }) => execute_while(machine, ctx, &test, &body),
        (FrameKind::Return, Stmt::Return { value }) => {
            execute_return(machine, ctx, env, value.as_ref())
        }
        (FrameKind::BreakStmt, Stmt::Break) => {
            machine.frames.pop();
            machine.control = Control::Break;
            MachineStep::Continue
        }
        (FrameKind::ContinueStmt, Stmt::Continue) => {
            machine.frames.pop();
            machine.control = Control::Continue;
            MachineStep::Continue
        }
        (FrameKind::FailStmt, Stmt::Fail { message }) => execute_fail(machine, ctx, &message),
        (FrameKind::Call { .. }, _) => {
            // A call boundary with no callee frames above it means the callee
            // body ran out without returning: complete the call with null.
            machine.control = Control::Return(Value::Null);
            MachineStep::Continue
        }
        _ => {
            machine.control = Control::Fail(EngineError::execution(
                "internal: machine frame does not match its statement",
            ));
            MachineStep::Continue
        }
    }
}

/// Run until the machine suspends, completes, or fails.
pub(crate) fn run_machine(machine: &mut Machine, ctx: &mut Context, env: &RuntimeEnvironment) {
    loop {
        match step(machine, ctx, env) {
            MachineStep::Continue => continue,
            MachineStep::Done => break,
        }
    }
}

/* ===================== Statement Handlers ===================== */

fn execute_block(machine: &mut Machine, idx: usize, body: &[Stmt]) -> MachineStep {
    if idx >= body.len() {
        machine.frames.pop();
        return MachineStep::Continue;
    }

    let frame_idx = machine.frames.len() - 1;
    machine.frames[frame_idx].kind = FrameKind::Block { idx: idx + 1 };
    push_stmt(machine, &body[idx]);
    MachineStep::Continue
}

fn execute_store(
    machine: &mut Machine,
    ctx: &mut Context,
    env: &RuntimeEnvironment,
    slot: usize,
    expr: &Expr,
) -> MachineStep {
    match eval_top(ctx, expr) {
        Ok(TopOutcome::Value(v)) => {
            let Some(frame) = ctx.control_stack.current_frame_mut() else {
                return fail_internal(machine, "no active frame");
            };
            match frame.locals.get_mut(slot) {
                Some(dst) => *dst = v,
                None => {
                    return fail_internal(machine, &format!("store slot {} out of range", slot))
                }
            }
            machine.frames.pop();
            MachineStep::Continue
        }
        Ok(TopOutcome::Suspend(pending)) => suspend(machine, pending),
        Ok(TopOutcome::Call(call)) => begin_call(machine, ctx, env, call, Dest::Local(slot)),
        Err(e) => {
            machine.control = Control::Fail(e);
            MachineStep::Continue
        }
    }
}

fn execute_expr_stmt(
    machine: &mut Machine,
    ctx: &mut Context,
    env: &RuntimeEnvironment,
    expr: &Expr,
) -> MachineStep {
    match eval_top(ctx, expr) {
        Ok(TopOutcome::Value(_)) => {
            machine.frames.pop();
            MachineStep::Continue
        }
        Ok(TopOutcome::Suspend(pending)) => suspend(machine, pending),
        Ok(TopOutcome::Call(call)) => begin_call(machine, ctx, env, call, Dest::Discard),
        Err(e) => {
            machine.control = Control::Fail(e);
            MachineStep::Continue
        }
    }
}

fn execute_if(
    machine: &mut Machine,
    ctx: &mut Context,
    test: &Expr,
    then_s: &Stmt,
    else_s: Option<&Stmt>,
) -> MachineStep {
    let Some(frame) = ctx.control_stack.current_frame() else {
        return fail_internal(machine, "no active frame");
    };
    match eval_pure(test, frame) {
        Ok(v) => {
            machine.frames.pop();
            if v.is_truthy() {
                push_stmt(machine, then_s);
            } else if let Some(else_s) = else_s {
                push_stmt(machine, else_s);
            }
            MachineStep::Continue
        }
        Err(e) => {
            machine.control = Control::Fail(e);
            MachineStep::Continue
        }
    }
}

fn execute_while(
    machine: &mut Machine,
    ctx: &mut Context,
    test: &Expr,
    body: &Stmt,
) -> MachineStep {
    let Some(frame) = ctx.control_stack.current_frame() else {
        return fail_internal(machine, "no active frame");
    };
    match eval_pure(test, frame) {
        Ok(v) => {
            if v.is_truthy() {
                // Keep the while frame; each iteration runs as a child.
                push_stmt(machine, body);
            } else {
                machine.frames.pop();
            }
            MachineStep::Continue
        }
        Err(e) => {
            machine.control = Control::Fail(e);
            MachineStep::Continue
        }
    }
}

fn execute_return(
    machine: &mut Machine,
    ctx: &mut Context,
    env: &RuntimeEnvironment,
    value: Option<&Expr>,
) -> MachineStep {
    let Some(expr) = value else {
        machine.frames.pop();
        machine.control = Control::Return(Value::Null);
        return MachineStep::Continue;
    };

    match eval_top(ctx, expr) {
        Ok(TopOutcome::Value(v)) => {
            machine.frames.pop();
            machine.control = Control::Return(v);
            MachineStep::Continue
        }
        // Do not pop: the frame must survive for resumption.
        Ok(TopOutcome::Suspend(pending)) => suspend(machine, pending),
        Ok(TopOutcome::Call(call)) => begin_call(machine, ctx, env, call, Dest::Propagate),
        Err(e) => {
            machine.control = Control::Fail(e);
            MachineStep::Continue
        }
    }
}

fn execute_fail(machine: &mut Machine, ctx: &mut Context, message: &Expr) -> MachineStep {
    let Some(frame) = ctx.control_stack.current_frame() else {
        return fail_internal(machine, "no active frame");
    };
    machine.control = match eval_pure(message, frame) {
        Ok(v) => Control::Fail(EngineError::execution(render_message(&v))),
        Err(e) => Control::Fail(e),
    };
    MachineStep::Continue
}

fn suspend(machine: &mut Machine, pending: PendingOp) -> MachineStep {
    machine.control = Control::Suspend(pending);
    MachineStep::Done
}

fn fail_internal(machine: &mut Machine, reason: &str) -> MachineStep {
    machine.control = Control::Fail(EngineError::execution(format!("internal: {}", reason)));
    MachineStep::Continue
}

/* ===================== Calls ===================== */

struct CallRequest {
    package: String,
    function: String,
    args: Vec<Value>,
}

fn begin_call(
    machine: &mut Machine,
    ctx: &mut Context,
    env: &RuntimeEnvironment,
    call: CallRequest,
    dest: Dest,
) -> MachineStep {
    if ctx.is_cancelled() {
        machine.control = Control::Fail(EngineError::Cancelled);
        return MachineStep::Continue;
    }

    let unit = match env.lookup_function(&call.package, &call.function) {
        Ok(unit) => unit.clone(),
        Err(e) => {
            machine.control = Control::Fail(e);
            return MachineStep::Continue;
        }
    };

    let frame = match new_frame(unit.info.clone(), call.args) {
        Ok(frame) => frame,
        Err(e) => {
            machine.control = Control::Fail(e);
            return MachineStep::Continue;
        }
    };

    ctx.control_stack.push_frame(frame);
    let frame_idx = machine.frames.len() - 1;
    machine.frames[frame_idx].kind = FrameKind::Call { dest };
    push_stmt(machine, &unit.body);
    MachineStep::Continue
}

/* ===================== Top-Level Expression Evaluation ===================== */

enum TopOutcome {
    Value(Value),
    Suspend(PendingOp),
    Call(CallRequest),
}

/// Evaluate the outermost expression of a statement. Blocking ops first
/// consume a previously injected resume result from their temp slot; calls
/// are surfaced to the step loop so it can push the boundary frames.
fn eval_top(ctx: &mut Context, expr: &Expr) -> Result<TopOutcome, EngineError> {
    let frame = ctx
        .control_stack
        .current_frame_mut()
        .ok_or_else(|| EngineError::execution("internal: no active frame"))?;

    match expr {
        Expr::Blocking { op, args, temp_slot } => {
            let slot = frame
                .temps
                .get_mut(*temp_slot)
                .ok_or_else(|| {
                    EngineError::execution(format!("internal: temp slot {} out of range", temp_slot))
                })?;
            if let Some(v) = slot.take() {
                return Ok(TopOutcome::Value(v));
            }

            let values: Result<Vec<Value>, EngineError> =
                args.iter().map(|a| eval_pure(a, frame)).collect();
            Ok(TopOutcome::Suspend(PendingOp {
                op: op.clone(),
                args: values?,
                temp_slot: *temp_slot,
            }))
        }
        Expr::Call { package, function, args } => {
            let values: Result<Vec<Value>, EngineError> =
                args.iter().map(|a| eval_pure(a, frame)).collect();
            Ok(TopOutcome::Call(CallRequest {
                package: package.clone(),
                function: function.clone(),
                args: values?,
            }))
        }
        other => eval_pure(other, frame).map(TopOutcome::Value),
    }
}

/* ===================== Unwinding ===================== */

fn unwind(machine: &mut Machine, ctx: &mut Context) -> MachineStep {
    let control = std::mem::replace(&mut machine.control, Control::None);
    match control {
        Control::Return(v) => unwind_return(machine, ctx, v),

        Control::Break => {
            while let Some(frame) = machine.frames.pop() {
                match frame.kind {
                    FrameKind::While => return MachineStep::Continue,
                    FrameKind::Call { .. } => {
                        return fail_internal(machine, "break crossed a call boundary")
                    }
                    _ => {}
                }
            }
            fail_internal(machine, "break with no enclosing loop")
        }

        Control::Continue => {
            while let Some(frame) = machine.frames.last() {
                match frame.kind {
                    // Keep the while frame: it re-evaluates its test next.
                    FrameKind::While => return MachineStep::Continue,
                    FrameKind::Call { .. } => {
                        return fail_internal(machine, "continue crossed a call boundary")
                    }
                    _ => {
                        machine.frames.pop();
                    }
                }
            }
            fail_internal(machine, "continue with no enclosing loop")
        }

        Control::Fail(e) => {
            // No handler inside this core: clear machine frames and report.
            // Context frames are left in place so the caller can render a
            // call-stack trace while unwinding them.
            machine.frames.clear();
            machine.control = Control::Fail(e);
            MachineStep::Done
        }

        Control::Suspend(pending) => {
            machine.control = Control::Suspend(pending);
            MachineStep::Done
        }

        Control::None => fail_internal(machine, "unwind with no active control flow"),
    }
}

fn unwind_return(machine: &mut Machine, ctx: &mut Context, value: Value) -> MachineStep {
    while let Some(frame) = machine.frames.pop() {
        if let FrameKind::Call { dest } = frame.kind {
            // Leaving the callee: its stack frame comes off the context.
            match ctx.control_stack.pop_frame() {
                Ok(mut callee) => callee.returns[0] = value.clone(),
                Err(e) => {
                    machine.control = Control::Fail(e);
                    return MachineStep::Continue;
                }
            }
            match dest {
                Dest::Local(slot) => {
                    let Some(caller) = ctx.control_stack.current_frame_mut() else {
                        return fail_internal(machine, "no caller frame after return");
                    };
                    match caller.locals.get_mut(slot) {
                        Some(dst) => *dst = value,
                        None => {
                            return fail_internal(
                                machine,
                                &format!("store slot {} out of range", slot),
                            )
                        }
                    }
                }
                Dest::Discard => {}
                Dest::Propagate => machine.control = Control::Return(value),
            }
            return MachineStep::Continue;
        }
    }

    // No call boundary left: the root unit returned.
    if let Some(root) = ctx.control_stack.current_frame_mut() {
        root.returns[0] = value.clone();
    }
    machine.control = Control::Return(value);
    MachineStep::Done
}

/* ===================== Strategy ===================== */

/// The suspendable strategy: decomposes execution into non-blocking steps
/// and yields a resume token at every blocking operation.
#[derive(Debug)]
pub struct NonBlockingExecutor {
    env: Arc<RuntimeEnvironment>,
}

impl NonBlockingExecutor {
    pub fn new(env: Arc<RuntimeEnvironment>) -> Self {
        NonBlockingExecutor { env }
    }

    pub fn continue_execution(&self, ctx: &mut Context, unit: &Unit) -> ExecResult {
        let mut machine = Machine::for_body(&unit.body);
        run_machine(&mut machine, ctx, &self.env);
        machine_outcome(machine, ctx)
    }

    pub fn resume(&self, ctx: &mut Context, token: ResumeToken, value: Value) -> ExecResult {
        let mut machine = match inject_resume(ctx, token, value) {
            Ok(machine) => machine,
            Err(e) => return ExecResult::Failed(e),
        };
        run_machine(&mut machine, ctx, &self.env);
        machine_outcome(machine, ctx)
    }
}

/// Cancellation gate + temp-slot injection shared by NonBlocking and Debug.
pub(crate) fn inject_resume(
    ctx: &mut Context,
    token: ResumeToken,
    value: Value,
) -> Result<Machine, EngineError> {
    if ctx.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let frame = ctx
        .control_stack
        .current_frame_mut()
        .ok_or_else(|| EngineError::InvalidResume("no active frame".into()))?;
    let slot = frame
        .temps
        .get_mut(token.pending.temp_slot)
        .ok_or_else(|| EngineError::InvalidResume("temp slot out of range".into()))?;
    *slot = Some(value);

    Ok(token.machine)
}

/// Translate the stopped machine into the strategy contract result.
pub(crate) fn machine_outcome(mut machine: Machine, ctx: &Context) -> ExecResult {
    match std::mem::replace(&mut machine.control, Control::None) {
        Control::Return(v) => ExecResult::Completed(v),
        Control::None => ExecResult::Completed(Value::Null),
        Control::Fail(e) => ExecResult::Failed(e),
        Control::Suspend(pending) => {
            // Cancellation checkpoint at the suspension boundary.
            if ctx.is_cancelled() {
                return ExecResult::Failed(EngineError::Cancelled);
            }
            ExecResult::Suspended(ResumeToken {
                id: Uuid::new_v4(),
                pending,
                machine,
            })
        }
        Control::Break | Control::Continue => ExecResult::Failed(EngineError::execution(
            "internal: machine stopped with loop control active",
        )),
    }
}
