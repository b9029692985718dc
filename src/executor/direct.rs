//! Direct (blocking) execution
//!
//! Synchronous recursive tree walk over a unit's body. Blocking operations
//! occupy the calling thread for their whole duration, so this strategy
//! never suspends and never produces a resume token. It resolves natives
//! through the same table the suspendable machine uses, so both strategies
//! observe identical results for the same body and arguments.

use std::sync::Arc;
use std::time::Duration;

use super::eval::{eval_pure, render_message};
use super::ExecResult;
use crate::context::Context;
use crate::env::{RuntimeEnvironment, Unit};
use crate::errors::EngineError;
use crate::frame::new_frame;
use crate::program::{Expr, Stmt};
use crate::values::Value;

/// How a statement left the walk.
enum FlowSignal {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug)]
pub struct DirectExecutor {
    env: Arc<RuntimeEnvironment>,
}

impl DirectExecutor {
    pub fn new(env: Arc<RuntimeEnvironment>) -> Self {
        DirectExecutor { env }
    }

    pub fn continue_execution(&self, ctx: &mut Context, unit: &Unit) -> ExecResult {
        match self.exec_stmt(ctx, &unit.body) {
            Ok(FlowSignal::Return(v)) => self.complete(ctx, v),
            Ok(_) => self.complete(ctx, Value::Null),
            Err(e) => ExecResult::Failed(e),
        }
    }

    fn complete(&self, ctx: &mut Context, value: Value) -> ExecResult {
        if let Some(frame) = ctx.control_stack.current_frame_mut() {
            frame.returns[0] = value.clone();
        }
        ExecResult::Completed(value)
    }

    fn exec_stmt(&self, ctx: &mut Context, stmt: &Stmt) -> Result<FlowSignal, EngineError> {
        match stmt {
            Stmt::Block { body } => {
                for child in body {
                    match self.exec_stmt(ctx, child)? {
                        FlowSignal::Normal => {}
                        other => return Ok(other),
                    }
                }
                Ok(FlowSignal::Normal)
            }
            Stmt::Store { slot, expr } => {
                let value = self.eval_top(ctx, expr)?;
                let frame = ctx
                    .control_stack
                    .current_frame_mut()
                    .ok_or_else(|| EngineError::execution("internal: no active frame"))?;
                match frame.locals.get_mut(*slot) {
                    Some(dst) => *dst = value,
                    None => {
                        return Err(EngineError::execution(format!(
                            "store slot {} out of range",
                            slot
                        )))
                    }
                }
                Ok(FlowSignal::Normal)
            }
            Stmt::Expr { expr } => {
                self.eval_top(ctx, expr)?;
                Ok(FlowSignal::Normal)
            }
            Stmt::If { test, then_s, else_s } => {
                let test = self.eval_test(ctx, test)?;
                if test {
                    self.exec_stmt(ctx, then_s)
                } else if let Some(else_s) = else_s {
                    self.exec_stmt(ctx, else_s)
                } else {
                    Ok(FlowSignal::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval_test(ctx, test)? {
                    if ctx.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    match self.exec_stmt(ctx, body)? {
                        FlowSignal::Normal | FlowSignal::Continue => {}
                        FlowSignal::Break => break,
                        ret @ FlowSignal::Return(_) => return Ok(ret),
                    }
                }
                Ok(FlowSignal::Normal)
            }
            Stmt::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval_top(ctx, expr)?,
                    None => Value::Null,
                };
                Ok(FlowSignal::Return(value))
            }
            Stmt::Break => Ok(FlowSignal::Break),
            Stmt::Continue => Ok(FlowSignal::Continue),
            Stmt::Fail { message } => {
                let frame = ctx
                    .control_stack
                    .current_frame()
                    .ok_or_else(|| EngineError::execution("internal: no active frame"))?;
                let value = eval_pure(message, frame)?;
                Err(EngineError::execution(render_message(&value)))
            }
        }
    }

    fn eval_test(&self, ctx: &Context, test: &Expr) -> Result<bool, EngineError> {
        let frame = ctx
            .control_stack
            .current_frame()
            .ok_or_else(|| EngineError::execution("internal: no active frame"))?;
        Ok(eval_pure(test, frame)?.is_truthy())
    }

    /// Outermost statement expression: blocking ops run in place, calls
    /// push and pop real stack frames.
    fn eval_top(&self, ctx: &mut Context, expr: &Expr) -> Result<Value, EngineError> {
        match expr {
            Expr::Blocking { op, args, .. } => {
                let frame = ctx
                    .control_stack
                    .current_frame()
                    .ok_or_else(|| EngineError::execution("internal: no active frame"))?;
                let values: Result<Vec<Value>, EngineError> =
                    args.iter().map(|a| eval_pure(a, frame)).collect();
                let values = values?;

                let native = self.env.natives().lookup(op).ok_or_else(|| {
                    EngineError::execution(format!("unknown blocking operation '{}'", op))
                })?;
                let wait = (native.wait_ms)(&values);
                if wait > 0 {
                    std::thread::sleep(Duration::from_millis(wait));
                }
                (native.apply)(&values)
            }
            Expr::Call { package, function, args } => {
                if ctx.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }

                let frame = ctx
                    .control_stack
                    .current_frame()
                    .ok_or_else(|| EngineError::execution("internal: no active frame"))?;
                let values: Result<Vec<Value>, EngineError> =
                    args.iter().map(|a| eval_pure(a, frame)).collect();

                let callee = self.env.lookup_function(package, function)?.clone();
                ctx.control_stack.push_frame(new_frame(callee.info.clone(), values?)?);

                let value = match self.exec_stmt(ctx, &callee.body)? {
                    FlowSignal::Return(v) => v,
                    _ => Value::Null,
                };
                // On success the callee frame comes off; on error it stays
                // on the stack for trace rendering.
                ctx.control_stack.pop_frame()?;
                Ok(value)
            }
            other => {
                let frame = ctx
                    .control_stack
                    .current_frame()
                    .ok_or_else(|| EngineError::execution("internal: no active frame"))?;
                eval_pure(other, frame)
            }
        }
    }
}
