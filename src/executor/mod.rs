//! Execution strategies
//!
//! One polymorphic execution contract over a closed set of strategies:
//!
//! - **Direct**: synchronous tree walk; blocking operations occupy the
//!   calling thread until done
//! - **NonBlocking**: resumable statement-frame machine; blocking
//!   operations yield a resume token instead of occupying a thread
//! - **Debug**: wraps the non-blocking stepping machine with a
//!   pause-before-statement gate against a remote control channel
//!
//! A strategy is selected once per context at construction time and can be
//! rebound through `Context::set_executor` (e.g. installing Debug).

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::context::Context;
use crate::debug::DebugSession;
use crate::env::{RuntimeEnvironment, Unit};
use crate::errors::EngineError;
use crate::values::Value;

pub mod debugger;
pub mod direct;
mod eval;
pub mod non_blocking;

#[cfg(test)]
mod tests;

pub use debugger::DebugExecutor;
pub use direct::DirectExecutor;
pub use non_blocking::NonBlockingExecutor;

/// The blocking operation a suspended execution is waiting on, with its
/// arguments already evaluated.
#[derive(Debug, Clone)]
pub struct PendingOp {
    pub op: String,
    pub args: Vec<Value>,
    pub(crate) temp_slot: usize,
}

/// Opaque capture of where and how to continue a suspended execution.
pub struct ResumeToken {
    pub id: Uuid,
    pub pending: PendingOp,
    pub(crate) machine: non_blocking::Machine,
}

impl std::fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeToken")
            .field("id", &self.id)
            .field("pending", &self.pending)
            .finish()
    }
}

/// Result of driving a callable unit's body against a context.
#[derive(Debug)]
pub enum ExecResult {
    Completed(Value),
    Suspended(ResumeToken),
    Failed(EngineError),
}

/// Closed set of execution strategies behind one contract.
#[derive(Debug)]
pub enum ExecutionStrategy {
    Direct(DirectExecutor),
    NonBlocking(NonBlockingExecutor),
    Debug(DebugExecutor),
}

impl ExecutionStrategy {
    pub fn direct(env: Arc<RuntimeEnvironment>) -> Arc<Self> {
        Arc::new(ExecutionStrategy::Direct(DirectExecutor::new(env)))
    }

    pub fn non_blocking(env: Arc<RuntimeEnvironment>) -> Arc<Self> {
        Arc::new(ExecutionStrategy::NonBlocking(NonBlockingExecutor::new(env)))
    }

    pub fn debug(env: Arc<RuntimeEnvironment>, session: Arc<DebugSession>) -> Arc<Self> {
        Arc::new(ExecutionStrategy::Debug(DebugExecutor::new(env, session)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStrategy::Direct(_) => "direct",
            ExecutionStrategy::NonBlocking(_) => "non-blocking",
            ExecutionStrategy::Debug(_) => "debug",
        }
    }

    /// Strategies that occupy the calling thread for whole steps; these are
    /// driven on a blocking thread, not on the async runtime.
    pub fn occupies_thread(&self) -> bool {
        matches!(
            self,
            ExecutionStrategy::Direct(_) | ExecutionStrategy::Debug(_)
        )
    }

    /// Walk the unit's body against the context's current frame.
    ///
    /// The caller has already pushed the invocation frame; `Completed` and
    /// `Failed` leave the frame for the caller to pop or unwind.
    pub fn continue_execution(&self, ctx: &mut Context, unit: &Unit) -> ExecResult {
        match self {
            ExecutionStrategy::Direct(e) => e.continue_execution(ctx, unit),
            ExecutionStrategy::NonBlocking(e) => e.continue_execution(ctx, unit),
            ExecutionStrategy::Debug(e) => e.continue_execution(ctx, unit),
        }
    }

    /// Re-enter a suspended execution at its suspension point, injecting the
    /// completed result of the awaited operation.
    pub fn resume(&self, ctx: &mut Context, token: ResumeToken, value: Value) -> ExecResult {
        match self {
            ExecutionStrategy::Direct(_) => ExecResult::Failed(EngineError::InvalidResume(
                "direct strategy never suspends".into(),
            )),
            ExecutionStrategy::NonBlocking(e) => e.resume(ctx, token, value),
            ExecutionStrategy::Debug(e) => e.resume(ctx, token, value),
        }
    }
}

/// Complete a pending blocking operation on the async runtime: wait out
/// whatever real delay the op implies, then compute its result. This is the
/// same native table Direct execution uses, so results are identical.
pub async fn complete_pending(
    env: &RuntimeEnvironment,
    pending: &PendingOp,
) -> Result<Value, EngineError> {
    let op = env.natives().lookup(&pending.op).ok_or_else(|| {
        EngineError::execution(format!("unknown blocking operation '{}'", pending.op))
    })?;

    let wait = (op.wait_ms)(&pending.args);
    if wait > 0 {
        tokio::time::sleep(Duration::from_millis(wait)).await;
    }
    (op.apply)(&pending.args)
}

/// Drive one invocation to completion: execute, complete each pending
/// operation on the runtime, and resume, until the unit completes or fails.
///
/// Thread-occupying strategies (Direct, Debug) run their steps on a blocking
/// thread; the non-blocking strategy runs inline, releasing the thread
/// between steps.
pub async fn drive(
    strategy: Arc<ExecutionStrategy>,
    mut ctx: Context,
    unit: Arc<Unit>,
    env: Arc<RuntimeEnvironment>,
) -> (Context, Result<Value, EngineError>) {
    let mut outcome = if strategy.occupies_thread() {
        let s = strategy.clone();
        let u = unit.clone();
        match tokio::task::spawn_blocking(move || {
            let r = s.continue_execution(&mut ctx, &u);
            (ctx, r)
        })
        .await
        {
            Ok((c, r)) => {
                ctx = c;
                r
            }
            Err(join) => {
                return (
                    Context::new(),
                    Err(EngineError::execution(format!("executor panicked: {}", join))),
                )
            }
        }
    } else {
        strategy.continue_execution(&mut ctx, &unit)
    };

    loop {
        match outcome {
            ExecResult::Completed(value) => return (ctx, Ok(value)),
            ExecResult::Failed(err) => return (ctx, Err(err)),
            ExecResult::Suspended(token) => {
                let cancellation = ctx.cancellation().clone();
                let value = tokio::select! {
                    _ = cancellation.cancelled() => {
                        return (ctx, Err(EngineError::Cancelled));
                    }
                    completed = complete_pending(&env, &token.pending) => match completed {
                        Ok(v) => v,
                        Err(e) => return (ctx, Err(e)),
                    },
                };

                outcome = if strategy.occupies_thread() {
                    let s = strategy.clone();
                    match tokio::task::spawn_blocking(move || {
                        let r = s.resume(&mut ctx, token, value);
                        (ctx, r)
                    })
                    .await
                    {
                        Ok((c, r)) => {
                            ctx = c;
                            r
                        }
                        Err(join) => {
                            return (
                                Context::new(),
                                Err(EngineError::execution(format!(
                                    "executor panicked: {}",
                                    join
                                ))),
                            )
                        }
                    }
                } else {
                    strategy.resume(&mut ctx, token, value)
                };
            }
        }
    }
}
