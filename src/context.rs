//! Control stack and invocation context
//!
//! A `Context` is one logical invocation of the runtime: one `main` run or
//! one inbound service request. It owns exactly one control stack, the
//! strategy bound to it, a failure slot used while unwinding, and a
//! cancellation token checked at suspension checkpoints. Contexts never
//! share stacks; interleaving is only visible across contexts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::executor::ExecutionStrategy;
use crate::frame::StackFrame;

/// Ordered stack of frames for one context, last-in currently executing.
#[derive(Debug, Default)]
pub struct ControlStack {
    frames: Vec<StackFrame>,
}

impl ControlStack {
    pub fn new() -> Self {
        ControlStack { frames: Vec::new() }
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Pop the current frame. An empty pop is a fatal consistency violation.
    pub fn pop_frame(&mut self) -> Result<StackFrame, EngineError> {
        self.frames.pop().ok_or(EngineError::StackUnderflow)
    }

    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Unwind every remaining frame, rendering one trace line per frame,
    /// innermost first. Leaves the stack empty.
    pub fn drain_trace(&mut self) -> Vec<String> {
        let mut trace = Vec::with_capacity(self.frames.len());
        while let Some(frame) = self.frames.pop() {
            trace.push(format!(
                "at {} ({})",
                frame.info.qualified_name(),
                frame.info.location
            ));
        }
        trace
    }
}

/// One logical invocation's execution state.
#[derive(Debug)]
pub struct Context {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub control_stack: ControlStack,
    strategy: Option<Arc<ExecutionStrategy>>,
    failure: Option<EngineError>,
    cancellation: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Context {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            control_stack: ControlStack::new(),
            strategy: None,
            failure: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Rebind the active execution strategy (e.g. switching to Debug).
    pub fn set_executor(&mut self, strategy: Arc<ExecutionStrategy>) {
        self.strategy = Some(strategy);
    }

    pub fn executor(&self) -> Option<&Arc<ExecutionStrategy>> {
        self.strategy.as_ref()
    }

    /// Record a failure for unwinding propagation.
    pub fn record_failure(&mut self, err: EngineError) {
        self.failure = Some(err);
    }

    pub fn take_failure(&mut self) -> Option<EngineError> {
        self.failure.take()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
