//! Debug execution
//!
//! Wraps the suspendable stepping machine with a pause gate: before each
//! statement the executor may stop, report its position over the debug
//! session, and block until the remote controller says how to proceed.
//! Because the gate sits between machine steps, blocking operations still
//! suspend and resume exactly as under the non-blocking strategy.
//!
//! The executor starts paused ("stepping"): the first statement does not
//! run until a command arrives. `Continue` switches to free running until
//! a breakpoint unit is entered; `Detach` releases the program entirely.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::non_blocking::{self, Machine, MachineStep};
use super::ExecResult;
use crate::context::Context;
use crate::debug::{DebugCommand, DebugEvent, DebugSession};
use crate::env::{RuntimeEnvironment, Unit};
use crate::values::Value;

#[derive(Debug)]
pub struct DebugExecutor {
    env: Arc<RuntimeEnvironment>,
    session: Arc<DebugSession>,
    /// Gate state: true while the controller is stepping statement by
    /// statement, false while free running.
    stepping: AtomicBool,
    /// Set by `Detach`: run to completion without gating or events.
    detached: AtomicBool,
    /// Stack depth at the last gate, for re-arming breakpoints on entry
    /// into a new callable unit.
    gate_depth: AtomicUsize,
}

impl DebugExecutor {
    pub fn new(env: Arc<RuntimeEnvironment>, session: Arc<DebugSession>) -> Self {
        DebugExecutor {
            env,
            session,
            stepping: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            gate_depth: AtomicUsize::new(0),
        }
    }

    pub fn continue_execution(&self, ctx: &mut Context, unit: &Unit) -> ExecResult {
        let mut machine = Machine::for_body(&unit.body);
        self.run_gated(&mut machine, ctx);
        non_blocking::machine_outcome(machine, ctx)
    }

    pub fn resume(&self, ctx: &mut Context, token: super::ResumeToken, value: Value) -> ExecResult {
        let mut machine = match non_blocking::inject_resume(ctx, token, value) {
            Ok(machine) => machine,
            Err(e) => return ExecResult::Failed(e),
        };
        self.run_gated(&mut machine, ctx);
        non_blocking::machine_outcome(machine, ctx)
    }

    fn run_gated(&self, machine: &mut Machine, ctx: &mut Context) {
        loop {
            if machine.at_statement() && !self.detached.load(Ordering::SeqCst) {
                self.gate(machine, ctx);
            }
            match non_blocking::step(machine, ctx, &self.env) {
                MachineStep::Continue => continue,
                MachineStep::Done => break,
            }
        }
    }

    /// Pause-before-statement gate. In free run, entering a callable unit
    /// whose qualified name carries a breakpoint re-arms stepping.
    fn gate(&self, machine: &Machine, ctx: &Context) {
        let depth = ctx.control_stack.depth();
        let unit_name = ctx
            .control_stack
            .current_frame()
            .map(|f| f.info.qualified_name())
            .unwrap_or_default();

        if !self.stepping.load(Ordering::SeqCst) {
            let entered_unit = depth > self.gate_depth.swap(depth, Ordering::SeqCst);
            if entered_unit && self.session.has_breakpoint(&unit_name) {
                self.stepping.store(true, Ordering::SeqCst);
                self.session.emit(DebugEvent::BreakpointHit {
                    unit: unit_name.clone(),
                });
            } else {
                return;
            }
        }
        self.gate_depth.store(depth, Ordering::SeqCst);

        self.session.emit(DebugEvent::Paused {
            unit: unit_name,
            statement: machine.current_statement_label().to_string(),
            depth,
        });

        match self.session.next_command() {
            DebugCommand::Step => {}
            DebugCommand::Continue => {
                self.stepping.store(false, Ordering::SeqCst);
                self.session.emit(DebugEvent::Resumed);
            }
            DebugCommand::Detach => {
                self.stepping.store(false, Ordering::SeqCst);
                self.detached.store(true, Ordering::SeqCst);
                self.session.emit(DebugEvent::Resumed);
            }
        }
    }
}

