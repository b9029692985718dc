//! Program runner
//!
//! Top-level orchestration for the two entry modes: hosting a program's
//! declared services and running its `main`. Both build the shared runtime
//! environment (failing fast on malformed bodies), pick the strategy the
//! configuration asks for, and hand execution to the strategy contract.

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use tracing::{error, info};

use crate::config::{Config, ExecMode};
use crate::context::Context;
use crate::debug::{DebugEvent, DebugManager};
use crate::env::RuntimeEnvironment;
use crate::errors::EngineError;
use crate::executor::{self, ExecutionStrategy};
use crate::frame::new_frame;
use crate::program::Program;
use crate::registry::{DispatcherRegistry, ResourceInvoker};
use crate::values::Value;

/// Handle to a program whose services are up.
#[derive(Debug)]
pub struct StartedServices {
    pub env: Arc<RuntimeEnvironment>,
    pub invoker: Arc<ResourceInvoker>,
    /// Bound debug port, when debugging is enabled.
    pub debug_port: Option<u16>,
}

pub struct ProgramRunner {
    config: Config,
    registry: DispatcherRegistry,
}

impl ProgramRunner {
    pub fn new(config: Config, registry: DispatcherRegistry) -> Self {
        ProgramRunner { config, registry }
    }

    /// Bring up every service the program declares. Registering nothing is
    /// an error, checked before any other work. Does not block; the
    /// dispatchers own their listeners.
    pub async fn start_services(&self, program: &Program) -> Result<StartedServices> {
        if program.service_count() == 0 {
            return Err(EngineError::NoServicesFound {
                program: program.name.clone(),
            }
            .into());
        }

        let env = RuntimeEnvironment::build(program)
            .with_context(|| format!("failed to load program '{}'", program.name))?;

        let mode = self.config.mode();
        let debug = match mode {
            ExecMode::Debug => {
                let manager = DebugManager::new(self.config.debug.port);
                let port = manager
                    .init()
                    .await
                    .context("failed to start debug listener")?;
                Some((manager, port))
            }
            _ => None,
        };
        let debug_port = debug.as_ref().map(|(_, port)| *port);
        let manager = debug.map(|(manager, _)| manager);

        let invoker = ResourceInvoker::new(env.clone(), mode, manager);
        self.registry.register_services(&env, &invoker);

        info!(
            program = %program.name,
            services = env.service_count(),
            dispatchers = self.registry.dispatcher_count(),
            strategy = ?mode,
            "services started"
        );

        Ok(StartedServices {
            env,
            invoker,
            debug_port,
        })
    }

    /// Run the program's `main` with the given command-line arguments and
    /// return its result. The arguments arrive in the entry frame as one
    /// array of strings in slot 0.
    pub async fn run_main(&self, program: &Program, args: Vec<String>) -> Result<Value> {
        let env = RuntimeEnvironment::build(program)
            .with_context(|| format!("failed to load program '{}'", program.name))?;
        let entry = env.entry_function()?.clone();

        let (strategy, debug) = match self.config.mode() {
            ExecMode::Direct => (ExecutionStrategy::direct(env.clone()), None),
            ExecMode::NonBlocking => (ExecutionStrategy::non_blocking(env.clone()), None),
            ExecMode::Debug => {
                let manager = DebugManager::new(self.config.debug.port);
                let port = manager
                    .init()
                    .await
                    .context("failed to start debug listener")?;
                info!(port, "waiting for a debug client to attach");
                manager.wait_till_client_connect().await;

                let session = manager
                    .session()
                    .context("debug client attached without a session")?;
                let strategy = ExecutionStrategy::debug(env.clone(), session);
                manager.set_debugger(strategy.clone());
                (strategy, Some(manager))
            }
        };

        let mut ctx = Context::new();
        ctx.set_executor(strategy.clone());
        ctx.control_stack
            .push_frame(new_frame(entry.info.clone(), vec![Value::string_array(args)])?);

        info!(
            program = %program.name,
            context = %ctx.id,
            strategy = strategy.name(),
            "running main"
        );

        let (mut ctx, result) =
            executor::drive(strategy, ctx, entry.clone(), env.clone()).await;
        let outcome = match result {
            Ok(value) => {
                ctx.control_stack.pop_frame()?;
                info!(context = %ctx.id, result = %value, "main completed");
                if let Some(manager) = &debug {
                    if let Some(session) = manager.session() {
                        session.emit(DebugEvent::Completed {
                            result: value.to_string(),
                        });
                    }
                }
                Ok(value)
            }
            Err(err) => {
                let trace = ctx.control_stack.drain_trace();
                error!(
                    context = %ctx.id,
                    started_at = %ctx.created_at,
                    error = %err,
                    "main failed"
                );
                if let Some(manager) = &debug {
                    if let Some(session) = manager.session() {
                        session.emit(DebugEvent::Failed {
                            message: err.to_string(),
                        });
                    }
                }
                Err(EngineError::RuntimeFailure {
                    message: err.to_string(),
                    trace,
                }
                .into())
            }
        };

        if let Some(manager) = debug {
            // Let the client drain the event stream and detach before the
            // session is dropped.
            manager.hold_on().await;
            manager.end_session();
        }
        outcome
    }
}

impl std::fmt::Debug for ProgramRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramRunner")
            .field("mode", &self.config.mode())
            .finish()
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
