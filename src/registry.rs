//! Service registration and resource invocation
//!
//! Protocol dispatchers are external collaborators: they own listeners and
//! request parsing, the engine owns execution. At program start every
//! declared service is announced to every registered dispatcher along with
//! an invoker handle bound to the shared runtime environment. Inbound
//! requests come back through that handle and execute under the configured
//! strategy in a context of their own, so one request's failure never
//! reaches another.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ExecMode;
use crate::context::Context;
use crate::debug::DebugManager;
use crate::env::{RuntimeEnvironment, ServiceUnit};
use crate::errors::EngineError;
use crate::executor::{self, ExecutionStrategy};
use crate::frame::new_frame;
use crate::values::Value;

/// One service handed to one dispatcher at startup.
pub struct ServiceRegistration {
    pub service: Arc<ServiceUnit>,
    pub invoker: Arc<ResourceInvoker>,
}

/// Implemented by protocol frontends (HTTP, queues, ...). The engine calls
/// `service_registered` once per declared service at program start.
pub trait ServiceDispatcher: Send + Sync {
    fn protocol(&self) -> &str;
    fn service_registered(&self, registration: ServiceRegistration);
}

/// Startup-constructed set of protocol dispatchers.
#[derive(Default)]
pub struct DispatcherRegistry {
    dispatchers: Vec<Arc<dyn ServiceDispatcher>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        DispatcherRegistry {
            dispatchers: Vec::new(),
        }
    }

    pub fn register_dispatcher(&mut self, dispatcher: Arc<dyn ServiceDispatcher>) {
        info!(protocol = dispatcher.protocol(), "dispatcher registered");
        self.dispatchers.push(dispatcher);
    }

    pub fn dispatcher_count(&self) -> usize {
        self.dispatchers.len()
    }

    /// Announce every declared service to every dispatcher, in declaration
    /// order.
    pub fn register_services(&self, env: &Arc<RuntimeEnvironment>, invoker: &Arc<ResourceInvoker>) {
        for service in env.services() {
            for dispatcher in &self.dispatchers {
                debug!(
                    service = %service.qualified_name(),
                    protocol = dispatcher.protocol(),
                    "registering service"
                );
                dispatcher.service_registered(ServiceRegistration {
                    service: service.clone(),
                    invoker: invoker.clone(),
                });
            }
            info!(
                service = %service.qualified_name(),
                resources = service.resource_count(),
                "service registered"
            );
        }
    }
}

impl std::fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("dispatchers", &self.dispatchers.len())
            .finish()
    }
}

/// Execution entry point handed to dispatchers. One `invoke` is one fresh
/// context with its own frame stack and cancellation token.
pub struct ResourceInvoker {
    env: Arc<RuntimeEnvironment>,
    mode: ExecMode,
    debug: Option<Arc<DebugManager>>,
}

impl ResourceInvoker {
    pub fn new(
        env: Arc<RuntimeEnvironment>,
        mode: ExecMode,
        debug: Option<Arc<DebugManager>>,
    ) -> Arc<Self> {
        Arc::new(ResourceInvoker { env, mode, debug })
    }

    fn strategy(&self) -> Arc<ExecutionStrategy> {
        match self.mode {
            ExecMode::Direct => ExecutionStrategy::direct(self.env.clone()),
            ExecMode::NonBlocking => ExecutionStrategy::non_blocking(self.env.clone()),
            ExecMode::Debug => {
                // Gated only while a client is attached; without a session
                // requests still run, just not gated.
                match self.debug.as_ref().and_then(|m| m.session()) {
                    Some(session) => ExecutionStrategy::debug(self.env.clone(), session),
                    None => ExecutionStrategy::non_blocking(self.env.clone()),
                }
            }
        }
    }

    /// Execute one resource for one inbound request.
    pub async fn invoke(
        &self,
        service: &str,
        resource: &str,
        args: Vec<Value>,
    ) -> Result<Value, EngineError> {
        let service_unit = self.env.service(service)?;
        let unit = service_unit
            .resource(resource)
            .ok_or_else(|| EngineError::UnknownResource {
                service: service.to_string(),
                resource: resource.to_string(),
            })?
            .clone();

        let strategy = self.strategy();
        let mut ctx = Context::new();
        ctx.set_executor(strategy.clone());
        ctx.control_stack.push_frame(new_frame(unit.info.clone(), args)?);

        debug!(
            context = %ctx.id,
            unit = %unit.info.qualified_name(),
            strategy = strategy.name(),
            "invoking resource"
        );
        let started = std::time::Instant::now();

        let (mut ctx, result) =
            executor::drive(strategy, ctx, unit.clone(), self.env.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                ctx.control_stack.pop_frame()?;
                debug!(
                    context = %ctx.id,
                    unit = %unit.info.qualified_name(),
                    duration_ms,
                    "resource completed"
                );
                Ok(value)
            }
            Err(err) => {
                let trace = ctx.control_stack.drain_trace();
                warn!(
                    context = %ctx.id,
                    unit = %unit.info.qualified_name(),
                    duration_ms,
                    error = %err,
                    "resource failed"
                );
                Err(EngineError::RuntimeFailure {
                    message: err.to_string(),
                    trace,
                })
            }
        }
    }
}

impl std::fmt::Debug for ResourceInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInvoker")
            .field("mode", &self.mode)
            .finish()
    }
}
