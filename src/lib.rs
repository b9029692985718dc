pub mod cli;
pub mod config;
pub mod context;
pub mod debug;
pub mod env;
pub mod errors;
pub mod executor;
pub mod flow;
pub mod frame;
pub mod program;
pub mod registry;
pub mod runner;
pub mod values;

// Re-export the embedding surface
pub use config::{Config, ExecMode};
pub use context::{Context, ControlStack};
pub use env::RuntimeEnvironment;
pub use errors::EngineError;
pub use executor::{ExecResult, ExecutionStrategy};
pub use program::{load_program, Program};
pub use registry::{DispatcherRegistry, ResourceInvoker, ServiceDispatcher, ServiceRegistration};
pub use runner::{ProgramRunner, StartedServices};
pub use values::Value;
