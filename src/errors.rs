//! Engine error taxonomy
//!
//! Fatal startup errors (`NoServicesFound`, `FlowBuild`) abort program start.
//! Arity and stack consistency errors mean the compiler/runtime contract was
//! violated and the current invocation is unrecoverable. `Execution` carries a
//! program-level failure raised by user code; `Cancelled` is produced only at
//! suspension checkpoints. `RuntimeFailure` is the top-level wrapper the
//! runner surfaces for an uncaught main failure, trace included.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("no service(s) found in '{program}'")]
    NoServicesFound { program: String },

    #[error("flow build failed for '{unit}': {reason}")]
    FlowBuild { unit: String, reason: String },

    #[error("too many arguments for '{unit}': {supplied} supplied, frame has {slots} slot(s)")]
    Arity {
        unit: String,
        supplied: usize,
        slots: usize,
    },

    #[error("control stack underflow")]
    StackUnderflow,

    #[error("execution cancelled")]
    Cancelled,

    #[error("{message}")]
    Execution { message: String },

    #[error("unknown package '{0}'")]
    UnknownPackage(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("unknown resource '{resource}' on service '{service}'")]
    UnknownResource { service: String, resource: String },

    #[error("no entry function 'main' in package '{package}'")]
    NoEntryFunction { package: String },

    #[error("invalid resume: {0}")]
    InvalidResume(String),

    #[error("debug transport error: {0}")]
    DebugTransport(String),

    #[error("{message}\n{}", .trace.join("\n"))]
    RuntimeFailure {
        message: String,
        trace: Vec<String>,
    },
}

impl EngineError {
    /// Program-level failure raised from user code.
    pub fn execution(message: impl Into<String>) -> Self {
        EngineError::Execution {
            message: message.into(),
        }
    }
}
