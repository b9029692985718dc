//! Callable unit metadata and stack frames
//!
//! A `StackFrame` holds three parallel slot arrays: arguments/locals, return
//! slots, and temporaries. Locals start null, temporaries start
//! uninitialized; the suspendable executor injects completed blocking
//! results through the temp slots on resume.

use std::sync::Arc;

use crate::errors::EngineError;
use crate::program::{Function, Service, SourceLocation};
use crate::values::Value;

/// Immutable metadata for one callable unit, created once at program load.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableUnitInfo {
    pub name: String,
    pub package_path: String,
    pub location: SourceLocation,
    /// Argument + local slot count
    pub arg_slot_count: usize,
    /// Temporary/cache slot count
    pub temp_slot_count: usize,
}

impl CallableUnitInfo {
    pub fn for_function(package_path: &str, function: &Function) -> Arc<Self> {
        Arc::new(CallableUnitInfo {
            name: function.name.clone(),
            package_path: package_path.to_string(),
            location: function.location.clone(),
            arg_slot_count: function.arg_slots,
            temp_slot_count: function.temp_slots,
        })
    }

    /// Resources are named through their service: `pkg:svc.resource`.
    pub fn for_resource(package_path: &str, service: &Service, resource: &Function) -> Arc<Self> {
        Arc::new(CallableUnitInfo {
            name: format!("{}.{}", service.name, resource.name),
            package_path: package_path.to_string(),
            location: resource.location.clone(),
            arg_slot_count: resource.arg_slots,
            temp_slot_count: resource.temp_slots,
        })
    }

    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.package_path, self.name)
    }
}

/// One invocation's slot storage. Created on invoke, destroyed on return.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Arguments and local variables
    pub locals: Vec<Value>,
    /// Return slots (single return value in the current compiler contract)
    pub returns: Vec<Value>,
    /// Temporaries; uninitialized until a resume result lands in one
    pub temps: Vec<Option<Value>>,
    pub info: Arc<CallableUnitInfo>,
}

/// Allocate a frame sized from the unit info, pre-filling argument slots.
///
/// Fails with `Arity` when more arguments are supplied than the frame has
/// slots for. No side effects beyond allocation.
pub fn new_frame(
    info: Arc<CallableUnitInfo>,
    args: Vec<Value>,
) -> Result<StackFrame, EngineError> {
    if args.len() > info.arg_slot_count {
        return Err(EngineError::Arity {
            unit: info.qualified_name(),
            supplied: args.len(),
            slots: info.arg_slot_count,
        });
    }

    let mut locals = vec![Value::Null; info.arg_slot_count];
    for (slot, arg) in args.into_iter().enumerate() {
        locals[slot] = arg;
    }

    Ok(StackFrame {
        locals,
        returns: vec![Value::Null],
        temps: vec![None; info.temp_slot_count],
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::SourceLocation;

    fn info(args: usize, temps: usize) -> Arc<CallableUnitInfo> {
        Arc::new(CallableUnitInfo {
            name: "main".into(),
            package_path: "demo.app".into(),
            location: SourceLocation {
                file: "app.ql".into(),
                line: 1,
            },
            arg_slot_count: args,
            temp_slot_count: temps,
        })
    }

    #[test]
    fn test_new_frame_prefills_arguments() {
        let frame = new_frame(info(3, 2), vec![Value::Int(1), Value::Str("x".into())]).unwrap();
        assert_eq!(frame.locals, vec![Value::Int(1), Value::Str("x".into()), Value::Null]);
        assert_eq!(frame.returns, vec![Value::Null]);
        assert_eq!(frame.temps, vec![None, None]);
    }

    #[test]
    fn test_new_frame_arity_error() {
        let err = new_frame(info(1, 0), vec![Value::Int(1), Value::Int(2)]).unwrap_err();
        match err {
            EngineError::Arity { supplied, slots, .. } => {
                assert_eq!(supplied, 2);
                assert_eq!(slots, 1);
            }
            other => panic!("expected arity error, got {:?}", other),
        }
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(info(0, 0).qualified_name(), "demo.app:main");
    }
}
