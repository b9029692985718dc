//! Runtime environment
//!
//! Derived once per compiled program and shared read-only by every context
//! and executor: callable unit handles (metadata + body + execution flow),
//! service declarations, and the native blocking-operation table. Immutable
//! after construction, so no cross-context locking is needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::flow::{build_flow, ExecutionFlow};
use crate::frame::CallableUnitInfo;
use crate::program::{Program, Stmt, ENTRY_FUNCTION};
use crate::values::Value;

/// A loaded callable unit: metadata, body, and its prebuilt flow.
#[derive(Debug)]
pub struct Unit {
    pub info: Arc<CallableUnitInfo>,
    pub body: Arc<Stmt>,
    pub flow: Arc<ExecutionFlow>,
}

impl Unit {
    fn load(info: Arc<CallableUnitInfo>, body: &Stmt) -> Result<Arc<Self>, EngineError> {
        let flow = Arc::new(build_flow(&info, body)?);
        Ok(Arc::new(Unit {
            info,
            body: Arc::new(body.clone()),
            flow,
        }))
    }
}

/// A declared service with its loaded resources.
#[derive(Debug)]
pub struct ServiceUnit {
    pub name: String,
    pub package_path: String,
    pub protocols: Vec<String>,
    resources: HashMap<String, Arc<Unit>>,
    resource_order: Vec<String>,
}

impl ServiceUnit {
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.package_path, self.name)
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<Unit>> {
        self.resources.get(name)
    }

    /// Routable resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<Unit>> {
        self.resource_order
            .iter()
            .filter_map(move |name| self.resources.get(name))
    }

    pub fn resource_count(&self) -> usize {
        self.resource_order.len()
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value, EngineError>;

/// One named blocking operation. `wait_ms` derives the real waiting the op
/// implies from its arguments; `apply` computes the completed result. Every
/// strategy resolves ops through the same table, so Direct and NonBlocking
/// observe identical results.
pub struct NativeOp {
    pub name: &'static str,
    pub wait_ms: fn(&[Value]) -> u64,
    pub apply: NativeFn,
}

pub struct NativeRegistry {
    ops: HashMap<&'static str, NativeOp>,
}

impl NativeRegistry {
    fn with_builtins() -> Self {
        let mut ops = HashMap::new();
        for op in [
            NativeOp {
                name: "sleep",
                wait_ms: |args| match args.first() {
                    Some(Value::Int(ms)) if *ms > 0 => *ms as u64,
                    _ => 0,
                },
                apply: |_| Ok(Value::Null),
            },
            NativeOp {
                name: "echo",
                wait_ms: |_| 0,
                apply: |args| Ok(args.first().cloned().unwrap_or(Value::Null)),
            },
        ] {
            ops.insert(op.name, op);
        }
        NativeRegistry { ops }
    }

    pub fn lookup(&self, name: &str) -> Option<&NativeOp> {
        self.ops.get(name)
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("ops", &self.ops.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared, immutable view of a loaded program.
#[derive(Debug)]
pub struct RuntimeEnvironment {
    pub program_name: String,
    pub entry_package: String,
    functions: HashMap<String, Arc<Unit>>,
    services: HashMap<String, Arc<ServiceUnit>>,
    service_order: Vec<String>,
    natives: NativeRegistry,
}

impl RuntimeEnvironment {
    /// Build the environment, running the flow builder over every callable
    /// unit (functions and service resources). Any malformed body fails the
    /// whole program start.
    pub fn build(program: &Program) -> Result<Arc<Self>, EngineError> {
        let mut functions = HashMap::new();
        let mut services = HashMap::new();
        let mut service_order = Vec::new();

        for package in &program.packages {
            for function in &package.functions {
                let info = CallableUnitInfo::for_function(&package.path, function);
                let key = info.qualified_name();
                functions.insert(key, Unit::load(info, &function.body)?);
            }

            for service in &package.services {
                let mut resources = HashMap::new();
                let mut resource_order = Vec::new();
                for resource in &service.resources {
                    let info = CallableUnitInfo::for_resource(&package.path, service, resource);
                    resources.insert(resource.name.clone(), Unit::load(info, &resource.body)?);
                    resource_order.push(resource.name.clone());
                }

                let unit = Arc::new(ServiceUnit {
                    name: service.name.clone(),
                    package_path: package.path.clone(),
                    protocols: service.protocols.clone(),
                    resources,
                    resource_order,
                });
                service_order.push(unit.qualified_name());
                services.insert(unit.qualified_name(), unit);
            }
        }

        Ok(Arc::new(RuntimeEnvironment {
            program_name: program.name.clone(),
            entry_package: program.entry_package.clone(),
            functions,
            services,
            service_order,
            natives: NativeRegistry::with_builtins(),
        }))
    }

    pub fn lookup_function(&self, package: &str, name: &str) -> Result<&Arc<Unit>, EngineError> {
        let key = format!("{}:{}", package, name);
        self.functions
            .get(&key)
            .ok_or(EngineError::UnknownFunction(key))
    }

    /// The program's `main` in the entry package.
    pub fn entry_function(&self) -> Result<&Arc<Unit>, EngineError> {
        self.lookup_function(&self.entry_package, ENTRY_FUNCTION)
            .map_err(|_| EngineError::NoEntryFunction {
                package: self.entry_package.clone(),
            })
    }

    pub fn service(&self, qualified_name: &str) -> Result<&Arc<ServiceUnit>, EngineError> {
        self.services
            .get(qualified_name)
            .ok_or_else(|| EngineError::UnknownService(qualified_name.to_string()))
    }

    /// Services in declaration order.
    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceUnit>> {
        self.service_order
            .iter()
            .filter_map(move |name| self.services.get(name))
    }

    pub fn service_count(&self) -> usize {
        self.service_order.len()
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }
}
