//! Compiled program representation
//!
//! The compiler is an external collaborator; programs arrive here as data.
//! A program is a set of packages, each holding functions and services; a
//! service exposes resources, which are callable units like functions. Every
//! callable unit carries the two frame-size numbers needed to size a stack
//! frame at invocation time.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod ast;

pub use ast::{BinOp, Expr, Stmt};

/// Name of the entry function looked up in the entry package for `run` mode.
pub const ENTRY_FUNCTION: &str = "main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A callable unit: a package-level function or a service resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub location: SourceLocation,
    /// Argument + local variable slot count
    pub arg_slots: usize,
    /// Temporary/cache slot count (resume results land here)
    pub temp_slots: usize,
    pub body: Stmt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub location: SourceLocation,
    /// Protocols this service is declared for ("http", "ws", ...)
    #[serde(default)]
    pub protocols: Vec<String>,
    pub resources: Vec<Function>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub path: String,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub entry_package: String,
    pub packages: Vec<Package>,
}

impl Program {
    /// The `main` function of the entry package, if declared.
    pub fn entry_function(&self) -> Option<&Function> {
        self.packages
            .iter()
            .find(|p| p.path == self.entry_package)?
            .functions
            .iter()
            .find(|f| f.name == ENTRY_FUNCTION)
    }

    pub fn service_count(&self) -> usize {
        self.packages.iter().map(|p| p.services.len()).sum()
    }

    /// All (package, service) pairs in declaration order.
    pub fn services(&self) -> impl Iterator<Item = (&Package, &Service)> {
        self.packages
            .iter()
            .flat_map(|p| p.services.iter().map(move |s| (p, s)))
    }
}

/// Load a compiled program from disk (JSON produced by the compiler).
pub fn load_program(path: impl AsRef<Path>) -> Result<Program> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read program file {}", path.display()))?;
    let program: Program = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse compiled program {}", path.display()))?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_json() {
        let raw = r#"{
            "name": "demo",
            "entry_package": "demo.app",
            "packages": [{
                "path": "demo.app",
                "functions": [{
                    "name": "main",
                    "location": { "file": "app.ql", "line": 1 },
                    "arg_slots": 1,
                    "temp_slots": 0,
                    "body": { "t": "Return", "value": { "t": "LitInt", "v": 0 } }
                }]
            }]
        }"#;

        let program: Program = serde_json::from_str(raw).unwrap();
        assert_eq!(program.name, "demo");
        assert!(program.entry_function().is_some());
        assert_eq!(program.service_count(), 0);
    }

    #[test]
    fn test_entry_function_missing() {
        let program = Program {
            name: "empty".into(),
            entry_package: "empty.app".into(),
            packages: vec![Package {
                path: "empty.app".into(),
                functions: vec![],
                services: vec![],
            }],
        };
        assert!(program.entry_function().is_none());
    }
}
