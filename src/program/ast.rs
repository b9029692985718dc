//! Compiled statement and expression nodes
//!
//! This is the body representation produced by the Quill compiler. Variables
//! are slot indices assigned at compile time, and every potentially blocking
//! operation carries a compiler-assigned temp slot that the suspendable
//! executor uses to inject the completed result on resume.

use serde::{Deserialize, Serialize};

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
    },
    /// Write the expression result into a local slot
    Store {
        slot: usize,
        expr: Expr,
    },
    If {
        test: Expr,
        then_s: Box<Stmt>,
        else_s: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    Return {
        value: Option<Expr>,
    },
    /// Evaluate an expression for effect, discarding the result
    Expr {
        expr: Expr,
    },
    Break,
    Continue,
    /// Raise a program-level failure with the rendered message
    Fail {
        message: Expr,
    },
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    LitNull,
    LitBool { v: bool },
    LitInt { v: i64 },
    LitFloat { v: f64 },
    LitStr { v: String },
    /// Read a local slot
    Local { slot: usize },
    ArrayOf { items: Vec<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// Call a function declared elsewhere in the program
    Call {
        package: String,
        function: String,
        args: Vec<Expr>,
    },
    /// Potentially blocking native operation (I/O, timers, external calls).
    /// `temp_slot` is where the completed result lands on resume.
    Blocking {
        op: String,
        args: Vec<Expr>,
        temp_slot: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}
