//! Shared fixtures for executor tests.

use std::sync::Arc;

use crate::context::Context;
use crate::env::{RuntimeEnvironment, Unit};
use crate::frame::new_frame;
use crate::program::{BinOp, Expr, Function, Package, Program, SourceLocation, Stmt};
use crate::values::Value;

pub fn loc() -> SourceLocation {
    SourceLocation {
        file: "app.ql".into(),
        line: 1,
    }
}

pub fn function(name: &str, arg_slots: usize, temp_slots: usize, body: Stmt) -> Function {
    Function {
        name: name.into(),
        location: loc(),
        arg_slots,
        temp_slots,
        body,
    }
}

pub fn env_with(functions: Vec<Function>) -> Arc<RuntimeEnvironment> {
    let program = Program {
        name: "demo".into(),
        entry_package: "demo.app".into(),
        packages: vec![Package {
            path: "demo.app".into(),
            functions,
            services: vec![],
        }],
    };
    RuntimeEnvironment::build(&program).unwrap()
}

/// Fresh context with the named unit's frame already pushed.
pub fn context_for(
    env: &Arc<RuntimeEnvironment>,
    name: &str,
    args: Vec<Value>,
) -> (Context, Arc<Unit>) {
    let unit = env.lookup_function("demo.app", name).unwrap().clone();
    let mut ctx = Context::new();
    ctx.control_stack
        .push_frame(new_frame(unit.info.clone(), args).unwrap());
    (ctx, unit)
}

/* expression and statement shorthands */

pub fn int(v: i64) -> Expr {
    Expr::LitInt { v }
}

pub fn local(slot: usize) -> Expr {
    Expr::Local { slot }
}

pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn blocking(op: &str, args: Vec<Expr>, temp_slot: usize) -> Expr {
    Expr::Blocking {
        op: op.into(),
        args,
        temp_slot,
    }
}

pub fn call(function: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        package: "demo.app".into(),
        function: function.into(),
        args,
    }
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    Stmt::Block { body }
}

pub fn store(slot: usize, expr: Expr) -> Stmt {
    Stmt::Store { slot, expr }
}

pub fn ret(expr: Expr) -> Stmt {
    Stmt::Return { value: Some(expr) }
}

/// Sums the integers 1..=n with a while loop, skipping `skip` with
/// `continue` and leaving the loop early at `stop` with `break`.
///
/// slot 0: n, slot 1: counter, slot 2: sum.
pub fn loop_body(skip: i64, stop: i64) -> Stmt {
    block(vec![
        store(1, int(0)),
        store(2, int(0)),
        Stmt::While {
            test: bin(BinOp::Lt, local(1), local(0)),
            body: Box::new(block(vec![
                store(1, bin(BinOp::Add, local(1), int(1))),
                Stmt::If {
                    test: bin(BinOp::Eq, local(1), int(skip)),
                    then_s: Box::new(Stmt::Continue),
                    else_s: None,
                },
                Stmt::If {
                    test: bin(BinOp::Eq, local(1), int(stop)),
                    then_s: Box::new(Stmt::Break),
                    else_s: None,
                },
                store(2, bin(BinOp::Add, local(2), local(1))),
            ])),
        },
        ret(local(2)),
    ])
}
