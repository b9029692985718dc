//! Execution flow builder
//!
//! A one-time preprocessing pass over a callable unit's body. It collects
//! the unit's suspension points (blocking operations) and validates the
//! structural rules the suspendable executor relies on:
//!
//! - blocking operations and function calls appear only as the outermost
//!   expression of a `Store`, `Return` or `Expr` statement, never nested
//!   inside another expression or a branch/loop condition
//! - every blocking operation's temp slot is in range and used once
//! - `break`/`continue` appear only inside a loop
//! - every `Store` targets a slot the frame actually has
//!
//! The flow is an acceleration structure: it never changes a unit's
//! observable semantics. Building is pure and idempotent; a malformed body
//! fails the whole program start.

use crate::errors::EngineError;
use crate::frame::CallableUnitInfo;
use crate::program::{Expr, Stmt};

/// A point in the body where the suspendable strategy may yield.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendPoint {
    pub op: String,
    pub temp_slot: usize,
}

/// Derived, immutable annotation of one callable unit's body.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFlow {
    pub unit: String,
    pub suspend_points: Vec<SuspendPoint>,
}

impl ExecutionFlow {
    pub fn suspend_point_count(&self) -> usize {
        self.suspend_points.len()
    }
}

/// Build the execution flow for one callable unit.
pub fn build_flow(info: &CallableUnitInfo, body: &Stmt) -> Result<ExecutionFlow, EngineError> {
    let mut builder = FlowWalk {
        info,
        points: Vec::new(),
        used_temp_slots: Vec::new(),
    };
    builder.walk_stmt(body, 0)?;

    Ok(ExecutionFlow {
        unit: info.qualified_name(),
        suspend_points: builder.points,
    })
}

struct FlowWalk<'a> {
    info: &'a CallableUnitInfo,
    points: Vec<SuspendPoint>,
    used_temp_slots: Vec<usize>,
}

impl FlowWalk<'_> {
    fn fail(&self, reason: impl Into<String>) -> EngineError {
        EngineError::FlowBuild {
            unit: self.info.qualified_name(),
            reason: reason.into(),
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt, loop_depth: usize) -> Result<(), EngineError> {
        match stmt {
            Stmt::Block { body } => {
                for child in body {
                    self.walk_stmt(child, loop_depth)?;
                }
            }
            Stmt::Store { slot, expr } => {
                if *slot >= self.info.arg_slot_count {
                    return Err(self.fail(format!(
                        "store targets slot {} but frame has {} local slot(s)",
                        slot, self.info.arg_slot_count
                    )));
                }
                self.check_top_expr(expr)?;
            }
            Stmt::Expr { expr } => self.check_top_expr(expr)?,
            Stmt::Return { value } => {
                if let Some(expr) = value {
                    self.check_top_expr(expr)?;
                }
            }
            Stmt::If { test, then_s, else_s } => {
                self.check_pure(test)?;
                self.walk_stmt(then_s, loop_depth)?;
                if let Some(else_s) = else_s {
                    self.walk_stmt(else_s, loop_depth)?;
                }
            }
            Stmt::While { test, body } => {
                self.check_pure(test)?;
                self.walk_stmt(body, loop_depth + 1)?;
            }
            Stmt::Break => {
                if loop_depth == 0 {
                    return Err(self.fail("break outside of a loop"));
                }
            }
            Stmt::Continue => {
                if loop_depth == 0 {
                    return Err(self.fail("continue outside of a loop"));
                }
            }
            Stmt::Fail { message } => self.check_pure(message)?,
        }
        Ok(())
    }

    /// Outermost statement expression: a blocking op or a call is allowed
    /// here and nowhere else.
    fn check_top_expr(&mut self, expr: &Expr) -> Result<(), EngineError> {
        match expr {
            Expr::Blocking { op, args, temp_slot } => {
                for arg in args {
                    self.check_pure(arg)?;
                }
                if *temp_slot >= self.info.temp_slot_count {
                    return Err(self.fail(format!(
                        "blocking op '{}' uses temp slot {} but frame has {} temp slot(s)",
                        op, temp_slot, self.info.temp_slot_count
                    )));
                }
                if self.used_temp_slots.contains(temp_slot) {
                    return Err(self.fail(format!(
                        "temp slot {} assigned to more than one blocking op",
                        temp_slot
                    )));
                }
                self.used_temp_slots.push(*temp_slot);
                self.points.push(SuspendPoint {
                    op: op.clone(),
                    temp_slot: *temp_slot,
                });
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    self.check_pure(arg)?;
                }
            }
            other => self.check_pure(other)?,
        }
        Ok(())
    }

    fn check_pure(&self, expr: &Expr) -> Result<(), EngineError> {
        match expr {
            Expr::Blocking { op, .. } => Err(self.fail(format!(
                "blocking op '{}' nested inside an expression; it must be the \
                 outermost expression of a statement",
                op
            ))),
            Expr::Call { function, .. } => Err(self.fail(format!(
                "call to '{}' nested inside an expression; calls must be the \
                 outermost expression of a statement",
                function
            ))),
            Expr::ArrayOf { items } => {
                for item in items {
                    self.check_pure(item)?;
                }
                Ok(())
            }
            Expr::Index { target, index } => {
                self.check_pure(target)?;
                self.check_pure(index)
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.check_pure(lhs)?;
                self.check_pure(rhs)
            }
            Expr::LitNull
            | Expr::LitBool { .. }
            | Expr::LitInt { .. }
            | Expr::LitFloat { .. }
            | Expr::LitStr { .. }
            | Expr::Local { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::SourceLocation;

    fn info(arg_slots: usize, temp_slots: usize) -> CallableUnitInfo {
        CallableUnitInfo {
            name: "f".into(),
            package_path: "demo".into(),
            location: SourceLocation {
                file: "app.ql".into(),
                line: 1,
            },
            arg_slot_count: arg_slots,
            temp_slot_count: temp_slots,
        }
    }

    fn blocking(op: &str, temp_slot: usize) -> Expr {
        Expr::Blocking {
            op: op.into(),
            args: vec![],
            temp_slot,
        }
    }

    #[test]
    fn test_collects_suspend_points_in_order() {
        let body = Stmt::Block {
            body: vec![
                Stmt::Store {
                    slot: 0,
                    expr: blocking("echo", 0),
                },
                Stmt::Expr {
                    expr: blocking("sleep", 1),
                },
                Stmt::Return {
                    value: Some(Expr::Local { slot: 0 }),
                },
            ],
        };

        let flow = build_flow(&info(1, 2), &body).unwrap();
        assert_eq!(flow.suspend_point_count(), 2);
        assert_eq!(flow.suspend_points[0].op, "echo");
        assert_eq!(flow.suspend_points[1].op, "sleep");
    }

    #[test]
    fn test_build_is_idempotent() {
        let body = Stmt::Block {
            body: vec![Stmt::Return {
                value: Some(blocking("echo", 0)),
            }],
        };
        let info = info(0, 1);

        let first = build_flow(&info, &body).unwrap();
        let second = build_flow(&info, &body).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_nested_blocking_rejected() {
        let body = Stmt::Return {
            value: Some(Expr::Binary {
                op: crate::program::BinOp::Add,
                lhs: Box::new(blocking("echo", 0)),
                rhs: Box::new(Expr::LitInt { v: 1 }),
            }),
        };

        let err = build_flow(&info(0, 1), &body).unwrap_err();
        assert!(matches!(err, EngineError::FlowBuild { .. }));
    }

    #[test]
    fn test_blocking_in_loop_condition_rejected() {
        let body = Stmt::While {
            test: blocking("echo", 0),
            body: Box::new(Stmt::Block { body: vec![] }),
        };
        assert!(build_flow(&info(0, 1), &body).is_err());
    }

    #[test]
    fn test_temp_slot_out_of_range_rejected() {
        let body = Stmt::Expr {
            expr: blocking("echo", 3),
        };
        let err = build_flow(&info(0, 1), &body).unwrap_err();
        match err {
            EngineError::FlowBuild { reason, .. } => assert!(reason.contains("temp slot")),
            other => panic!("expected flow error, got {:?}", other),
        }
    }

    #[test]
    fn test_temp_slot_reuse_rejected() {
        let body = Stmt::Block {
            body: vec![
                Stmt::Expr {
                    expr: blocking("echo", 0),
                },
                Stmt::Expr {
                    expr: blocking("sleep", 0),
                },
            ],
        };
        assert!(build_flow(&info(0, 2), &body).is_err());
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let body = Stmt::Block {
            body: vec![Stmt::Break],
        };
        let err = build_flow(&info(0, 0), &body).unwrap_err();
        match err {
            EngineError::FlowBuild { reason, .. } => assert!(reason.contains("break")),
            other => panic!("expected flow error, got {:?}", other),
        }
    }

    #[test]
    fn test_break_inside_loop_allowed() {
        let body = Stmt::While {
            test: Expr::LitBool { v: true },
            body: Box::new(Stmt::Block {
                body: vec![Stmt::Break],
            }),
        };
        assert!(build_flow(&info(0, 0), &body).is_ok());
    }

    #[test]
    fn test_store_slot_out_of_range_rejected() {
        let body = Stmt::Store {
            slot: 2,
            expr: Expr::LitInt { v: 1 },
        };
        assert!(build_flow(&info(1, 0), &body).is_err());
    }
}
