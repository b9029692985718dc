//! Pure expression evaluation shared by every strategy
//!
//! Evaluates the suspension-free subset of expressions against one frame.
//! Calls and blocking operations never appear here: the flow builder has
//! already rejected bodies that nest them inside other expressions, so
//! hitting one is an internal consistency error.

use std::sync::Arc;

use crate::errors::EngineError;
use crate::frame::StackFrame;
use crate::program::{BinOp, Expr};
use crate::values::Value;

pub(crate) fn eval_pure(expr: &Expr, frame: &StackFrame) -> Result<Value, EngineError> {
    match expr {
        Expr::LitNull => Ok(Value::Null),
        Expr::LitBool { v } => Ok(Value::Bool(*v)),
        Expr::LitInt { v } => Ok(Value::Int(*v)),
        Expr::LitFloat { v } => Ok(Value::Float(*v)),
        Expr::LitStr { v } => Ok(Value::Str(v.clone())),
        Expr::Local { slot } => frame
            .locals
            .get(*slot)
            .cloned()
            .ok_or_else(|| EngineError::execution(format!("local slot {} out of range", slot))),
        Expr::ArrayOf { items } => {
            let out: Result<Vec<Value>, EngineError> =
                items.iter().map(|e| eval_pure(e, frame)).collect();
            Ok(Value::Array(Arc::new(out?)))
        }
        Expr::Index { target, index } => {
            let target = eval_pure(target, frame)?;
            let index = eval_pure(index, frame)?;
            eval_index(&target, &index)
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_pure(lhs, frame)?;
            let rhs = eval_pure(rhs, frame)?;
            apply_binary(*op, lhs, rhs)
        }
        Expr::Call { function, .. } => Err(EngineError::execution(format!(
            "internal: nested call to '{}' reached the evaluator",
            function
        ))),
        Expr::Blocking { op, .. } => Err(EngineError::execution(format!(
            "internal: nested blocking op '{}' reached the evaluator",
            op
        ))),
    }
}

fn eval_index(target: &Value, index: &Value) -> Result<Value, EngineError> {
    match (target, index) {
        (Value::Array(items), Value::Int(i)) => {
            let i = usize::try_from(*i)
                .map_err(|_| EngineError::execution(format!("negative array index {}", i)))?;
            items.get(i).cloned().ok_or_else(|| {
                EngineError::execution(format!(
                    "array index {} out of bounds (length {})",
                    i,
                    items.len()
                ))
            })
        }
        (Value::Record(fields), Value::Str(key)) => fields
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::execution(format!("no field '{}' in record", key))),
        (t, i) => Err(EngineError::execution(format!(
            "cannot index {} with {}",
            t.type_name(),
            i.type_name()
        ))),
    }
}

pub(crate) fn apply_binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EngineError> {
    use BinOp::*;
    match op {
        Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| EngineError::execution("integer overflow in addition")),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (a, b) => numeric(op, a, b, |x, y| x + y),
        },
        Sub => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(b)
                .map(Value::Int)
                .ok_or_else(|| EngineError::execution("integer overflow in subtraction")),
            (a, b) => numeric(op, a, b, |x, y| x - y),
        },
        Mul => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(b)
                .map(Value::Int)
                .ok_or_else(|| EngineError::execution("integer overflow in multiplication")),
            (a, b) => numeric(op, a, b, |x, y| x * y),
        },
        Div => match (lhs, rhs) {
            (Value::Int(_), Value::Int(0)) => Err(EngineError::execution("division by zero")),
            (Value::Int(a), Value::Int(b)) => a
                .checked_div(b)
                .map(Value::Int)
                .ok_or_else(|| EngineError::execution("integer overflow in division")),
            (a, b) => numeric(op, a, b, |x, y| x / y),
        },
        Eq => Ok(Value::Bool(lhs == rhs)),
        Ne => Ok(Value::Bool(lhs != rhs)),
        Lt => compare(op, lhs, rhs, |o| o == std::cmp::Ordering::Less),
        Le => compare(op, lhs, rhs, |o| o != std::cmp::Ordering::Greater),
        Gt => compare(op, lhs, rhs, |o| o == std::cmp::Ordering::Greater),
        Ge => compare(op, lhs, rhs, |o| o != std::cmp::Ordering::Less),
        And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
        Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
    }
}

fn numeric(
    op: BinOp,
    lhs: Value,
    rhs: Value,
    f: fn(f64, f64) -> f64,
) -> Result<Value, EngineError> {
    match (as_float(&lhs), as_float(&rhs)) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(type_error(op, &lhs, &rhs)),
    }
}

fn compare(
    op: BinOp,
    lhs: Value,
    rhs: Value,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EngineError> {
    let ordering = match (&lhs, &rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (as_float(&lhs), as_float(&rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(type_error(op, &lhs, &rhs)),
        },
    };
    match ordering {
        Some(o) => Ok(Value::Bool(accept(o))),
        None => Err(type_error(op, &lhs, &rhs)),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

fn type_error(op: BinOp, lhs: &Value, rhs: &Value) -> EngineError {
    EngineError::execution(format!(
        "cannot apply {:?} to {} and {}",
        op,
        lhs.type_name(),
        rhs.type_name()
    ))
}

/// Render a `fail` message value: strings stay bare, everything else is
/// rendered as JSON.
pub(crate) fn render_message(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}
