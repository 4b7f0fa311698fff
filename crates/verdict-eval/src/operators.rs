//! Binary and unary operator semantics.
//!
//! Arithmetic is on `i64` with overflow checking. `/` and `%` round toward
//! negative infinity, so `%` takes the sign of the divisor.

use crate::error::{EvalError, EvalResult};
use crate::value::RuntimeValue;
use verdict_types::ast::{BinOp, UnaryOp};

pub(crate) fn binary(op: BinOp, lv: RuntimeValue, rv: RuntimeValue) -> EvalResult<RuntimeValue> {
    match op {
        BinOp::Eq => equality(lv, rv, op).map(RuntimeValue::Boolean),
        BinOp::NotEq => equality(lv, rv, op).map(|eq| RuntimeValue::Boolean(!eq)),
        _ => {
            let (a, b) = numbers(lv, rv, op)?;
            match op {
                BinOp::Add => a.checked_add(b).map(RuntimeValue::Number).ok_or(EvalError::Overflow("+")),
                BinOp::Sub => a.checked_sub(b).map(RuntimeValue::Number).ok_or(EvalError::Overflow("-")),
                BinOp::Mul => a.checked_mul(b).map(RuntimeValue::Number).ok_or(EvalError::Overflow("*")),
                BinOp::Div => floor_div(a, b).map(RuntimeValue::Number),
                BinOp::Mod => floor_mod(a, b).map(RuntimeValue::Number),
                BinOp::Less => Ok(RuntimeValue::Boolean(a < b)),
                BinOp::Greater => Ok(RuntimeValue::Boolean(a > b)),
                BinOp::LessEq => Ok(RuntimeValue::Boolean(a <= b)),
                BinOp::GreaterEq => Ok(RuntimeValue::Boolean(a >= b)),
                BinOp::Eq | BinOp::NotEq => unreachable!("handled above"),
            }
        }
    }
}

pub(crate) fn unary(op: UnaryOp, value: RuntimeValue) -> EvalResult<RuntimeValue> {
    match (op, value) {
        (UnaryOp::Neg, RuntimeValue::Number(n)) => n
            .checked_neg()
            .map(RuntimeValue::Number)
            .ok_or(EvalError::Overflow("-")),
        (UnaryOp::Not, RuntimeValue::Boolean(b)) => Ok(RuntimeValue::Boolean(!b)),
        (UnaryOp::Neg, other) => Err(EvalError::TypeMismatch(format!(
            "cannot negate {}",
            other.type_name()
        ))),
        (UnaryOp::Not, other) => Err(EvalError::TypeMismatch(format!(
            "'!' requires boolean, got {}",
            other.type_name()
        ))),
    }
}

/// Require a boolean where `what` (a predicate or logical operand) is used.
pub(crate) fn expect_bool(value: RuntimeValue, what: &str) -> EvalResult<bool> {
    match value {
        RuntimeValue::Boolean(b) => Ok(b),
        other => Err(EvalError::TypeMismatch(format!(
            "{what} requires boolean, got {}",
            other.type_name()
        ))),
    }
}

fn numbers(lv: RuntimeValue, rv: RuntimeValue, op: BinOp) -> EvalResult<(i64, i64)> {
    match (lv, rv) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok((a, b)),
        _ => Err(EvalError::TypeMismatch(format!(
            "cannot apply '{}' to {} and {}",
            op.as_str(),
            lv.type_name(),
            rv.type_name()
        ))),
    }
}

fn equality(lv: RuntimeValue, rv: RuntimeValue, op: BinOp) -> EvalResult<bool> {
    match (lv, rv) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok(a == b),
        (RuntimeValue::Boolean(a), RuntimeValue::Boolean(b)) => Ok(a == b),
        _ => Err(EvalError::TypeMismatch(format!(
            "cannot compare {} and {} with '{}'",
            lv.type_name(),
            rv.type_name(),
            op.as_str()
        ))),
    }
}

pub(crate) fn floor_div(a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let q = a.checked_div(b).ok_or(EvalError::Overflow("/"))?;
    let r = a.checked_rem(b).ok_or(EvalError::Overflow("/"))?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

pub(crate) fn floor_mod(a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let r = a.checked_rem(b).ok_or(EvalError::Overflow("%"))?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}
