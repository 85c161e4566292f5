//! Structured scalar expressions for projections.

use serde::{Deserialize, Serialize};

use crate::data::Value;
use crate::{Result, StrataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// A scalar expression tree over column operands and literals.
///
/// Arithmetic is integer-only and never coerces: both operands of a binary
/// node must evaluate to the same integer type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Column(String),
    Literal(Value),
    Arithmetic {
        op: ArithmeticOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn arithmetic(op: ArithmeticOperator, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Names of all columns referenced by this expression.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns(&self, names: &mut Vec<String>) {
        match self {
            Expression::Column(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expression::Literal(_) => {}
            Expression::Arithmetic { left, right, .. } => {
                left.collect_columns(names);
                right.collect_columns(names);
            }
        }
    }

    /// Evaluate against one row; `resolve` maps a column name to the row's
    /// value. Null operands propagate to a null result.
    pub fn evaluate(&self, resolve: &dyn Fn(&str) -> Result<Value>) -> Result<Value> {
        match self {
            Expression::Column(name) => resolve(name),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Arithmetic { op, left, right } => {
                let left = left.evaluate(resolve)?;
                let right = right.evaluate(resolve)?;
                if left.is_null() || right.is_null() {
                    return Ok(Value::Null);
                }
                apply(*op, &left, &right)
            }
        }
    }
}

fn apply(op: ArithmeticOperator, left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int32(a), Value::Int32(b)) => {
            Ok(Value::Int32(apply_i64(op, *a as i64, *b as i64)? as i32))
        }
        (Value::Int64(a), Value::Int64(b)) => Ok(Value::Int64(apply_i64(op, *a, *b)?)),
        _ => Err(StrataError::TypeMismatch(format!(
            "arithmetic requires matching integer operands, got {} and {}",
            left, right
        ))),
    }
}

fn apply_i64(op: ArithmeticOperator, a: i64, b: i64) -> Result<i64> {
    match op {
        ArithmeticOperator::Add => Ok(a.wrapping_add(b)),
        ArithmeticOperator::Subtract => Ok(a.wrapping_sub(b)),
        ArithmeticOperator::Multiply => Ok(a.wrapping_mul(b)),
        ArithmeticOperator::Divide => {
            if b == 0 {
                Err(StrataError::Unsupported("division by zero".to_string()))
            } else {
                Ok(a.wrapping_div(b))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(value: Value) -> impl Fn(&str) -> Result<Value> {
        move |_| Ok(value.clone())
    }

    #[test]
    fn test_arithmetic() {
        let expr = Expression::arithmetic(
            ArithmeticOperator::Add,
            Expression::column("n"),
            Expression::literal(1i32),
        );
        let result = expr.evaluate(&resolver(Value::Int32(41))).unwrap();
        assert_eq!(result, Value::Int32(42));
    }

    #[test]
    fn test_nested_expression() {
        // (n - 2) * 3
        let expr = Expression::arithmetic(
            ArithmeticOperator::Multiply,
            Expression::arithmetic(
                ArithmeticOperator::Subtract,
                Expression::column("n"),
                Expression::literal(2i64),
            ),
            Expression::literal(3i64),
        );
        let result = expr.evaluate(&resolver(Value::Int64(10))).unwrap();
        assert_eq!(result, Value::Int64(24));
    }

    #[test]
    fn test_mixed_types_rejected() {
        let expr = Expression::arithmetic(
            ArithmeticOperator::Add,
            Expression::literal(1i32),
            Expression::literal(1i64),
        );
        assert!(matches!(
            expr.evaluate(&resolver(Value::Null)),
            Err(StrataError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let expr = Expression::arithmetic(
            ArithmeticOperator::Divide,
            Expression::literal(1i64),
            Expression::literal(0i64),
        );
        assert!(expr.evaluate(&resolver(Value::Null)).is_err());
    }

    #[test]
    fn test_null_propagates() {
        let expr = Expression::arithmetic(
            ArithmeticOperator::Add,
            Expression::column("n"),
            Expression::literal(1i64),
        );
        assert_eq!(
            expr.evaluate(&resolver(Value::Null)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_referenced_columns() {
        let expr = Expression::arithmetic(
            ArithmeticOperator::Add,
            Expression::column("a"),
            Expression::arithmetic(
                ArithmeticOperator::Multiply,
                Expression::column("b"),
                Expression::column("a"),
            ),
        );
        assert_eq!(expr.referenced_columns(), vec!["a", "b"]);
    }
}
