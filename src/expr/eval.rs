//! Total evaluation of parsed conditions.
//!
//! The evaluator borrows a scope (attribute key → JSON value) and a
//! function registry. It performs no I/O, consults no clock, and draws no
//! randomness; determinism is a contract, not an aspiration. Every failure
//! path is an `Err(ExprError)` that the policy engine catches; an
//! expression can never abort a submit.

use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use super::ExprError;
use super::ast::{BinaryOp, Expr, Number, UnaryOp};
use super::functions::FunctionRegistry;
use super::value::Value;

pub struct Evaluator<'a> {
    scope: &'a FxHashMap<String, Json>,
    registry: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a FxHashMap<String, Json>, registry: &'a FunctionRegistry) -> Self {
        Self { scope, registry }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Number(Number::Int(i)) => Ok(Value::Int(*i)),
            Expr::Number(Number::Float(f)) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Ident(name) => {
                let json = self
                    .scope
                    .get(name)
                    .ok_or_else(|| ExprError::Unbound { name: name.clone() })?;
                Value::from_json(json)
            }
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Call { name, args } => {
                let evaluated = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.registry.call(name, &evaluated)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => match value {
                        v @ (Value::Int(_) | Value::Float(_)) => Ok(v),
                        other => Err(ExprError::eval(format!(
                            "unary `+` expects a number, got {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
        }
    }

    fn eval_binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, ExprError> {
        // Short-circuit forms first; their right side may legally never run.
        match op {
            BinaryOp::And => {
                let left = self.eval(lhs)?;
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval(rhs)?.is_truthy()));
            }
            BinaryOp::Or => {
                let left = self.eval(lhs)?;
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval(rhs)?.is_truthy()));
            }
            _ => {}
        }

        let a = self.eval(lhs)?;
        let b = self.eval(rhs)?;
        use std::cmp::Ordering;
        match op {
            BinaryOp::Add => a.add(&b),
            BinaryOp::Sub => a.sub(&b),
            BinaryOp::Mul => a.mul(&b),
            BinaryOp::Div => a.div(&b),
            BinaryOp::Mod => a.rem(&b),
            BinaryOp::Eq => Ok(Value::Bool(a.loose_eq(&b))),
            BinaryOp::Ne => Ok(Value::Bool(!a.loose_eq(&b))),
            BinaryOp::Lt => Ok(Value::Bool(a.compare(&b)? == Ordering::Less)),
            BinaryOp::Le => Ok(Value::Bool(a.compare(&b)? != Ordering::Greater)),
            BinaryOp::Gt => Ok(Value::Bool(a.compare(&b)? == Ordering::Greater)),
            BinaryOp::Ge => Ok(Value::Bool(a.compare(&b)? != Ordering::Less)),
            BinaryOp::In => Ok(Value::Bool(a.contained_in(&b)?)),
            BinaryOp::NotIn => Ok(Value::Bool(!a.contained_in(&b)?)),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;
    use serde_json::json;

    fn scope(pairs: &[(&str, Json)]) -> FxHashMap<String, Json> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn eval_str(input: &str, scope: &FxHashMap<String, Json>) -> Result<Value, ExprError> {
        let registry = FunctionRegistry::with_builtins();
        let expr = parse(input)?;
        Evaluator::new(scope, &registry).eval(&expr)
    }

    #[test]
    fn comparison_over_attributes() {
        let scope = scope(&[("risk", json!(0.95))]);
        assert_eq!(
            eval_str("risk > 0.8", &scope).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_str("risk <= 0.8", &scope).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn unbound_name_is_attribute_error() {
        let scope = scope(&[]);
        let err = eval_str("undefined_attr > 0", &scope).unwrap_err();
        assert_eq!(
            err,
            ExprError::Unbound {
                name: "undefined_attr".into()
            }
        );
    }

    #[test]
    fn division_by_zero_is_captured() {
        let scope = scope(&[("n", json!(0))]);
        let err = eval_str("1 / n", &scope).unwrap_err();
        assert!(matches!(err, ExprError::Eval { .. }));
    }

    #[test]
    fn short_circuit_avoids_rhs_error() {
        let scope = scope(&[("n", json!(0))]);
        // The division never runs.
        assert_eq!(
            eval_str("false and 1 / n > 0", &scope).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval_str("true or 1 / n > 0", &scope).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn membership_and_functions() {
        let scope = scope(&[("tier", json!("gold")), ("scores", json!([1, 2, 3]))]);
        assert_eq!(
            eval_str("tier in [\"gold\", \"silver\"]", &scope).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_str("sum(scores) == 6", &scope).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn literal_true_condition() {
        let scope = scope(&[]);
        assert_eq!(eval_str("true", &scope).unwrap(), Value::Bool(true));
    }
}
