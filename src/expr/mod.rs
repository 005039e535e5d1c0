//! Restricted expression DSL for guard conditions.
//!
//! Guard branches carry infix conditions such as `risk > 0.8 and amount <
//! 10000` that are evaluated over a unit of work's attribute view. The
//! language is deliberately small: arithmetic, comparison, boolean logic,
//! list literals, membership tests, and calls to an allow-listed set of pure
//! functions. There is no attribute access, no subscripting, no assignment,
//! no bitwise arithmetic, and no way to reach I/O, the clock, or randomness,
//! so identical inputs always produce identical results.
//!
//! The pipeline is the usual three stages:
//!
//! 1. [`parse`]: lex + recursive descent into an [`ast::Expr`]. Anything
//!    outside the grammar is a [`ExprError::Syntax`].
//! 2. [`validate`]: walk the tree and reject identifiers outside the
//!    permitted set and calls outside the [`FunctionRegistry`]. Template
//!    import runs this for every branch condition (rule R11).
//! 3. [`eval::Evaluator::eval`]: total evaluation: every failure is an
//!    `Err`, never a panic, so the policy engine can capture it and decide
//!    whether an `on_error` branch applies.
//!
//! # Examples
//!
//! ```rust
//! use gatewright::expr::{parse, eval::Evaluator, functions::FunctionRegistry};
//! use rustc_hash::FxHashMap;
//! use serde_json::json;
//!
//! let expr = parse("score < 0.5 and len(tags) > 0").unwrap();
//!
//! let mut scope = FxHashMap::default();
//! scope.insert("score".to_string(), json!(0.1));
//! scope.insert("tags".to_string(), json!(["fast"]));
//!
//! let registry = FunctionRegistry::with_builtins();
//! let result = Evaluator::new(&scope, &registry).eval(&expr).unwrap();
//! assert!(result.is_truthy());
//! ```

pub mod ast;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod token;
pub mod value;

use std::collections::HashSet;

use miette::Diagnostic;
use thiserror::Error;

use ast::Expr;
use functions::FunctionRegistry;

/// Errors from parsing, validating, or evaluating a condition.
///
/// Evaluation is total: the evaluator returns one of these instead of
/// panicking, and the policy engine captures it in the shadow log.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq)]
pub enum ExprError {
    /// The input is not a sentence of the grammar.
    #[error("syntax error at offset {position}: {message}")]
    #[diagnostic(
        code(gatewright::expr::syntax),
        help("Conditions support arithmetic, comparison, and/or/not, list literals, and registered function calls.")
    )]
    Syntax { position: usize, message: String },

    /// An identifier is not bound in the evaluation scope, or not in the
    /// permitted set at validation time.
    #[error("unknown name `{name}`")]
    #[diagnostic(
        code(gatewright::expr::unbound),
        help("Only declared attribute keys and reserved metadata names are usable in conditions.")
    )]
    Unbound { name: String },

    /// A call names a function outside the registry's allow-list.
    #[error("function `{name}` is not registered")]
    #[diagnostic(
        code(gatewright::expr::unknown_function),
        help("Register pure functions on the FunctionRegistry before referencing them.")
    )]
    UnknownFunction { name: String },

    /// A runtime failure: division by zero, type mismatch, bad arity.
    #[error("evaluation error: {message}")]
    #[diagnostic(code(gatewright::expr::eval))]
    Eval { message: String },
}

impl ExprError {
    pub(crate) fn eval(message: impl Into<String>) -> Self {
        ExprError::Eval {
            message: message.into(),
        }
    }
}

/// Parse a condition string into an AST.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = token::lex(input)?;
    parser::Parser::new(input, tokens).parse_expression()
}

/// Check that an expression references only permitted identifiers and
/// registered functions. Used at template import (rule R11); runtime
/// evaluation re-checks bindings anyway, so a stale validation can never
/// widen the namespace.
pub fn validate(
    expr: &Expr,
    permitted: &HashSet<String>,
    registry: &FunctionRegistry,
) -> Result<(), ExprError> {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) => Ok(()),
        Expr::Ident(name) => {
            if permitted.contains(name) {
                Ok(())
            } else {
                Err(ExprError::Unbound { name: name.clone() })
            }
        }
        Expr::Call { name, args } => {
            if !registry.contains(name) {
                return Err(ExprError::UnknownFunction { name: name.clone() });
            }
            args.iter()
                .try_for_each(|arg| validate(arg, permitted, registry))
        }
        Expr::List(items) => items
            .iter()
            .try_for_each(|item| validate(item, permitted, registry)),
        Expr::Unary { operand, .. } => validate(operand, permitted, registry),
        Expr::Binary { lhs, rhs, .. } => {
            validate(lhs, permitted, registry)?;
            validate(rhs, permitted, registry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permitted(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn validate_accepts_declared_names() {
        let expr = parse("risk > 0.8 or abs(amount) < 10").unwrap();
        let registry = FunctionRegistry::with_builtins();
        assert!(validate(&expr, &permitted(&["risk", "amount"]), &registry).is_ok());
    }

    #[test]
    fn validate_rejects_undeclared_names() {
        let expr = parse("actor_id == 3").unwrap();
        let registry = FunctionRegistry::with_builtins();
        let err = validate(&expr, &permitted(&["risk"]), &registry).unwrap_err();
        assert_eq!(
            err,
            ExprError::Unbound {
                name: "actor_id".into()
            }
        );
    }

    #[test]
    fn validate_rejects_unregistered_functions() {
        let expr = parse("open(path)").unwrap();
        let registry = FunctionRegistry::with_builtins();
        let err = validate(&expr, &permitted(&["path"]), &registry).unwrap_err();
        assert!(matches!(err, ExprError::UnknownFunction { .. }));
    }
}
