//! Allow-listed pure functions callable from conditions.
//!
//! The registry starts from a small numeric/collection core and lets a
//! deployment add its own pure functions by name. Nothing here may touch
//! I/O, the clock, or randomness: a registered function is a pure mapping
//! from argument values to a result value.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::ExprError;
use super::value::Value;

/// Signature of a registered function.
pub type ExprFn = Arc<dyn Fn(&[Value]) -> Result<Value, ExprError> + Send + Sync>;

/// Named registry of callable functions.
///
/// Constructed once per engine and shared; the policy engine and the
/// template validator both consult it.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, ExprFn>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry. Conditions that call anything will fail
    /// validation; useful for fully locked-down deployments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard allow-list: `abs, min, max, round, floor, ceil, sqrt,
    /// pow, len, sum, all, any, str, int, float`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("abs", |args| {
            match one_numeric("abs", args)? {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| ExprError::eval("integer overflow in abs")),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                _ => unreachable!(),
            }
        });
        registry.register("min", |args| fold_extreme("min", args, false));
        registry.register("max", |args| fold_extreme("max", args, true));
        registry.register("round", |args| match one_numeric("round", args)? {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) => Ok(Value::Float(f.round())),
            _ => unreachable!(),
        });
        registry.register("floor", |args| match one_numeric("floor", args)? {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) => Ok(Value::Float(f.floor())),
            _ => unreachable!(),
        });
        registry.register("ceil", |args| match one_numeric("ceil", args)? {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) => Ok(Value::Float(f.ceil())),
            _ => unreachable!(),
        });
        registry.register("sqrt", |args| {
            let x = numeric_as_f64("sqrt", one_numeric("sqrt", args)?)?;
            if x < 0.0 {
                return Err(ExprError::eval("sqrt of a negative number"));
            }
            Ok(Value::Float(x.sqrt()))
        });
        registry.register("pow", |args| {
            if args.len() != 2 {
                return Err(arity("pow", 2, args.len()));
            }
            let base = numeric_as_f64("pow", args[0].clone())?;
            let exp = numeric_as_f64("pow", args[1].clone())?;
            let result = base.powf(exp);
            if !result.is_finite() {
                return Err(ExprError::eval("pow produced a non-finite value"));
            }
            Ok(Value::Float(result))
        });
        registry.register("len", |args| {
            if args.len() != 1 {
                return Err(arity("len", 1, args.len()));
            }
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(ExprError::eval(format!(
                    "len expects a string or list, got {}",
                    other.type_name()
                ))),
            }
        });
        registry.register("sum", |args| {
            let items = one_list("sum", args)?;
            let mut acc = Value::Int(0);
            for item in items {
                acc = acc.add(&item)?;
            }
            Ok(acc)
        });
        registry.register("all", |args| {
            let items = one_list("all", args)?;
            Ok(Value::Bool(items.iter().all(Value::is_truthy)))
        });
        registry.register("any", |args| {
            let items = one_list("any", args)?;
            Ok(Value::Bool(items.iter().any(Value::is_truthy)))
        });
        registry.register("str", |args| {
            if args.len() != 1 {
                return Err(arity("str", 1, args.len()));
            }
            Ok(Value::Str(args[0].to_string()))
        });
        registry.register("int", |args| {
            if args.len() != 1 {
                return Err(arity("int", 1, args.len()));
            }
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| ExprError::eval(format!("cannot convert {s:?} to int"))),
                other => Err(ExprError::eval(format!(
                    "cannot convert {} to int",
                    other.type_name()
                ))),
            }
        });
        registry.register("float", |args| {
            if args.len() != 1 {
                return Err(arity("float", 1, args.len()));
            }
            match &args[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| ExprError::eval(format!("cannot convert {s:?} to float"))),
                other => Err(ExprError::eval(format!(
                    "cannot convert {} to float",
                    other.type_name()
                ))),
            }
        });
        registry
    }

    /// Register (or replace) a pure function.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, ExprError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExprError> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| ExprError::UnknownFunction {
                name: name.to_string(),
            })?;
        f(args)
    }
}

fn arity(name: &str, want: usize, got: usize) -> ExprError {
    ExprError::eval(format!("{name} expects {want} argument(s), got {got}"))
}

fn one_numeric(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    if args.len() != 1 {
        return Err(arity(name, 1, args.len()));
    }
    match &args[0] {
        v @ (Value::Int(_) | Value::Float(_)) => Ok(v.clone()),
        other => Err(ExprError::eval(format!(
            "{name} expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn numeric_as_f64(name: &str, value: Value) -> Result<f64, ExprError> {
    match value {
        Value::Int(i) => Ok(i as f64),
        Value::Float(f) => Ok(f),
        other => Err(ExprError::eval(format!(
            "{name} expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn one_list(name: &str, args: &[Value]) -> Result<Vec<Value>, ExprError> {
    if args.len() != 1 {
        return Err(arity(name, 1, args.len()));
    }
    match &args[0] {
        Value::List(items) => Ok(items.clone()),
        other => Err(ExprError::eval(format!(
            "{name} expects a list, got {}",
            other.type_name()
        ))),
    }
}

fn fold_extreme(name: &str, args: &[Value], want_max: bool) -> Result<Value, ExprError> {
    // Accept either min(a, b, ...) or min([a, b, ...]).
    let items: Vec<Value> = if args.len() == 1 {
        match &args[0] {
            Value::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    } else {
        args.to_vec()
    };
    if items.is_empty() {
        return Err(ExprError::eval(format!("{name} of an empty sequence")));
    }
    let mut best = items[0].clone();
    for item in &items[1..] {
        let ordering = item.compare(&best)?;
        let replace = if want_max {
            ordering == std::cmp::Ordering::Greater
        } else {
            ordering == std::cmp::Ordering::Less
        };
        if replace {
            best = item.clone();
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_roster_matches_allow_list() {
        let registry = FunctionRegistry::with_builtins();
        for name in [
            "abs", "min", "max", "round", "floor", "ceil", "sqrt", "pow", "len", "sum", "all",
            "any", "str", "int", "float",
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
        assert!(!registry.contains("open"));
        assert!(!registry.contains("eval"));
    }

    #[test]
    fn sum_and_len() {
        let registry = FunctionRegistry::with_builtins();
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(registry.call("sum", &[list.clone()]).unwrap(), Value::Int(6));
        assert_eq!(registry.call("len", &[list]).unwrap(), Value::Int(3));
    }

    #[test]
    fn min_accepts_variadic_and_list() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry
                .call("min", &[Value::Int(4), Value::Int(2)])
                .unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            registry
                .call("max", &[Value::List(vec![Value::Int(4), Value::Int(9)])])
                .unwrap(),
            Value::Int(9)
        );
    }

    #[test]
    fn custom_registration() {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register("double", |args| {
            args[0].clone().mul(&Value::Int(2))
        });
        assert_eq!(
            registry.call("double", &[Value::Int(21)]).unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn conversions() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.call("int", &[Value::Str("42".into())]).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            registry.call("str", &[Value::Float(0.5)]).unwrap(),
            Value::Str("0.5".into())
        );
        assert!(registry.call("int", &[Value::Str("nope".into())]).is_err());
    }
}
