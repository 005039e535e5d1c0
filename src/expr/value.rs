//! Runtime values for condition evaluation.
//!
//! Values bridge attribute JSON and the DSL: integers and floats stay
//! distinct so counters compare exactly, while mixed arithmetic widens to
//! float. JSON objects have no DSL representation and surface as evaluation
//! errors when a condition touches one.

use std::fmt;

use serde_json::Value as Json;

use super::ExprError;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Convert an attribute JSON value into a DSL value.
    ///
    /// Objects are rejected: the DSL has no attribute access, so there is
    /// nothing a condition could legally do with one.
    pub fn from_json(json: &Json) -> Result<Self, ExprError> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(ExprError::eval("number out of representable range"))
                }
            }
            Json::String(s) => Ok(Value::Str(s.clone())),
            Json::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Json::Object(_) => Err(ExprError::eval(
                "object-valued attributes are not usable in conditions",
            )),
        }
    }

    /// Truthiness, Python-flavored: zero, empty, and null are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn add(&self, rhs: &Value) -> Result<Value, ExprError> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in `+`")),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                Ok(Value::List(joined))
            }
            _ => self.float_op(rhs, "+", |a, b| a + b),
        }
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, ExprError> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in `-`")),
            _ => self.float_op(rhs, "-", |a, b| a - b),
        }
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, ExprError> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in `*`")),
            _ => self.float_op(rhs, "*", |a, b| a * b),
        }
    }

    /// Division always produces a float; dividing by zero is an error, not
    /// an infinity.
    pub fn div(&self, rhs: &Value) -> Result<Value, ExprError> {
        let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) else {
            return Err(self.type_error("/", rhs));
        };
        if b == 0.0 {
            return Err(ExprError::eval("division by zero"));
        }
        Ok(Value::Float(a / b))
    }

    pub fn rem(&self, rhs: &Value) -> Result<Value, ExprError> {
        match (self, rhs) {
            (Value::Int(_), Value::Int(0)) => Err(ExprError::eval("modulo by zero")),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.rem_euclid(*b))),
            _ => {
                let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) else {
                    return Err(self.type_error("%", rhs));
                };
                if b == 0.0 {
                    return Err(ExprError::eval("modulo by zero"));
                }
                Ok(Value::Float(a.rem_euclid(b)))
            }
        }
    }

    pub fn neg(&self) -> Result<Value, ExprError> {
        match self {
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| ExprError::eval("integer overflow in negation")),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ExprError::eval(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        }
    }

    /// Equality: numeric values compare across int/float; other types
    /// compare only within their own type (and are simply unequal across
    /// types, never an error).
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (a, b) => a == b,
        }
    }

    /// Ordering comparison; only numbers and strings are ordered.
    pub fn compare(&self, rhs: &Value) -> Result<std::cmp::Ordering, ExprError> {
        use std::cmp::Ordering;
        if let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) {
            return a
                .partial_cmp(&b)
                .ok_or_else(|| ExprError::eval("cannot order NaN"));
        }
        if let (Value::Str(a), Value::Str(b)) = (self, rhs) {
            return Ok(a.cmp(b));
        }
        Err(ExprError::eval(format!(
            "cannot order {} against {}",
            self.type_name(),
            rhs.type_name()
        )))
    }

    /// Membership: element in list, or substring in string.
    pub fn contained_in(&self, container: &Value) -> Result<bool, ExprError> {
        match container {
            Value::List(items) => Ok(items.iter().any(|item| item.loose_eq(self))),
            Value::Str(haystack) => match self {
                Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
                other => Err(ExprError::eval(format!(
                    "cannot test {} membership in a string",
                    other.type_name()
                ))),
            },
            other => Err(ExprError::eval(format!(
                "`in` needs a list or string, got {}",
                other.type_name()
            ))),
        }
    }

    fn float_op(
        &self,
        rhs: &Value,
        symbol: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, ExprError> {
        let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) else {
            return Err(self.type_error(symbol, rhs));
        };
        Ok(Value::Float(f(a, b)))
    }

    fn type_error(&self, symbol: &str, rhs: &Value) -> ExprError {
        ExprError::eval(format!(
            "unsupported operands for `{symbol}`: {} and {}",
            self.type_name(),
            rhs.type_name()
        ))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
