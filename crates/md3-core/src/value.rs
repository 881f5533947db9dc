use std::fmt;
use thiserror::Error;

pub const ARRAY_SEP: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::List(_) => "array",
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Int(value) => value.to_string(),
            Value::Double(value) => format_double(*value),
            Value::Str(value) => value.clone(),
            Value::List(items) => {
                let mut out = String::new();
                out.push(ARRAY_SEP);
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(ARRAY_SEP);
                    }
                    out.push_str(&item.encode());
                }
                out.push(ARRAY_SEP);
                out
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

// Shortest round-trip digits; exponent form outside [1e-4, 1e16) as the device renders doubles.
fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let text = if value < 0.0 { "-Infinity" } else { "Infinity" };
        return text.to_string();
    }
    if value == 0.0 {
        let text = if value.is_sign_negative() { "-0.0" } else { "0.0" };
        return text.to_string();
    }

    let scientific = format!("{value:e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent = exponent.parse::<i32>().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let fixed = value.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{fixed}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Integer,
    Double,
    String,
}

impl ArrayKind {
    fn element_tag(self) -> TypeTag {
        match self {
            ArrayKind::Integer => TypeTag::Integer,
            ArrayKind::Double => TypeTag::Double,
            ArrayKind::String => TypeTag::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Double,
    Boolean,
    Integer,
    State,
    Enumeration(&'static str),
    Array(ArrayKind),
}

impl TypeTag {
    pub fn signature(&self) -> &'static str {
        match self {
            TypeTag::String => "java.lang.String",
            TypeTag::Double => "java.lang.Double",
            TypeTag::Boolean => "java.lang.Boolean",
            TypeTag::Integer => "java.lang.Integer",
            TypeTag::State => "org.embl.State",
            TypeTag::Enumeration(signature) => signature,
            TypeTag::Array(ArrayKind::Integer) => "int[]",
            TypeTag::Array(ArrayKind::Double) => "double[]",
            TypeTag::Array(ArrayKind::String) => "java.lang.String[]",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeTag::String | TypeTag::State | TypeTag::Enumeration(_), Value::Str(_)) => true,
            (TypeTag::Double, Value::Double(_)) => true,
            (TypeTag::Integer, Value::Int(_)) => true,
            (TypeTag::Boolean, Value::Bool(_)) => true,
            (TypeTag::Array(kind), Value::List(items)) => {
                let element = kind.element_tag();
                items.iter().all(|item| element.accepts(item))
            }
            _ => false,
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), CodecError> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(CodecError::TypeMismatch {
                expected: self.signature(),
                found: value.kind_name(),
            })
        }
    }

    pub fn decode(&self, raw: &str) -> Result<Value, CodecError> {
        match self {
            TypeTag::String | TypeTag::State | TypeTag::Enumeration(_) => {
                Ok(Value::Str(raw.to_string()))
            }
            TypeTag::Boolean => parse_bool(raw).map(Value::Bool),
            TypeTag::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| CodecError::InvalidInteger(raw.to_string())),
            TypeTag::Double => parse_double(raw).map(Value::Double),
            TypeTag::Array(kind) => {
                let inner = raw
                    .strip_prefix(ARRAY_SEP)
                    .ok_or_else(|| CodecError::InvalidArray(raw.to_string()))?;
                let inner = inner.strip_suffix(ARRAY_SEP).unwrap_or(inner);
                if inner.is_empty() {
                    return Ok(Value::List(Vec::new()));
                }
                let element = kind.element_tag();
                inner
                    .split(ARRAY_SEP)
                    .map(|item| element.decode(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool, CodecError> {
    match raw.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CodecError::InvalidBoolean(raw.to_string())),
    }
}

fn parse_double(raw: &str) -> Result<f64, CodecError> {
    let trimmed = raw.trim();
    match trimmed {
        "Infinity" | "+Infinity" => return Ok(f64::INFINITY),
        "-Infinity" => return Ok(f64::NEG_INFINITY),
        _ => {}
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| CodecError::InvalidDouble(raw.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected boolean: {0}")]
    InvalidBoolean(String),
    #[error("invalid integer: {0}")]
    InvalidInteger(String),
    #[error("invalid double: {0}")]
    InvalidDouble(String),
    #[error("invalid array: {0:?}")]
    InvalidArray(String),
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}
