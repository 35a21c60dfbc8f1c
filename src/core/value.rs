use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell returned by a driver query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

pub type Row = Vec<Value>;

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Boolean(b) => Some(i64::from(*b)),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Character length as seen by `LENGTH()`; NULL has no length.
    pub fn text_len(&self) -> Option<usize> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.chars().count()),
            other => Some(other.to_string().chars().count()),
        }
    }

    /// Parses a SQL literal as written in a `DEFAULT` clause.
    pub fn from_sql_literal(literal: &str) -> Self {
        let literal = literal.trim();
        if literal.eq_ignore_ascii_case("NULL") {
            return Self::Null;
        }
        if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
            return Self::Text(literal[1..literal.len() - 1].replace("''", "'"));
        }
        if literal.eq_ignore_ascii_case("TRUE") {
            return Self::Boolean(true);
        }
        if literal.eq_ignore_ascii_case("FALSE") {
            return Self::Boolean(false);
        }
        if let Ok(i) = literal.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(f) = literal.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Text(literal.to_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                (*i as f64 - f).abs() < f64::EPSILON
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}
