use crate::core::{MetaError, Result, Value};
use crate::schema::{ColumnType, TypeCategory};
use sqlparser::ast as sql_ast;

/// Scalar expression understood by the in-memory engine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Column(String),
    Literal(Value),
    Cast { expr: Box<Expr>, to: ColumnType },
    Function { name: String, args: Vec<Expr> },
    /// `*` inside `COUNT(*)`
    Wildcard,
    IsNull { expr: Box<Expr>, negated: bool },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    Not(Box<Expr>),
    Negate(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Subtract,
}

impl Expr {
    pub(crate) fn is_count(&self) -> bool {
        matches!(self, Self::Function { name, .. } if name == "COUNT")
    }
}

pub(crate) fn unsupported(what: impl std::fmt::Display) -> MetaError {
    MetaError::Database(format!("unsupported in memory database: {}", what))
}

/// Strips one level of `"` quoting, as printed by sqlparser's `Display`.
pub(crate) fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].replace("\"\"", "\"")
    } else {
        raw.to_string()
    }
}

pub(crate) fn object_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|part| unquote(&part.to_string()))
        .ok_or_else(|| MetaError::Database("empty object name".into()))
}

/// Converts sqlparser expressions, binding `$n` (and bare `?`) placeholders.
pub(crate) struct ExprConverter<'p> {
    params: &'p [Value],
    next_param: usize,
}

impl<'p> ExprConverter<'p> {
    pub(crate) fn new(params: &'p [Value]) -> Self {
        Self {
            params,
            next_param: 0,
        }
    }

    pub(crate) fn convert(&mut self, expr: sql_ast::Expr) -> Result<Expr> {
        match expr {
            sql_ast::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
            sql_ast::Expr::CompoundIdentifier(idents) => idents
                .last()
                .map(|ident| Expr::Column(ident.value.clone()))
                .ok_or_else(|| unsupported("empty identifier")),
            sql_ast::Expr::Value(val) => self.convert_value(val.value).map(Expr::Literal),
            sql_ast::Expr::Nested(inner) => self.convert(*inner),
            sql_ast::Expr::Cast { expr, data_type, .. } => Ok(Expr::Cast {
                expr: Box::new(self.convert(*expr)?),
                to: ColumnType::parse(&data_type.to_string()),
            }),
            sql_ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert(*inner)?),
                negated: false,
            }),
            sql_ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                expr: Box::new(self.convert(*inner)?),
                negated: true,
            }),
            sql_ast::Expr::UnaryOp { op, expr } => {
                let inner = Box::new(self.convert(*expr)?);
                match op {
                    sql_ast::UnaryOperator::Not => Ok(Expr::Not(inner)),
                    sql_ast::UnaryOperator::Minus => Ok(Expr::Negate(inner)),
                    sql_ast::UnaryOperator::Plus => Ok(*inner),
                    other => Err(unsupported(format!("unary operator {}", other))),
                }
            }
            sql_ast::Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    sql_ast::BinaryOperator::Eq => BinaryOp::Eq,
                    sql_ast::BinaryOperator::NotEq => BinaryOp::NotEq,
                    sql_ast::BinaryOperator::Lt => BinaryOp::Lt,
                    sql_ast::BinaryOperator::LtEq => BinaryOp::LtEq,
                    sql_ast::BinaryOperator::Gt => BinaryOp::Gt,
                    sql_ast::BinaryOperator::GtEq => BinaryOp::GtEq,
                    sql_ast::BinaryOperator::And => BinaryOp::And,
                    sql_ast::BinaryOperator::Or => BinaryOp::Or,
                    sql_ast::BinaryOperator::Plus => BinaryOp::Add,
                    sql_ast::BinaryOperator::Minus => BinaryOp::Subtract,
                    other => return Err(unsupported(format!("operator {}", other))),
                };
                Ok(Expr::Binary {
                    left: Box::new(self.convert(*left)?),
                    op,
                    right: Box::new(self.convert(*right)?),
                })
            }
            sql_ast::Expr::Function(func) => {
                let name = func.name.to_string().to_uppercase();
                let args = match func.args {
                    sql_ast::FunctionArguments::List(list) => list
                        .args
                        .into_iter()
                        .map(|arg| match arg {
                            sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e)) => {
                                self.convert(e)
                            }
                            sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Wildcard) => {
                                Ok(Expr::Wildcard)
                            }
                            other => Err(unsupported(format!("function argument {}", other))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => Vec::new(),
                };
                Ok(Expr::Function { name, args })
            }
            other => Err(unsupported(format!("expression {}", other))),
        }
    }

    fn convert_value(&mut self, value: sql_ast::Value) -> Result<Value> {
        match value {
            sql_ast::Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else {
                    n.parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| MetaError::Database(format!("invalid number: {}", n)))
                }
            }
            sql_ast::Value::SingleQuotedString(s) => Ok(Value::Text(s)),
            sql_ast::Value::Boolean(b) => Ok(Value::Boolean(b)),
            sql_ast::Value::Null => Ok(Value::Null),
            sql_ast::Value::Placeholder(p) => self.bind(&p),
            other => Err(unsupported(format!("literal {}", other))),
        }
    }

    fn bind(&mut self, placeholder: &str) -> Result<Value> {
        let idx = match placeholder.strip_prefix('$') {
            Some(n) => n
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| MetaError::Database(format!("bad placeholder {}", placeholder)))?,
            None => {
                self.next_param += 1;
                self.next_param - 1
            }
        };
        self.params.get(idx).cloned().ok_or_else(|| {
            MetaError::Database(format!(
                "placeholder {} has no bound parameter ({} given)",
                placeholder,
                self.params.len()
            ))
        })
    }
}

/// Evaluates `expr` against one row; `lookup` resolves column names.
pub(crate) fn eval(expr: &Expr, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Value> {
    match expr {
        Expr::Column(name) => {
            lookup(name).ok_or_else(|| MetaError::Database(format!("no such column: {}", name)))
        }
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Cast { expr, to } => cast(eval(expr, lookup)?, to),
        Expr::IsNull { expr, negated } => {
            let is_null = eval(expr, lookup)?.is_null();
            Ok(Value::Boolean(is_null != *negated))
        }
        Expr::Not(inner) => match truthy(&eval(inner, lookup)?) {
            Some(b) => Ok(Value::Boolean(!b)),
            None => Ok(Value::Null),
        },
        Expr::Negate(inner) => match eval(inner, lookup)? {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Null => Ok(Value::Null),
            other => Err(MetaError::Database(format!("cannot negate {}", other.type_name()))),
        },
        Expr::Binary { left, op, right } => {
            let l = eval(left, lookup)?;
            let r = eval(right, lookup)?;
            binary(l, *op, r)
        }
        Expr::Function { name, args } => {
            let values = args
                .iter()
                .filter(|a| **a != Expr::Wildcard)
                .map(|a| eval(a, lookup))
                .collect::<Result<Vec<_>>>()?;
            scalar_function(name, &values)
        }
        Expr::Wildcard => Err(unsupported("bare *")),
    }
}

/// `None` is SQL unknown.
pub(crate) fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Boolean(b) => Some(*b),
        Value::Integer(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        Value::Text(s) => Some(s.trim().parse::<f64>().map(|f| f != 0.0).unwrap_or(false)),
    }
}

fn binary(l: Value, op: BinaryOp, r: Value) -> Result<Value> {
    match op {
        BinaryOp::And => Ok(match (truthy(&l), truthy(&r)) {
            (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
            (Some(true), Some(true)) => Value::Boolean(true),
            _ => Value::Null,
        }),
        BinaryOp::Or => Ok(match (truthy(&l), truthy(&r)) {
            (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
            (Some(false), Some(false)) => Value::Boolean(false),
            _ => Value::Null,
        }),
        BinaryOp::Add | BinaryOp::Subtract => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let sign = if op == BinaryOp::Add { 1 } else { -1 };
            match (&l, &r) {
                (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a + sign * b)),
                _ => {
                    let a = as_f64(&l)?;
                    let b = as_f64(&r)?;
                    Ok(Value::Float(a + sign as f64 * b))
                }
            }
        }
        _ => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ordering = compare(&l, &r);
            let result = match op {
                BinaryOp::Eq => ordering == std::cmp::Ordering::Equal,
                BinaryOp::NotEq => ordering != std::cmp::Ordering::Equal,
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::LtEq => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinaryOp::GtEq => ordering != std::cmp::Ordering::Less,
                _ => false,
            };
            Ok(Value::Boolean(result))
        }
    }
}

fn as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| MetaError::Database(format!("'{}' is not a number", s))),
        Value::Null => Err(MetaError::Database("NULL is not a number".into())),
    }
}

fn compare(l: &Value, r: &Value) -> std::cmp::Ordering {
    match (as_f64(l), as_f64(r)) {
        (Ok(a), Ok(b)) if !matches!((l, r), (Value::Text(_), Value::Text(_))) => {
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        }
        _ => l.to_string().cmp(&r.to_string()),
    }
}

fn scalar_function(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "COALESCE" => Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null)),
        "LENGTH" | "CHAR_LENGTH" => match args {
            [value] => Ok(value
                .text_len()
                .map(|n| Value::Integer(n as i64))
                .unwrap_or(Value::Null)),
            _ => Err(MetaError::Database(format!("{} expects 1 argument", name))),
        },
        "UPPER" | "LOWER" => match args {
            [Value::Null] => Ok(Value::Null),
            [value] => {
                let text = value.to_string();
                Ok(Value::Text(if name == "UPPER" {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                }))
            }
            _ => Err(MetaError::Database(format!("{} expects 1 argument", name))),
        },
        other => Err(unsupported(format!("function {}", other))),
    }
}

/// Converts `value` to the storage class of `to`.
///
/// Values that cannot be represented fail instead of being silently
/// coerced, the way a strict backend behaves.
pub(crate) fn cast(value: Value, to: &ColumnType) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let invalid = |v: &Value| {
        MetaError::Database(format!("invalid input for type {}: '{}'", to, v))
    };
    match to.category() {
        TypeCategory::Integer | TypeCategory::Boolean => match &value {
            Value::Integer(_) => Ok(value),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Integer(*f as i64)),
            Value::Float(f) => Ok(Value::Integer(f.round() as i64)),
            Value::Text(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    Ok(Value::Integer(f.round() as i64))
                } else {
                    Err(invalid(&value))
                }
            }
            Value::Null => Ok(Value::Null),
        },
        TypeCategory::Decimal => match &value {
            Value::Float(_) => Ok(value),
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Boolean(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::Text(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| invalid(&value)),
            Value::Null => Ok(Value::Null),
        },
        TypeCategory::BoundedText => {
            let text = match &value {
                Value::Boolean(b) => i64::from(*b).to_string(),
                other => other.to_string(),
            };
            match to.length() {
                Some(max) if text.chars().count() > max as usize => Err(MetaError::Database(
                    format!("value too long for type {}: '{}'", to, text),
                )),
                _ => Ok(Value::Text(text)),
            }
        }
        TypeCategory::UnboundedText | TypeCategory::Temporal | TypeCategory::Other => match value {
            Value::Text(_) => Ok(value),
            Value::Boolean(b) => Ok(Value::Text(i64::from(b).to_string())),
            other => Ok(Value::Text(other.to_string())),
        },
    }
}
