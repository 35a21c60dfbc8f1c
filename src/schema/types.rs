use crate::config::EngineConfig;
use crate::core::Value;
use crate::model::{Field, FieldType};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref SQL_TYPE: Regex =
        Regex::new(r"(?i)^\s*([A-Za-z][A-Za-z ]*?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*(?:WITH(?:OUT)? TIME ZONE)?\s*$")
            .expect("static regex");
}

/// Physical column type, independent of any one backend's spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Varchar { length: u32 },
    Integer,
    Boolean,
    Decimal { precision: u8, scale: u8 },
    Float,
    Date,
    Timestamp,
    Time,
    Text,
    Json,
    Other { name: String },
}

/// Coarse grouping used to decide whether two types are cast compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    BoundedText,
    UnboundedText,
    Integer,
    Boolean,
    Decimal,
    Temporal,
    Other,
}

impl ColumnType {
    pub fn category(&self) -> TypeCategory {
        match self {
            Self::Varchar { .. } => TypeCategory::BoundedText,
            Self::Text | Self::Json => TypeCategory::UnboundedText,
            Self::Integer => TypeCategory::Integer,
            Self::Boolean => TypeCategory::Boolean,
            Self::Decimal { .. } | Self::Float => TypeCategory::Decimal,
            Self::Date | Self::Timestamp | Self::Time => TypeCategory::Temporal,
            Self::Other { .. } => TypeCategory::Other,
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self.category(),
            TypeCategory::BoundedText | TypeCategory::UnboundedText | TypeCategory::Temporal
        )
    }

    pub fn length(&self) -> Option<u32> {
        match self {
            Self::Varchar { length } => Some(*length),
            _ => None,
        }
    }

    /// Parses the common spellings of SQLite and PostgreSQL.
    pub fn parse(raw: &str) -> Self {
        let Some(caps) = SQL_TYPE.captures(raw) else {
            return Self::Other {
                name: raw.trim().to_string(),
            };
        };
        let base = caps[1].trim().to_ascii_uppercase();
        let first = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());

        match base.as_str() {
            "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" | "CHAR" | "CHARACTER" => match first {
                Some(length) => Self::Varchar { length },
                None => Self::Text,
            },
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "INT2" | "INT4" | "INT8" => {
                Self::Integer
            }
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "DECIMAL" | "NUMERIC" => Self::Decimal {
                precision: first.unwrap_or(18).min(u8::MAX as u32) as u8,
                scale: second.unwrap_or(0).min(u8::MAX as u32) as u8,
            },
            "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" | "FLOAT4" => Self::Float,
            "DATE" => Self::Date,
            "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" => Self::Timestamp,
            "TIME" | "TIMETZ" => Self::Time,
            "TEXT" | "CLOB" | "LONGTEXT" | "MEDIUMTEXT" => Self::Text,
            "JSON" | "JSONB" => Self::Json,
            _ => Self::Other {
                name: raw.trim().to_string(),
            },
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Varchar { length } => write!(f, "varchar({})", length),
            Self::Integer => write!(f, "integer"),
            Self::Boolean => write!(f, "boolean"),
            Self::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            Self::Float => write!(f, "float"),
            Self::Date => write!(f, "date"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Time => write!(f, "time"),
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Other { name } => write!(f, "{}", name),
        }
    }
}

/// How existing values survive a change from one type to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastSafety {
    NoOp,
    Widening,
    /// Values fit the category but may be truncated.
    Narrowing,
    /// Values need an explicit conversion that can fail or lose meaning.
    Incompatible,
}

impl CastSafety {
    pub fn between(from: &ColumnType, to: &ColumnType) -> Self {
        use ColumnType as T;

        if from == to {
            return Self::NoOp;
        }
        match (from, to) {
            (T::Varchar { length: a }, T::Varchar { length: b }) => {
                if b > a {
                    Self::Widening
                } else {
                    Self::Narrowing
                }
            }
            (T::Decimal { precision: p1, scale: s1 }, T::Decimal { precision: p2, scale: s2 }) => {
                let int_digits_from = p1.saturating_sub(*s1);
                let int_digits_to = p2.saturating_sub(*s2);
                if s2 >= s1 && int_digits_to >= int_digits_from {
                    Self::Widening
                } else {
                    Self::Narrowing
                }
            }
            (_, T::Text) if from.category() != TypeCategory::Other => Self::Widening,
            (T::Varchar { .. }, T::Json) => Self::Incompatible,
            (T::Text | T::Json, T::Varchar { .. }) => Self::Narrowing,
            (T::Integer | T::Boolean, T::Varchar { .. }) => Self::Widening,
            (T::Boolean, T::Integer) => Self::Widening,
            (T::Integer | T::Boolean, T::Decimal { .. } | T::Float) => Self::Widening,
            (T::Decimal { .. }, T::Float) => Self::Widening,
            (T::Float, T::Decimal { .. }) => Self::Narrowing,
            (T::Date, T::Timestamp) => Self::Widening,
            (T::Timestamp, T::Date | T::Time) => Self::Narrowing,
            (T::Date | T::Timestamp | T::Time, T::Varchar { .. }) => Self::Widening,
            _ => Self::Incompatible,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Narrowing | Self::Incompatible)
    }
}

/// Declared (or parsed) shape of one physical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    /// SQL literal, e.g. `'Open'` or `0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
            default: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Builds a typed definition from an introspected column.
    pub fn from_info(info: &ColumnInfo, column_type: ColumnType) -> Self {
        Self {
            name: info.name.clone(),
            column_type,
            nullable: info.nullable,
            unique: info.unique,
            default: info.default_value.clone(),
            primary_key: info.primary_key,
        }
    }
}

/// Column descriptor as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            unique: false,
            default_value: None,
            primary_key: false,
        }
    }
}

/// Index descriptor, used both for declared and introspected indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

impl IndexInfo {
    pub fn new<I, S>(name: impl Into<String>, columns: I, unique: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique,
            partial: false,
            predicate: None,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.partial = true;
        self.predicate = Some(predicate.into());
        self
    }

    /// Same name, same ordered columns, same uniqueness and the same
    /// predicate up to whitespace and enclosing parentheses.
    pub fn same_shape(&self, other: &IndexInfo) -> bool {
        self.name == other.name
            && self.columns == other.columns
            && self.unique == other.unique
            && self.partial == other.partial
            && self.predicate.as_deref().map(normalize_predicate)
                == other.predicate.as_deref().map(normalize_predicate)
    }

    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

fn normalize_predicate(predicate: &str) -> String {
    let mut text = predicate.split_whitespace().collect::<Vec<_>>().join(" ");
    while text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        let inner = &text[1..text.len() - 1];
        let mut depth = 0i32;
        let balanced = inner.chars().all(|c| {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            depth >= 0
        });
        if !balanced || depth != 0 {
            break;
        }
        text = inner.trim().to_string();
    }
    text
}

/// Introspected shape of one physical table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTable {
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl LiveTable {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Fieldtype to column-type table. Categories are fixed; sizes come from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMapping {
    pub varchar_length: u32,
    pub decimal_precision: u8,
    pub decimal_scale: u8,
}

impl TypeMapping {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            varchar_length: config.default_varchar_length,
            decimal_precision: config.decimal_precision,
            decimal_scale: config.decimal_scale,
        }
    }

    /// `None` for field types that own no column.
    pub fn column_type(&self, field: &Field) -> Option<ColumnType> {
        use FieldType as F;

        if !field.has_column() {
            return None;
        }
        let varchar = || ColumnType::Varchar {
            length: field.length.unwrap_or(self.varchar_length),
        };
        let decimal = || ColumnType::Decimal {
            precision: self.decimal_precision,
            scale: field
                .precision
                .unwrap_or(self.decimal_scale)
                .min(self.decimal_precision),
        };
        let ty = match field.fieldtype {
            F::Data
            | F::Link
            | F::DynamicLink
            | F::Select
            | F::ReadOnly
            | F::Autocomplete
            | F::Phone
            | F::Color
            | F::Password => varchar(),
            F::Int => ColumnType::Integer,
            F::Check => ColumnType::Boolean,
            F::Float | F::Currency | F::Percent | F::Duration => decimal(),
            F::Rating => ColumnType::Decimal {
                precision: 3,
                scale: 2,
            },
            F::Date => ColumnType::Date,
            F::Datetime => ColumnType::Timestamp,
            F::Time => ColumnType::Time,
            F::SmallText
            | F::Text
            | F::LongText
            | F::TextEditor
            | F::MarkdownEditor
            | F::HtmlEditor
            | F::Code
            | F::Attach
            | F::AttachImage
            | F::Barcode
            | F::Signature
            | F::Geolocation => ColumnType::Text,
            F::Json => ColumnType::Json,
            F::Table
            | F::TableMultiSelect
            | F::SectionBreak
            | F::ColumnBreak
            | F::TabBreak
            | F::Fold
            | F::Heading
            | F::Button
            | F::Html
            | F::Image => return None,
        };
        Some(ty)
    }

    /// Column definition for a field: type, nullability and default literal.
    ///
    /// Required fields and `Check` fields are NOT NULL. A NOT NULL column
    /// without a declared default gets the zero value of its category so it
    /// can be added to a populated table.
    pub fn column_def(&self, field: &Field) -> Option<ColumnDef> {
        let column_type = self.column_type(field)?;
        let nullable = !field.required && field.fieldtype != FieldType::Check;
        let declared = field
            .default
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| default_literal(&column_type, d));
        let default = match declared {
            Some(literal) => Some(literal),
            None if !nullable => zero_literal(&column_type),
            None => None,
        };
        Some(ColumnDef {
            name: field.fieldname.clone(),
            column_type,
            nullable,
            unique: field.unique,
            default,
            primary_key: false,
        })
    }
}

/// Renders a raw default value as a SQL literal for the column's type.
pub fn default_literal(column_type: &ColumnType, raw: &str) -> String {
    let raw = raw.trim();
    match column_type.category() {
        TypeCategory::Integer | TypeCategory::Boolean => match raw {
            "1" | "true" | "True" => "1".to_string(),
            "0" | "false" | "False" => "0".to_string(),
            other if other.parse::<i64>().is_ok() => other.to_string(),
            other => quote_literal(other),
        },
        TypeCategory::Decimal if raw.parse::<f64>().is_ok() => raw.to_string(),
        _ => quote_literal(raw),
    }
}

/// Backfill value for existing rows when a NOT NULL column is added.
fn zero_literal(column_type: &ColumnType) -> Option<String> {
    let literal = match column_type {
        ColumnType::Date => "'0001-01-01'",
        ColumnType::Timestamp => "'0001-01-01 00:00:00'",
        ColumnType::Time => "'00:00:00'",
        ColumnType::Json => "'{}'",
        other => match other.category() {
            TypeCategory::BoundedText | TypeCategory::UnboundedText => "''",
            TypeCategory::Integer | TypeCategory::Boolean | TypeCategory::Decimal => "0",
            TypeCategory::Temporal | TypeCategory::Other => return None,
        },
    };
    Some(literal.to_string())
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Compares two default literals by value, ignoring PostgreSQL casts
/// such as `'x'::character varying`.
pub fn same_default(a: Option<&str>, b: Option<&str>) -> bool {
    fn normalize(literal: Option<&str>) -> Value {
        let Some(raw) = literal else {
            return Value::Null;
        };
        let raw = raw.trim().trim_start_matches('(').trim_end_matches(')');
        let stripped = if raw.starts_with('\'') {
            match raw.rfind('\'') {
                Some(end) if end > 0 => &raw[..=end],
                _ => raw,
            }
        } else {
            raw.split("::").next().unwrap_or(raw)
        };
        Value::from_sql_literal(stripped)
    }
    normalize(a) == normalize(b)
}
