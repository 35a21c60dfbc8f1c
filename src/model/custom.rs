use super::{DocType, Field};
use crate::core::{IssueKind, MetaError, Result, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A field added to a DocType outside of its base declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    /// Owning DocType name.
    pub dt: String,
    pub field: Field,
    /// Position among the merged fields. Base field `i` (zero based) sits at
    /// `i + 1`, so `1.5` lands between the first and second base field.
    /// `None` appends after everything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_after: Option<String>,
}

impl CustomField {
    pub fn new(dt: impl Into<String>, field: Field) -> Self {
        Self {
            dt: dt.into(),
            field,
            order: None,
            insert_after: None,
        }
    }

    pub fn at(mut self, order: f64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn after(mut self, fieldname: impl Into<String>) -> Self {
        self.insert_after = Some(fieldname.into());
        self
    }

    pub fn fieldname(&self) -> &str {
        &self.field.fieldname
    }

    pub fn sort_key(&self) -> f64 {
        self.order.unwrap_or(f64::INFINITY)
    }
}

/// Loosely typed property value as stored by a property setter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::Text(s) => match s.trim() {
                "1" | "true" | "True" => Some(true),
                "0" | "false" | "False" => Some(false),
                _ => None,
            },
            Self::Int(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Text form; an empty string clears optional properties.
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(true) => "1".to_string(),
            Self::Bool(false) => "0".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Override of a single property on a field, or on the DocType itself when
/// `fieldname` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySetter {
    pub doctype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldname: Option<String>,
    pub property: String,
    pub value: PropertyValue,
}

fn invalid_value(property: &str, value: &PropertyValue, expected: &str) -> MetaError {
    MetaError::ValidationFailed(vec![ValidationIssue::error(
        IssueKind::Invalid,
        property,
        format!("value '{}' is not a valid {}", value, expected),
    )])
}

fn optional_text(value: &PropertyValue) -> Option<String> {
    let text = value.as_text();
    if text.is_empty() { None } else { Some(text) }
}

/// Field-level properties a setter may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldProperty {
    Label,
    Required,
    Hidden,
    ReadOnly,
    Unique,
    InListView,
    SearchIndex,
    Options,
    Default,
    Length,
    Precision,
    Permlevel,
    DependsOn,
    MandatoryDependsOn,
    ReadOnlyDependsOn,
    FetchFrom,
    Description,
}

impl FieldProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Required => "reqd",
            Self::Hidden => "hidden",
            Self::ReadOnly => "read_only",
            Self::Unique => "unique",
            Self::InListView => "in_list_view",
            Self::SearchIndex => "search_index",
            Self::Options => "options",
            Self::Default => "default",
            Self::Length => "length",
            Self::Precision => "precision",
            Self::Permlevel => "permlevel",
            Self::DependsOn => "depends_on",
            Self::MandatoryDependsOn => "mandatory_depends_on",
            Self::ReadOnlyDependsOn => "read_only_depends_on",
            Self::FetchFrom => "fetch_from",
            Self::Description => "description",
        }
    }

    /// Rejects values of the wrong shape before they are stored.
    pub fn check(&self, value: &PropertyValue) -> Result<()> {
        match self {
            Self::Required
            | Self::Hidden
            | Self::ReadOnly
            | Self::Unique
            | Self::InListView
            | Self::SearchIndex => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| invalid_value(self.as_str(), value, "flag")),
            Self::Label => Some(value.as_text())
                .filter(|label| !label.trim().is_empty())
                .map(|_| ())
                .ok_or_else(|| invalid_value(self.as_str(), value, "label")),
            Self::Length => value
                .as_i64()
                .filter(|v| *v > 0 && *v <= u32::MAX as i64)
                .map(|_| ())
                .ok_or_else(|| invalid_value(self.as_str(), value, "length")),
            Self::Precision | Self::Permlevel => value
                .as_i64()
                .filter(|v| (0..=u8::MAX as i64).contains(v))
                .map(|_| ())
                .ok_or_else(|| invalid_value(self.as_str(), value, "small integer")),
            _ => Ok(()),
        }
    }

    pub fn apply(&self, field: &mut Field, value: &PropertyValue) -> Result<()> {
        self.check(value)?;
        let flag = || value.as_bool().unwrap_or(false);
        match self {
            Self::Label => field.label = value.as_text(),
            Self::Required => field.required = flag(),
            Self::Hidden => field.hidden = flag(),
            Self::ReadOnly => field.read_only = flag(),
            Self::Unique => field.unique = flag(),
            Self::InListView => field.in_list_view = flag(),
            Self::SearchIndex => field.search_index = flag(),
            Self::Options => field.options = optional_text(value),
            Self::Default => field.default = optional_text(value),
            Self::Length => field.length = value.as_i64().map(|v| v as u32),
            Self::Precision => field.precision = value.as_i64().map(|v| v as u8),
            Self::Permlevel => field.permlevel = value.as_i64().unwrap_or(0) as u8,
            Self::DependsOn => field.depends_on = optional_text(value),
            Self::MandatoryDependsOn => field.mandatory_depends_on = optional_text(value),
            Self::ReadOnlyDependsOn => field.read_only_depends_on = optional_text(value),
            Self::FetchFrom => field.fetch_from = optional_text(value),
            Self::Description => field.description = optional_text(value),
        }
        Ok(())
    }
}

impl FromStr for FieldProperty {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "label" => Self::Label,
            "reqd" | "required" => Self::Required,
            "hidden" => Self::Hidden,
            "read_only" => Self::ReadOnly,
            "unique" => Self::Unique,
            "in_list_view" => Self::InListView,
            "search_index" => Self::SearchIndex,
            "options" => Self::Options,
            "default" => Self::Default,
            "length" => Self::Length,
            "precision" => Self::Precision,
            "permlevel" => Self::Permlevel,
            "depends_on" => Self::DependsOn,
            "mandatory_depends_on" => Self::MandatoryDependsOn,
            "read_only_depends_on" => Self::ReadOnlyDependsOn,
            "fetch_from" => Self::FetchFrom,
            "description" => Self::Description,
            _ => return Err(()),
        })
    }
}

/// DocType-level properties a setter may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocTypeProperty {
    TitleField,
    SearchFields,
    ImageField,
    TrackChanges,
    SortField,
    SortOrder,
    Description,
}

impl DocTypeProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TitleField => "title_field",
            Self::SearchFields => "search_fields",
            Self::ImageField => "image_field",
            Self::TrackChanges => "track_changes",
            Self::SortField => "sort_field",
            Self::SortOrder => "sort_order",
            Self::Description => "description",
        }
    }

    pub fn check(&self, value: &PropertyValue) -> Result<()> {
        match self {
            Self::TrackChanges => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| invalid_value(self.as_str(), value, "flag")),
            Self::SortOrder => match value.as_text().to_ascii_uppercase().as_str() {
                "ASC" | "DESC" => Ok(()),
                _ => Err(invalid_value(self.as_str(), value, "sort order")),
            },
            _ => Ok(()),
        }
    }

    pub fn apply(&self, doctype: &mut DocType, value: &PropertyValue) -> Result<()> {
        self.check(value)?;
        match self {
            Self::TitleField => doctype.title_field = optional_text(value),
            Self::SearchFields => doctype.search_fields = optional_text(value),
            Self::ImageField => doctype.image_field = optional_text(value),
            Self::TrackChanges => doctype.track_changes = value.as_bool().unwrap_or(false),
            Self::SortField => doctype.sort_field = optional_text(value),
            Self::SortOrder => doctype.sort_order = Some(value.as_text().to_ascii_uppercase()),
            Self::Description => doctype.description = optional_text(value),
        }
        Ok(())
    }
}

impl FromStr for DocTypeProperty {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "title_field" => Self::TitleField,
            "search_fields" => Self::SearchFields,
            "image_field" => Self::ImageField,
            "track_changes" => Self::TrackChanges,
            "sort_field" => Self::SortField,
            "sort_order" => Self::SortOrder,
            "description" => Self::Description,
            _ => return Err(()),
        })
    }
}
