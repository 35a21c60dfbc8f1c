use super::FieldType;
use serde::{Deserialize, Serialize};

/// One attribute of a DocType.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub fieldname: String,
    #[serde(default)]
    pub label: String,
    pub fieldtype: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, rename = "reqd", alias = "required", with = "super::flag")]
    pub required: bool,
    #[serde(default, with = "super::flag")]
    pub unique: bool,
    #[serde(default, with = "super::flag")]
    pub hidden: bool,
    #[serde(default, with = "super::flag")]
    pub read_only: bool,
    #[serde(default, with = "super::flag")]
    pub in_list_view: bool,
    #[serde(default, with = "super::flag")]
    pub search_index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub permlevel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory_depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Previous column name; lets the comparator emit a rename instead of drop+add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_fieldname: Option<String>,
}

impl Field {
    pub fn new(fieldname: impl Into<String>, label: impl Into<String>, fieldtype: FieldType) -> Self {
        Self {
            fieldname: fieldname.into(),
            label: label.into(),
            fieldtype,
            options: None,
            required: false,
            unique: false,
            hidden: false,
            read_only: false,
            in_list_view: false,
            search_index: false,
            length: None,
            precision: None,
            default: None,
            permlevel: 0,
            depends_on: None,
            mandatory_depends_on: None,
            read_only_depends_on: None,
            fetch_from: None,
            description: None,
            old_fieldname: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn in_list_view(mut self) -> Self {
        self.in_list_view = true;
        self
    }

    pub fn search_index(mut self) -> Self {
        self.search_index = true;
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn depends_on(mut self, expression: impl Into<String>) -> Self {
        self.depends_on = Some(expression.into());
        self
    }

    pub fn renamed_from(mut self, old_fieldname: impl Into<String>) -> Self {
        self.old_fieldname = Some(old_fieldname.into());
        self
    }

    pub fn has_column(&self) -> bool {
        self.fieldtype.has_column()
    }

    /// Non-empty `options`, trimmed.
    pub fn options_str(&self) -> Option<&str> {
        self.options.as_deref().map(str::trim).filter(|o| !o.is_empty())
    }

    /// Every dependency expression declared on the field.
    pub fn dependency_expressions(&self) -> impl Iterator<Item = &str> {
        [
            self.depends_on.as_deref(),
            self.mandatory_depends_on.as_deref(),
            self.read_only_depends_on.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|expr| !expr.trim().is_empty())
    }

    /// Fieldnames this field reads through its dependency expressions and
    /// `fetch_from`, without duplicates.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let fetched = self
            .fetch_from
            .as_deref()
            .and_then(super::depends::fetch_source)
            .map(str::to_string);
        for name in self
            .dependency_expressions()
            .flat_map(super::depends::referenced_fieldnames)
            .chain(fetched)
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
