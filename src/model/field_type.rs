use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of field types a DocType may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    Data,
    Int,
    Float,
    Currency,
    Percent,
    Check,
    Select,
    Date,
    Datetime,
    Time,
    Duration,
    Link,
    #[serde(rename = "Dynamic Link")]
    DynamicLink,
    Table,
    #[serde(rename = "Table MultiSelect")]
    TableMultiSelect,
    #[serde(rename = "Small Text")]
    SmallText,
    Text,
    #[serde(rename = "Long Text")]
    LongText,
    #[serde(rename = "Text Editor")]
    TextEditor,
    #[serde(rename = "Markdown Editor")]
    MarkdownEditor,
    #[serde(rename = "HTML Editor")]
    HtmlEditor,
    Code,
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "Read Only")]
    ReadOnly,
    Autocomplete,
    Phone,
    Barcode,
    Geolocation,
    Signature,
    Attach,
    #[serde(rename = "Attach Image")]
    AttachImage,
    Rating,
    Color,
    Password,
    #[serde(rename = "Section Break")]
    SectionBreak,
    #[serde(rename = "Column Break")]
    ColumnBreak,
    #[serde(rename = "Tab Break")]
    TabBreak,
    Fold,
    Heading,
    Button,
    #[serde(rename = "HTML")]
    Html,
    Image,
}

impl FieldType {
    pub const ALL: [FieldType; 42] = [
        Self::Data,
        Self::Int,
        Self::Float,
        Self::Currency,
        Self::Percent,
        Self::Check,
        Self::Select,
        Self::Date,
        Self::Datetime,
        Self::Time,
        Self::Duration,
        Self::Link,
        Self::DynamicLink,
        Self::Table,
        Self::TableMultiSelect,
        Self::SmallText,
        Self::Text,
        Self::LongText,
        Self::TextEditor,
        Self::MarkdownEditor,
        Self::HtmlEditor,
        Self::Code,
        Self::Json,
        Self::ReadOnly,
        Self::Autocomplete,
        Self::Phone,
        Self::Barcode,
        Self::Geolocation,
        Self::Signature,
        Self::Attach,
        Self::AttachImage,
        Self::Rating,
        Self::Color,
        Self::Password,
        Self::SectionBreak,
        Self::ColumnBreak,
        Self::TabBreak,
        Self::Fold,
        Self::Heading,
        Self::Button,
        Self::Html,
        Self::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "Data",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Currency => "Currency",
            Self::Percent => "Percent",
            Self::Check => "Check",
            Self::Select => "Select",
            Self::Date => "Date",
            Self::Datetime => "Datetime",
            Self::Time => "Time",
            Self::Duration => "Duration",
            Self::Link => "Link",
            Self::DynamicLink => "Dynamic Link",
            Self::Table => "Table",
            Self::TableMultiSelect => "Table MultiSelect",
            Self::SmallText => "Small Text",
            Self::Text => "Text",
            Self::LongText => "Long Text",
            Self::TextEditor => "Text Editor",
            Self::MarkdownEditor => "Markdown Editor",
            Self::HtmlEditor => "HTML Editor",
            Self::Code => "Code",
            Self::Json => "JSON",
            Self::ReadOnly => "Read Only",
            Self::Autocomplete => "Autocomplete",
            Self::Phone => "Phone",
            Self::Barcode => "Barcode",
            Self::Geolocation => "Geolocation",
            Self::Signature => "Signature",
            Self::Attach => "Attach",
            Self::AttachImage => "Attach Image",
            Self::Rating => "Rating",
            Self::Color => "Color",
            Self::Password => "Password",
            Self::SectionBreak => "Section Break",
            Self::ColumnBreak => "Column Break",
            Self::TabBreak => "Tab Break",
            Self::Fold => "Fold",
            Self::Heading => "Heading",
            Self::Button => "Button",
            Self::Html => "HTML",
            Self::Image => "Image",
        }
    }

    /// Pure form-layout types. They never own a physical column.
    pub fn is_layout(&self) -> bool {
        matches!(
            self,
            Self::SectionBreak
                | Self::ColumnBreak
                | Self::TabBreak
                | Self::Fold
                | Self::Heading
                | Self::Button
                | Self::Html
                | Self::Image
        )
    }

    /// Child-table references; rows live in the child DocType's own table.
    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table | Self::TableMultiSelect)
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link | Self::DynamicLink)
    }

    pub fn has_column(&self) -> bool {
        !self.is_layout() && !self.is_table()
    }

    /// Types that cannot be declared without an `options` target.
    pub fn requires_options(&self) -> bool {
        matches!(
            self,
            Self::Link | Self::DynamicLink | Self::Table | Self::TableMultiSelect | Self::Select
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .find(|ft| ft.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown fieldtype '{}'", s))
    }
}
