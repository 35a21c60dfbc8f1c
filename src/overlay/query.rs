use crate::model::{CustomField, FieldType};
use serde::{Deserialize, Serialize};

/// Filter and page over a DocType's custom fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFieldQuery {
    pub in_list_view: Option<bool>,
    pub fieldtype: Option<FieldType>,
    pub hidden: Option<bool>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl CustomFieldQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_list_view(mut self, value: bool) -> Self {
        self.in_list_view = Some(value);
        self
    }

    pub fn fieldtype(mut self, fieldtype: FieldType) -> Self {
        self.fieldtype = Some(fieldtype);
        self
    }

    pub fn hidden(mut self, value: bool) -> Self {
        self.hidden = Some(value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, custom: &CustomField) -> bool {
        let field = &custom.field;
        self.in_list_view.is_none_or(|v| field.in_list_view == v)
            && self.fieldtype.is_none_or(|t| field.fieldtype == t)
            && self.hidden.is_none_or(|v| field.hidden == v)
    }

    /// Applies filters, then `offset`, then `limit`.
    pub fn apply<'a, I>(&self, fields: I) -> Vec<CustomField>
    where
        I: IntoIterator<Item = &'a CustomField>,
    {
        fields
            .into_iter()
            .filter(|cf| self.matches(cf))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
