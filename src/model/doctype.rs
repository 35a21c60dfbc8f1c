use super::{CustomField, Field};
use serde::{Deserialize, Serialize};

/// Declared document type: the logical schema of one table plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocType {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default, alias = "issingle", with = "super::flag")]
    pub is_single: bool,
    #[serde(default, alias = "istable", with = "super::flag")]
    pub is_table: bool,
    #[serde(default, with = "super::flag")]
    pub is_submittable: bool,
    #[serde(default, with = "super::flag")]
    pub is_tree: bool,
    #[serde(default, with = "super::flag")]
    pub is_virtual: bool,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field: Option<String>,
    /// Comma separated fieldnames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_field: Option<String>,
    #[serde(default, with = "super::flag")]
    pub track_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Custom fields that were spliced into `fields`, listed separately for
    /// introspection. Always empty on a base definition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomField>,
}

impl DocType {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            is_single: false,
            is_table: false,
            is_submittable: false,
            is_tree: false,
            is_virtual: false,
            fields: Vec::new(),
            permissions: Vec::new(),
            indexes: Vec::new(),
            title_field: None,
            search_fields: None,
            image_field: None,
            track_changes: false,
            sort_field: None,
            sort_order: None,
            description: None,
            custom_fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn field(&self, fieldname: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.fieldname == fieldname)
    }

    pub fn field_mut(&mut self, fieldname: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.fieldname == fieldname)
    }

    pub fn has_field(&self, fieldname: &str) -> bool {
        self.field(fieldname).is_some()
    }

    pub fn fieldnames(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.fieldname.clone()).collect()
    }
}

/// Role based capability grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub permlevel: u8,
    #[serde(default, with = "super::flag")]
    pub read: bool,
    #[serde(default, with = "super::flag")]
    pub write: bool,
    #[serde(default, with = "super::flag")]
    pub create: bool,
    #[serde(default, with = "super::flag")]
    pub delete: bool,
    #[serde(default, with = "super::flag")]
    pub submit: bool,
    #[serde(default, with = "super::flag")]
    pub cancel: bool,
    #[serde(default, with = "super::flag")]
    pub amend: bool,
    #[serde(default, with = "super::flag")]
    pub report: bool,
    #[serde(default, with = "super::flag")]
    pub export: bool,
    #[serde(default, with = "super::flag")]
    pub import: bool,
    #[serde(default, with = "super::flag")]
    pub share: bool,
    #[serde(default, with = "super::flag")]
    pub print: bool,
    #[serde(default, with = "super::flag")]
    pub email: bool,
    #[serde(default, with = "super::flag")]
    pub if_owner: bool,
    #[serde(default, rename = "match", alias = "condition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Permission {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            permlevel: 0,
            read: false,
            write: false,
            create: false,
            delete: false,
            submit: false,
            cancel: false,
            amend: false,
            report: false,
            export: false,
            import: false,
            share: false,
            print: false,
            email: false,
            if_owner: false,
            condition: None,
        }
    }

    /// Read, write, create and delete.
    pub fn full(role: impl Into<String>) -> Self {
        let mut perm = Self::new(role);
        perm.read = true;
        perm.write = true;
        perm.create = true;
        perm.delete = true;
        perm
    }

    pub fn read_only(role: impl Into<String>) -> Self {
        let mut perm = Self::new(role);
        perm.read = true;
        perm
    }
}

/// Declared secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default, with = "super::flag")]
    pub unique: bool,
    /// Partial index predicate, rendered verbatim after `WHERE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

impl Index {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            predicate: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn partial(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;

    #[test]
    fn test_deserialize_frappe_style_record() {
        let doc: DocType = serde_json::from_str(
            r#"{
                "name": "ToDo",
                "module": "Desk",
                "istable": 0,
                "track_changes": 1,
                "fields": [
                    {"fieldname": "status", "label": "Status", "fieldtype": "Select", "options": "Open\nClosed"},
                    {"fieldname": "sb0", "label": "Details", "fieldtype": "Section Break"}
                ],
                "permissions": [{"role": "System Manager", "read": 1, "write": 1}]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.name, "ToDo");
        assert!(!doc.is_table);
        assert!(doc.track_changes);
        assert_eq!(doc.fields.len(), 2);
        assert_eq!(doc.fields[1].fieldtype, FieldType::SectionBreak);
        assert!(doc.permissions[0].write);
        assert!(doc.custom_fields.is_empty());
    }

    #[test]
    fn test_builder_and_lookup() {
        let doc = DocType::new("User", "Core")
            .with_field(Field::new("email", "Email", FieldType::Data).required().unique())
            .with_permission(Permission::full("Administrator"))
            .with_index(Index::new("idx_email_name", ["email", "name"]).unique());
        assert!(doc.has_field("email"));
        assert!(!doc.has_field("phone"));
        assert_eq!(doc.fieldnames(), vec!["email".to_string()]);
        assert!(doc.indexes[0].unique);
    }
}
