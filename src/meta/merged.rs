use crate::model::{CustomField, DocType, Field, FieldType};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Effective metadata of one DocType with lookup indexes.
///
/// Built once per cache fill and shared behind an `Arc`; never mutated.
#[derive(Debug)]
pub struct MergedMeta {
    doctype: Arc<DocType>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<FieldType, Vec<usize>>,
    required: Vec<usize>,
    unique: Vec<usize>,
    valid_columns: OnceLock<Vec<usize>>,
}

impl MergedMeta {
    pub fn new(doctype: DocType) -> Self {
        let mut by_name = HashMap::with_capacity(doctype.fields.len());
        let mut by_type: HashMap<FieldType, Vec<usize>> = HashMap::new();
        let mut required = Vec::new();
        let mut unique = Vec::new();

        for (idx, field) in doctype.fields.iter().enumerate() {
            // First declaration wins if a bad record slipped through.
            by_name.entry(field.fieldname.clone()).or_insert(idx);
            by_type.entry(field.fieldtype).or_default().push(idx);
            if field.required {
                required.push(idx);
            }
            if field.unique {
                unique.push(idx);
            }
        }

        Self {
            doctype: Arc::new(doctype),
            by_name,
            by_type,
            required,
            unique,
            valid_columns: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.doctype.name
    }

    pub fn doctype(&self) -> &DocType {
        &self.doctype
    }

    /// Shared handle to the effective DocType.
    pub fn doctype_arc(&self) -> Arc<DocType> {
        Arc::clone(&self.doctype)
    }

    pub fn fields(&self) -> &[Field] {
        &self.doctype.fields
    }

    pub fn custom_fields(&self) -> &[CustomField] {
        &self.doctype.custom_fields
    }

    pub fn get_field(&self, fieldname: &str) -> Option<&Field> {
        self.by_name
            .get(fieldname)
            .map(|&idx| &self.doctype.fields[idx])
    }

    pub fn has_field(&self, fieldname: &str) -> bool {
        self.by_name.contains_key(fieldname)
    }

    pub fn get_fields_by_type(&self, fieldtype: FieldType) -> Vec<&Field> {
        self.pick(self.by_type.get(&fieldtype).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// `Link` and `Dynamic Link` fields, in declaration order.
    pub fn get_link_fields(&self) -> Vec<&Field> {
        self.doctype
            .fields
            .iter()
            .filter(|f| f.fieldtype.is_link())
            .collect()
    }

    pub fn get_table_fields(&self) -> Vec<&Field> {
        self.doctype
            .fields
            .iter()
            .filter(|f| f.fieldtype.is_table())
            .collect()
    }

    pub fn get_select_fields(&self) -> Vec<&Field> {
        self.get_fields_by_type(FieldType::Select)
    }

    pub fn get_required_fields(&self) -> Vec<&Field> {
        self.pick(&self.required)
    }

    pub fn get_unique_fields(&self) -> Vec<&Field> {
        self.pick(&self.unique)
    }

    /// Fields backed by a physical column. Computed on first use.
    pub fn get_valid_columns(&self) -> Vec<&Field> {
        let indexes = self.valid_columns.get_or_init(|| {
            self.doctype
                .fields
                .iter()
                .enumerate()
                .filter(|(_, f)| f.has_column())
                .map(|(idx, _)| idx)
                .collect()
        });
        self.pick(indexes)
    }

    pub fn get_valid_column_names(&self) -> Vec<&str> {
        self.get_valid_columns()
            .into_iter()
            .map(|f| f.fieldname.as_str())
            .collect()
    }

    /// `search_fields` split on commas; blanks dropped.
    pub fn get_search_fields(&self) -> Vec<&str> {
        self.doctype
            .search_fields
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_title_field(&self) -> Option<&str> {
        self.doctype.title_field.as_deref().filter(|s| !s.is_empty())
    }

    pub fn get_image_field(&self) -> Option<&str> {
        self.doctype.image_field.as_deref().filter(|s| !s.is_empty())
    }

    pub fn get_label(&self, fieldname: &str) -> Option<&str> {
        self.get_field(fieldname).map(|f| f.label.as_str())
    }

    pub fn get_options(&self, fieldname: &str) -> Option<&str> {
        self.get_field(fieldname).and_then(Field::options_str)
    }

    /// Choices of a `Select` field, one per line of `options`.
    pub fn get_select_options(&self, fieldname: &str) -> Vec<&str> {
        match self.get_field(fieldname) {
            Some(field) if field.fieldtype == FieldType::Select => field
                .options_str()
                .map(|o| o.lines().map(str::trim).filter(|l| !l.is_empty()).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn pick(&self, indexes: &[usize]) -> Vec<&Field> {
        indexes.iter().map(|&idx| &self.doctype.fields[idx]).collect()
    }
}
