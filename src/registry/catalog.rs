use crate::core::{MetaError, ObjectKind, Result};
use crate::model::DocType;
use im::{OrdMap, OrdSet};
use std::sync::Arc;

/// Immutable snapshot of registered DocTypes.
///
/// Built on persistent maps: every mutation returns a new catalog that
/// shares structure with the old one, so readers holding a snapshot never
/// see a half-applied change and cloning is O(1).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    doctypes: OrdMap<String, Arc<DocType>>,
    modules: OrdMap<String, OrdSet<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a DocType - returns a NEW catalog.
    pub fn with_doctype(&self, doctype: Arc<DocType>) -> Result<Self> {
        if self.doctypes.contains_key(&doctype.name) {
            return Err(MetaError::already_exists(ObjectKind::DocType, doctype.name.clone()));
        }
        let mut next = self.clone();
        next.index_module(&doctype.module, &doctype.name);
        next.doctypes.insert(doctype.name.clone(), doctype);
        Ok(next)
    }

    /// Swaps an existing definition, moving it between modules if needed.
    pub fn replacing(&self, doctype: Arc<DocType>) -> Result<Self> {
        let next = self.without_doctype(&doctype.name)?;
        next.with_doctype(doctype)
    }

    /// Removes a DocType - returns a NEW catalog.
    pub fn without_doctype(&self, name: &str) -> Result<Self> {
        let Some(existing) = self.doctypes.get(name) else {
            return Err(MetaError::not_found(ObjectKind::DocType, name));
        };
        let mut next = self.clone();
        let module = existing.module.clone();
        next.doctypes.remove(name);
        if let Some(names) = next.modules.get(&module) {
            let names = names.without(name);
            if names.is_empty() {
                next.modules.remove(&module);
            } else {
                next.modules.insert(module, names);
            }
        }
        Ok(next)
    }

    fn index_module(&mut self, module: &str, name: &str) {
        let names = self
            .modules
            .get(module)
            .cloned()
            .unwrap_or_default()
            .update(name.to_string());
        self.modules.insert(module.to_string(), names);
    }

    pub fn get(&self, name: &str) -> Option<Arc<DocType>> {
        self.doctypes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.doctypes.contains_key(name)
    }

    /// All DocTypes ordered by name.
    pub fn all(&self) -> Vec<Arc<DocType>> {
        self.doctypes.values().cloned().collect()
    }

    pub fn by_module(&self, module: &str) -> Vec<Arc<DocType>> {
        self.modules
            .get(module)
            .map(|names| names.iter().filter_map(|n| self.get(n)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.doctypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doctypes.is_empty()
    }

    pub fn count_by_module(&self, module: &str) -> usize {
        self.modules.get(module).map(OrdSet::len).unwrap_or(0)
    }

    pub fn modules(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, module: &str) -> Arc<DocType> {
        Arc::new(DocType::new(name, module))
    }

    #[test]
    fn test_copy_on_write() {
        let empty = Catalog::new();
        let one = empty.with_doctype(doc("User", "Core")).unwrap();
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert!(one.contains("User"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let catalog = Catalog::new().with_doctype(doc("User", "Core")).unwrap();
        let err = catalog.with_doctype(doc("User", "Other")).unwrap_err();
        assert!(matches!(err, MetaError::AlreadyExists { .. }));
    }

    #[test]
    fn test_module_index() {
        let catalog = Catalog::new()
            .with_doctype(doc("User", "Core"))
            .unwrap()
            .with_doctype(doc("Role", "Core"))
            .unwrap()
            .with_doctype(doc("ToDo", "Desk"))
            .unwrap();
        assert_eq!(catalog.count_by_module("Core"), 2);
        assert_eq!(catalog.modules(), vec!["Core".to_string(), "Desk".to_string()]);
        let names: Vec<String> = catalog.by_module("Core").iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["Role", "User"]);

        let catalog = catalog.without_doctype("ToDo").unwrap();
        assert_eq!(catalog.modules(), vec!["Core".to_string()]);
        assert!(catalog.without_doctype("ToDo").unwrap_err().is_not_found());
    }

    #[test]
    fn test_replacing_moves_module() {
        let catalog = Catalog::new().with_doctype(doc("Note", "Desk")).unwrap();
        let catalog = catalog.replacing(doc("Note", "Core")).unwrap();
        assert_eq!(catalog.count_by_module("Desk"), 0);
        assert_eq!(catalog.count_by_module("Core"), 1);
    }
}
