//! Structural rules a DocType must satisfy before it is registered.
//!
//! Everything here is pure: no registry state is read, so the same checks
//! serve pre-flight callers and the custom field overlay.

use crate::core::{IssueKind, ValidationIssue};
use crate::model::depends::is_valid_fieldname;
use crate::model::{DocType, Field, FieldType};
use serde_json::Value as Json;
use std::collections::HashSet;
use std::str::FromStr;

/// All findings for `doctype`; it is valid iff none has error severity.
pub fn validate(doctype: &DocType) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if doctype.name.trim().is_empty() {
        issues.push(ValidationIssue::error(IssueKind::Required, "name", "DocType name is required"));
    }
    if doctype.module.trim().is_empty() {
        issues.push(ValidationIssue::error(IssueKind::Required, "module", "Module is required"));
    }

    let mut seen = HashSet::new();
    for (idx, field) in doctype.fields.iter().enumerate() {
        issues.extend(validate_field(field, idx));
        if !field.fieldname.is_empty() && !seen.insert(field.fieldname.as_str()) {
            issues.push(ValidationIssue::error(
                IssueKind::Duplicate,
                field.fieldname.clone(),
                format!("Duplicate fieldname '{}'", field.fieldname),
            ));
        }
    }

    for (idx, perm) in doctype.permissions.iter().enumerate() {
        if perm.role.trim().is_empty() {
            issues.push(ValidationIssue::error(
                IssueKind::Required,
                format!("permissions[{}].role", idx),
                "Permission role is required",
            ));
        }
    }

    issues.extend(reference_warnings(doctype, &seen));
    issues
}

/// Per-field rules shared with the overlay: required attributes and options.
pub fn validate_field(field: &Field, idx: usize) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let at = if field.fieldname.is_empty() {
        format!("fields[{}]", idx)
    } else {
        field.fieldname.clone()
    };

    if field.fieldname.trim().is_empty() {
        issues.push(ValidationIssue::error(IssueKind::Required, format!("fields[{}].fieldname", idx), "Fieldname is required"));
    } else if !is_valid_fieldname(&field.fieldname) {
        issues.push(ValidationIssue::warning(
            IssueKind::Invalid,
            at.clone(),
            format!("Fieldname '{}' is not a plain identifier", field.fieldname),
        ));
    }
    if field.label.trim().is_empty() {
        issues.push(ValidationIssue::error(IssueKind::Required, format!("{}.label", at), "Label is required"));
    }
    if field.fieldtype.requires_options() && field.options_str().is_none() {
        issues.push(ValidationIssue::error(
            IssueKind::MissingOptions,
            at,
            format!("{} field requires options", field.fieldtype),
        ));
    }
    issues
}

/// Warnings for DocType-level settings and dependencies naming unknown fields.
fn reference_warnings(doctype: &DocType, fieldnames: &HashSet<&str>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut check = |setting: &str, value: Option<&str>| {
        if let Some(name) = value.map(str::trim).filter(|v| !v.is_empty()) {
            if name != "name" && !fieldnames.contains(name) {
                issues.push(ValidationIssue::warning(
                    IssueKind::Invalid,
                    setting.to_string(),
                    format!("{} refers to unknown field '{}'", setting, name),
                ));
            }
        }
    };
    check("title_field", doctype.title_field.as_deref());
    check("image_field", doctype.image_field.as_deref());
    check("sort_field", doctype.sort_field.as_deref());
    if let Some(search) = doctype.search_fields.as_deref() {
        for name in search.split(',') {
            check("search_fields", Some(name));
        }
    }

    for field in &doctype.fields {
        for dependency in field.referenced_fields() {
            if !fieldnames.contains(dependency.as_str()) {
                issues.push(ValidationIssue::warning(
                    IssueKind::DependencyNotFound,
                    field.fieldname.clone(),
                    format!("Depends on unknown field '{}'", dependency),
                ));
            }
        }
    }
    issues
}

/// Validates a raw declarative record before it is typed.
///
/// Catches the shape problems serde would otherwise report as one opaque
/// error: missing arrays, missing field attributes and unknown fieldtypes.
pub fn validate_record(record: &Json) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let Some(obj) = record.as_object() else {
        issues.push(ValidationIssue::error(IssueKind::Invalid, "", "DocType record must be an object"));
        return issues;
    };

    for key in ["name", "module"] {
        let present = obj
            .get(key)
            .and_then(Json::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            issues.push(ValidationIssue::error(IssueKind::Required, key, format!("'{}' must be a non-empty string", key)));
        }
    }
    for key in ["fields", "permissions"] {
        if !obj.get(key).is_some_and(Json::is_array) {
            issues.push(ValidationIssue::error(IssueKind::Required, key, format!("'{}' must be an array", key)));
        }
    }

    if let Some(fields) = obj.get("fields").and_then(Json::as_array) {
        for (idx, field) in fields.iter().enumerate() {
            let Some(field) = field.as_object() else {
                issues.push(ValidationIssue::error(IssueKind::Invalid, format!("fields[{}]", idx), "Field must be an object"));
                continue;
            };
            for key in ["fieldname", "label", "fieldtype"] {
                let present = field
                    .get(key)
                    .and_then(Json::as_str)
                    .is_some_and(|s| !s.trim().is_empty());
                if !present {
                    issues.push(ValidationIssue::error(
                        IssueKind::Required,
                        format!("fields[{}].{}", idx, key),
                        format!("'{}' is required", key),
                    ));
                }
            }
            if let Some(raw) = field.get("fieldtype").and_then(Json::as_str) {
                if !raw.trim().is_empty() && FieldType::from_str(raw).is_err() {
                    issues.push(ValidationIssue::error(
                        IssueKind::Invalid,
                        format!("fields[{}].fieldtype", idx),
                        format!("Unknown fieldtype '{}'", raw),
                    ));
                }
            }
        }
    }

    if issues.iter().any(ValidationIssue::is_error) {
        return issues;
    }
    match serde_json::from_value::<DocType>(record.clone()) {
        Ok(doctype) => issues.extend(validate(&doctype)),
        Err(e) => issues.push(ValidationIssue::error(IssueKind::Invalid, "", e.to_string())),
    }
    issues
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(ValidationIssue::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;
    use crate::model::Permission;
    use serde_json::json;

    fn kinds(issues: &[ValidationIssue]) -> Vec<(IssueKind, Severity)> {
        issues.iter().map(|i| (i.kind, i.severity)).collect()
    }

    #[test]
    fn test_valid_doctype() {
        let doc = DocType::new("Task", "Projects")
            .with_field(Field::new("subject", "Subject", FieldType::Data).required())
            .with_field(Field::new("project", "Project", FieldType::Link).options("Project"))
            .with_permission(Permission::full("Projects User"));
        assert!(validate(&doc).is_empty());
    }

    #[test]
    fn test_required_name_and_module() {
        let issues = validate(&DocType::new("", " "));
        assert_eq!(
            kinds(&issues),
            vec![(IssueKind::Required, Severity::Error), (IssueKind::Required, Severity::Error)]
        );
        assert_eq!(issues[0].field, "name");
        assert_eq!(issues[1].field, "module");
    }

    #[test]
    fn test_duplicates_options_and_roles() {
        let doc = DocType::new("Task", "Projects")
            .with_field(Field::new("status", "Status", FieldType::Select))
            .with_field(Field::new("status", "Status Again", FieldType::Data))
            .with_field(Field::new("items", "", FieldType::Table).options("Task Item"))
            .with_permission(Permission::new(""));
        let issues = validate(&doc);
        let kinds = kinds(&issues);
        assert!(kinds.contains(&(IssueKind::MissingOptions, Severity::Error)));
        assert!(kinds.contains(&(IssueKind::Duplicate, Severity::Error)));
        assert!(issues.iter().any(|i| i.field == "items.label"));
        assert!(issues.iter().any(|i| i.field == "permissions[0].role"));
        assert!(has_errors(&issues));
    }

    #[test]
    fn test_reference_warnings_do_not_block() {
        let mut doc = DocType::new("Task", "Projects")
            .with_field(Field::new("subject", "Subject", FieldType::Data).depends_on("eval:doc.missing"));
        doc.title_field = Some("nope".into());
        let issues = validate(&doc);
        assert_eq!(issues.len(), 2);
        assert!(!has_errors(&issues));
        assert!(issues.iter().any(|i| i.kind == IssueKind::DependencyNotFound));
    }

    #[test]
    fn test_validate_record_shape() {
        let issues = validate_record(&json!({"name": "Task", "module": "Projects"}));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.kind == IssueKind::Required));

        let issues = validate_record(&json!({
            "name": "Task", "module": "Projects", "permissions": [],
            "fields": [{"fieldname": "x", "label": "X", "fieldtype": "Hologram"}, {"label": "Y"}]
        }));
        assert!(issues.iter().any(|i| i.kind == IssueKind::Invalid && i.field == "fields[0].fieldtype"));
        assert!(issues.iter().any(|i| i.field == "fields[1].fieldname"));
        assert!(issues.iter().any(|i| i.field == "fields[1].fieldtype"));
    }

    #[test]
    fn test_validate_record_falls_through_to_typed_rules() {
        let issues = validate_record(&json!({
            "name": "Task", "module": "Projects", "permissions": [],
            "fields": [{"fieldname": "owner_link", "label": "Owner", "fieldtype": "Link"}]
        }));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::MissingOptions);
    }
}
