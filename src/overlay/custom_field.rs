use super::{CustomFieldQuery, MetaOverlay, StoredCustomField};
use crate::core::{IssueKind, MetaError, ObjectKind, Result, ValidationIssue};
use crate::model::{CustomField, DocType, Field};
use crate::registry::{has_errors, validate_field};
use std::collections::{BTreeMap, HashSet};
use tracing::{Level, event};

fn key(dt: &str, fieldname: &str) -> String {
    format!("{}.{}", dt, fieldname)
}

impl MetaOverlay {
    /// Stores a new custom field for `custom.dt`.
    ///
    /// `existing_fieldnames` are the fieldnames already present on the
    /// DocType (base and custom) in merged order; they are used for the
    /// clash check, dependency resolution and `insert_after` placement.
    pub fn create_custom_field(
        &self,
        mut custom: CustomField,
        existing_fieldnames: &[String],
    ) -> Result<CustomField> {
        if custom.dt.trim().is_empty() {
            return Err(MetaError::ValidationFailed(vec![ValidationIssue::error(
                IssueKind::Required,
                "dt",
                "Custom field must name its DocType",
            )]));
        }
        let fieldname = custom.fieldname().to_string();
        let mut guard = self.custom_fields.write()?;

        let stored = guard.get(&custom.dt);
        if existing_fieldnames.iter().any(|f| *f == fieldname)
            || stored.is_some_and(|m| m.contains_key(&fieldname))
        {
            return Err(MetaError::already_exists(
                ObjectKind::CustomField,
                key(&custom.dt, &fieldname),
            ));
        }

        check_structure(&custom.field)?;
        let mut known: HashSet<&str> = existing_fieldnames.iter().map(String::as_str).collect();
        if let Some(stored) = stored {
            known.extend(stored.keys().map(String::as_str));
        }
        check_dependencies(&custom.field, &known)?;

        if custom.order.is_none() {
            if let Some(anchor) = custom.insert_after.clone() {
                custom.order = Some(resolve_insert_after(&anchor, existing_fieldnames, stored)?);
            }
        }

        let entry = StoredCustomField {
            seq: self.next_seq(),
            custom: custom.clone(),
        };
        guard
            .entry(custom.dt.clone())
            .or_default()
            .insert(fieldname.clone(), entry);
        drop(guard);

        event!(Level::INFO, doctype = %custom.dt, fieldname = %fieldname, "custom field created");
        self.listeners.notify(&custom.dt);
        Ok(custom)
    }

    /// Changes a stored custom field in place.
    ///
    /// The patch may not move the field to another DocType or rename it.
    pub fn update_custom_field<F>(
        &self,
        dt: &str,
        fieldname: &str,
        existing_fieldnames: &[String],
        patch: F,
    ) -> Result<CustomField>
    where
        F: FnOnce(&mut CustomField),
    {
        let mut guard = self.custom_fields.write()?;
        let records = guard.get(dt);
        let Some(current) = records.and_then(|m| m.get(fieldname)) else {
            return Err(MetaError::not_found(ObjectKind::CustomField, key(dt, fieldname)));
        };

        let mut updated = current.custom.clone();
        patch(&mut updated);
        if updated.dt != dt || updated.fieldname() != fieldname {
            return Err(MetaError::ValidationFailed(vec![ValidationIssue::error(
                IssueKind::Invalid,
                fieldname,
                "dt and fieldname of a custom field cannot change",
            )]));
        }
        check_structure(&updated.field)?;

        let mut known: HashSet<&str> = existing_fieldnames.iter().map(String::as_str).collect();
        if let Some(records) = records {
            known.extend(records.keys().map(String::as_str));
        }
        check_dependencies(&updated.field, &known)?;

        if updated.insert_after != current.custom.insert_after && updated.order == current.custom.order {
            if let Some(anchor) = updated.insert_after.clone() {
                updated.order = Some(resolve_insert_after(&anchor, existing_fieldnames, records)?);
            }
        }

        let seq = current.seq;
        if let Some(records) = guard.get_mut(dt) {
            records.insert(
                fieldname.to_string(),
                StoredCustomField {
                    seq,
                    custom: updated.clone(),
                },
            );
        }
        drop(guard);

        event!(Level::INFO, doctype = %dt, fieldname = %fieldname, "custom field updated");
        self.listeners.notify(dt);
        Ok(updated)
    }

    pub fn delete_custom_field(&self, dt: &str, fieldname: &str) -> Result<CustomField> {
        let removed = {
            let mut guard = self.custom_fields.write()?;
            let removed = guard.get_mut(dt).and_then(|m| m.remove(fieldname));
            if guard.get(dt).is_some_and(|m| m.is_empty()) {
                guard.remove(dt);
            }
            removed
        };
        let Some(removed) = removed else {
            return Err(MetaError::not_found(ObjectKind::CustomField, key(dt, fieldname)));
        };

        event!(Level::INFO, doctype = %dt, fieldname = %fieldname, "custom field deleted");
        self.listeners.notify(dt);
        Ok(removed.custom)
    }

    pub fn get_custom_field(&self, dt: &str, fieldname: &str) -> Result<CustomField> {
        self.custom_fields
            .read()?
            .get(dt)
            .and_then(|m| m.get(fieldname))
            .map(|s| s.custom.clone())
            .ok_or_else(|| MetaError::not_found(ObjectKind::CustomField, key(dt, fieldname)))
    }

    /// Custom fields of `dt` in merge order, filtered and paged by `query`.
    pub fn get_custom_fields(&self, dt: &str, query: &CustomFieldQuery) -> Result<Vec<CustomField>> {
        let ordered = self.ordered(dt)?;
        Ok(query.apply(ordered.iter().map(|s| &s.custom)))
    }

    fn ordered(&self, dt: &str) -> Result<Vec<StoredCustomField>> {
        let mut records: Vec<StoredCustomField> = self
            .custom_fields
            .read()?
            .get(dt)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| {
            a.custom
                .sort_key()
                .total_cmp(&b.custom.sort_key())
                .then(a.seq.cmp(&b.seq))
        });
        Ok(records)
    }

    /// Base fields with this DocType's custom fields spliced in.
    ///
    /// Base field `i` sorts at `i + 1`; a custom field sorts at its `order`.
    /// Ties keep base fields first, then custom fields by creation order.
    /// Custom fields already spliced into `doctype` are taken out first, so
    /// merging a merged DocType gives the same result.
    pub fn merge_custom_fields(&self, doctype: &DocType) -> Result<DocType> {
        let previously_merged: HashSet<&str> =
            doctype.custom_fields.iter().map(|c| c.fieldname()).collect();
        let base: Vec<&Field> = doctype
            .fields
            .iter()
            .filter(|f| !previously_merged.contains(f.fieldname.as_str()))
            .collect();
        let base_names: HashSet<&str> = base.iter().map(|f| f.fieldname.as_str()).collect();

        let custom: Vec<StoredCustomField> = self
            .ordered(&doctype.name)?
            .into_iter()
            .filter(|s| {
                let clash = base_names.contains(s.custom.fieldname());
                if clash {
                    event!(
                        Level::WARN,
                        doctype = %doctype.name,
                        fieldname = %s.custom.fieldname(),
                        "custom field shadowed by base field"
                    );
                }
                !clash
            })
            .collect();

        // (sort key, base first, tie breaker, field)
        let mut slots: Vec<(f64, u8, u64, Field)> = Vec::with_capacity(base.len() + custom.len());
        for (idx, field) in base.iter().enumerate() {
            slots.push(((idx + 1) as f64, 0, idx as u64, (*field).clone()));
        }
        for stored in &custom {
            slots.push((stored.custom.sort_key(), 1, stored.seq, stored.custom.field.clone()));
        }
        slots.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut merged = doctype.clone();
        merged.fields = slots.into_iter().map(|(_, _, _, field)| field).collect();
        merged.custom_fields = custom.into_iter().map(|s| s.custom).collect();
        Ok(merged)
    }
}

pub(super) fn check_structure(field: &Field) -> Result<()> {
    let issues = validate_field(field, 0);
    if has_errors(&issues) {
        return Err(MetaError::ValidationFailed(issues));
    }
    Ok(())
}

fn check_dependencies(field: &Field, known: &HashSet<&str>) -> Result<()> {
    for dependency in field.referenced_fields() {
        if dependency != field.fieldname && !known.contains(dependency.as_str()) {
            return Err(MetaError::DependencyNotFound {
                fieldname: field.fieldname.clone(),
                dependency,
            });
        }
    }
    Ok(())
}

/// Sort key placing a new field right after `anchor`.
fn resolve_insert_after(
    anchor: &str,
    existing_fieldnames: &[String],
    stored: Option<&BTreeMap<String, StoredCustomField>>,
) -> Result<f64> {
    if let Some(custom) = stored.and_then(|m| m.get(anchor)) {
        // Same key, later sequence: lands directly behind the anchor.
        return Ok(custom.custom.sort_key());
    }
    match existing_fieldnames.iter().position(|f| f == anchor) {
        Some(idx) => Ok(idx as f64 + 1.5),
        None => Err(MetaError::ValidationFailed(vec![ValidationIssue::error(
            IssueKind::Invalid,
            "insert_after",
            format!("Unknown field '{}'", anchor),
        )])),
    }
}
