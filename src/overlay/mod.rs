//! Site-level customizations layered over base DocTypes.
//!
//! Custom fields and property setters are stored here, keyed by DocType
//! name, and never written into the registry's definitions. The effective
//! DocType is `apply_properties(merge_custom_fields(base))`.

mod custom_field;
mod property;
pub mod query;
pub mod snapshot;

pub use query::CustomFieldQuery;
pub use snapshot::OverlaySnapshot;

use crate::core::{InvalidationListener, Listeners, Result};
use crate::model::{CustomField, DocType, PropertySetter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, Weak};

/// A custom field plus its insertion sequence, used to break order ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCustomField {
    pub seq: u64,
    pub custom: CustomField,
}

/// `(doctype, fieldname or "", property)`
pub(crate) type SetterKey = (String, String, String);

pub struct MetaOverlay {
    custom_fields: RwLock<HashMap<String, BTreeMap<String, StoredCustomField>>>,
    property_setters: RwLock<BTreeMap<SetterKey, PropertySetter>>,
    sequence: AtomicU64,
    listeners: Listeners,
}

impl MetaOverlay {
    pub fn new() -> Self {
        Self {
            custom_fields: RwLock::new(HashMap::new()),
            property_setters: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
            listeners: Listeners::new(),
        }
    }

    pub fn subscribe(&self, listener: Weak<dyn InvalidationListener>) {
        self.listeners.subscribe(listener);
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Effective DocType: custom fields spliced in, then setters applied.
    pub fn effective(&self, base: &DocType) -> Result<DocType> {
        let merged = self.merge_custom_fields(base)?;
        self.apply_properties(&merged)
    }

    /// Number of custom fields and property setters held for `doctype`.
    pub fn counts(&self, doctype: &str) -> Result<(usize, usize)> {
        let fields = self
            .custom_fields
            .read()?
            .get(doctype)
            .map(BTreeMap::len)
            .unwrap_or(0);
        let setters = self
            .property_setters
            .read()?
            .keys()
            .filter(|(dt, _, _)| dt == doctype)
            .count();
        Ok((fields, setters))
    }

    /// Drops every record; subscribers are told to clear everything.
    pub fn clear(&self) -> Result<()> {
        self.custom_fields.write()?.clear();
        self.property_setters.write()?.clear();
        self.listeners.notify_all();
        Ok(())
    }
}

impl Default for MetaOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetaOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaOverlay")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("listeners", &self.listeners)
            .finish()
    }
}
