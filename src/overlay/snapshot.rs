use super::{MetaOverlay, StoredCustomField};
use crate::core::{MetaError, Result};
use crate::model::PropertySetter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::{Level, event};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Every overlay record, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySnapshot {
    pub version: u32,
    pub sequence: u64,
    pub custom_fields: Vec<StoredCustomField>,
    pub property_setters: Vec<PropertySetter>,
}

impl OverlaySnapshot {
    pub fn is_empty(&self) -> bool {
        self.custom_fields.is_empty() && self.property_setters.is_empty()
    }
}

impl MetaOverlay {
    pub fn snapshot(&self) -> Result<OverlaySnapshot> {
        let mut custom_fields: Vec<StoredCustomField> = self
            .custom_fields
            .read()?
            .values()
            .flat_map(|by_name| by_name.values().cloned())
            .collect();
        custom_fields.sort_by_key(|stored| stored.seq);

        Ok(OverlaySnapshot {
            version: SNAPSHOT_VERSION,
            sequence: self.sequence.load(Ordering::SeqCst),
            custom_fields,
            property_setters: self.property_setters.read()?.values().cloned().collect(),
        })
    }

    /// Replaces every record with the snapshot's content and clears all
    /// subscribed caches.
    pub fn restore(&self, snapshot: OverlaySnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MetaError::Serialization(format!(
                "unsupported overlay snapshot version {}",
                snapshot.version
            )));
        }

        let mut custom_fields: HashMap<String, BTreeMap<String, StoredCustomField>> = HashMap::new();
        let mut next_seq = snapshot.sequence;
        for stored in snapshot.custom_fields {
            next_seq = next_seq.max(stored.seq + 1);
            custom_fields
                .entry(stored.custom.dt.clone())
                .or_default()
                .insert(stored.custom.fieldname().to_string(), stored);
        }
        let property_setters = snapshot
            .property_setters
            .into_iter()
            .map(|setter| {
                let key = (
                    setter.doctype.clone(),
                    setter.fieldname.clone().unwrap_or_default(),
                    setter.property.clone(),
                );
                (key, setter)
            })
            .collect();

        *self.custom_fields.write()? = custom_fields;
        *self.property_setters.write()? = property_setters;
        self.sequence.store(next_seq, Ordering::SeqCst);
        self.listeners.notify_all();
        Ok(())
    }

    /// Writes every record to `path` as MessagePack, through a temporary
    /// file that is renamed into place once synced.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let bytes = rmp_serde::to_vec_named(&snapshot)
            .map_err(|e| MetaError::Serialization(format!("Failed to encode overlay snapshot: {}", e)))?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp_path, path)?;

        event!(
            Level::INFO,
            path = %path.display(),
            custom_fields = snapshot.custom_fields.len(),
            property_setters = snapshot.property_setters.len(),
            "overlay snapshot saved"
        );
        Ok(())
    }

    /// Loads a snapshot written by [`save_snapshot`](Self::save_snapshot).
    /// Returns `false` and leaves the overlay untouched when `path` does not
    /// exist.
    pub fn load_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        let snapshot: OverlaySnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| MetaError::Serialization(format!("Failed to decode overlay snapshot: {}", e)))?;

        event!(
            Level::INFO,
            path = %path.display(),
            custom_fields = snapshot.custom_fields.len(),
            property_setters = snapshot.property_setters.len(),
            "overlay snapshot loaded"
        );
        self.restore(snapshot)?;
        Ok(true)
    }
}
