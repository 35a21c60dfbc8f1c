//! Cached effective metadata.
//!
//! [`MetaFactory`] answers "what does DocType X look like right now" by
//! combining the registry's base definition with the overlay and wrapping the
//! result in a [`MergedMeta`]. Finished results are kept in a bounded LRU
//! cache. A build in progress lives in a once-cell outside the LRU, so
//! concurrent misses for the same DocType wait on a single build and all
//! receive the same `Arc`, and eviction never drops a build midway.

pub mod merged;

pub use merged::MergedMeta;

use crate::core::{InvalidationListener, MetaError, Result};
use crate::overlay::MetaOverlay;
use crate::registry::DocTypeRegistry;
use futures::future::join_all;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::OnceCell;
use tracing::{Level, event};

type Slot = Arc<OnceCell<Arc<MergedMeta>>>;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Outcome of [`MetaFactory::preload_metas`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
}

struct Slots {
    ready: LruCache<String, Arc<MergedMeta>>,
    building: HashMap<String, Slot>,
}

pub struct MetaFactory {
    registry: Arc<DocTypeRegistry>,
    overlay: Arc<MetaOverlay>,
    slots: Mutex<Slots>,
}

impl MetaFactory {
    /// Builds a factory and subscribes it to both sources of change.
    ///
    /// `capacity` bounds finished entries only; builds in flight are not
    /// counted against it and cannot be evicted.
    pub fn new(registry: Arc<DocTypeRegistry>, overlay: Arc<MetaOverlay>, capacity: usize) -> Arc<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        let factory = Arc::new(Self {
            registry: Arc::clone(&registry),
            overlay: Arc::clone(&overlay),
            slots: Mutex::new(Slots {
                ready: LruCache::new(capacity),
                building: HashMap::new(),
            }),
        });

        let listener: Weak<dyn InvalidationListener> =
            Arc::downgrade(&factory) as Weak<dyn InvalidationListener>;
        registry.subscribe(listener.clone());
        overlay.subscribe(listener);
        factory
    }

    pub fn registry(&self) -> &Arc<DocTypeRegistry> {
        &self.registry
    }

    pub fn overlay(&self) -> &Arc<MetaOverlay> {
        &self.overlay
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Effective metadata of `doctype`.
    ///
    /// Repeated calls return the same `Arc` until the DocType or its overlay
    /// changes. A failed build is not cached.
    pub async fn get_meta(&self, doctype: &str) -> Result<Arc<MergedMeta>> {
        let slot = {
            let mut slots = self.slots();
            if let Some(meta) = slots.ready.get(doctype) {
                return Ok(Arc::clone(meta));
            }
            Arc::clone(
                slots
                    .building
                    .entry(doctype.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = slot
            .get_or_try_init(|| async { self.build(doctype) })
            .await
            .map(Arc::clone);

        // only the slot still registered is promoted; an invalidation during
        // the build has already dropped it
        let mut slots = self.slots();
        if slots.building.get(doctype).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.building.remove(doctype);
            if let Ok(meta) = &result {
                slots.ready.put(doctype.to_string(), Arc::clone(meta));
            }
        }
        result
    }

    fn build(&self, doctype: &str) -> Result<Arc<MergedMeta>> {
        let base = self.registry.get(doctype)?;
        let effective = self.overlay.effective(&base)?;
        let meta = MergedMeta::new(effective);
        event!(
            Level::DEBUG,
            doctype = %doctype,
            fields = meta.fields().len(),
            custom_fields = meta.custom_fields().len(),
            "effective meta built"
        );
        Ok(Arc::new(meta))
    }

    /// Drops the cached entry and builds a fresh one.
    pub async fn reload_meta(&self, doctype: &str) -> Result<Arc<MergedMeta>> {
        self.invalidate_meta(doctype);
        self.get_meta(doctype).await
    }

    pub fn invalidate_meta(&self, doctype: &str) {
        let mut slots = self.slots();
        let building = slots.building.remove(doctype).is_some();
        if slots.ready.pop(doctype).is_some() || building {
            event!(Level::DEBUG, doctype = %doctype, "meta cache entry invalidated");
        }
    }

    pub fn clear_cache(&self) {
        let mut slots = self.slots();
        let dropped = slots.ready.len() + slots.building.len();
        slots.ready.clear();
        slots.building.clear();
        event!(Level::DEBUG, dropped, "meta cache cleared");
    }

    /// Warms the cache for `doctypes` concurrently. Unregistered names are
    /// reported rather than failing the batch.
    pub async fn preload_metas<S: AsRef<str>>(&self, doctypes: &[S]) -> Result<PreloadReport> {
        let results = join_all(doctypes.iter().map(|name| self.get_meta(name.as_ref()))).await;

        let mut report = PreloadReport::default();
        for (name, result) in doctypes.iter().zip(results) {
            match result {
                Ok(_) => report.loaded.push(name.as_ref().to_string()),
                Err(MetaError::NotFound { .. }) => report.missing.push(name.as_ref().to_string()),
                Err(err) => return Err(err),
            }
        }
        event!(
            Level::INFO,
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            "meta preload finished"
        );
        Ok(report)
    }

    /// Number of entries currently cached, including builds in flight.
    pub fn cached_count(&self) -> usize {
        let slots = self.slots();
        slots.ready.len() + slots.building.len()
    }

    pub fn is_cached(&self, doctype: &str) -> bool {
        self.slots().ready.contains(doctype)
    }
}

impl InvalidationListener for MetaFactory {
    fn invalidate(&self, doctype: &str) {
        self.invalidate_meta(doctype);
    }

    fn invalidate_all(&self) {
        self.clear_cache();
    }
}

impl std::fmt::Debug for MetaFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaFactory")
            .field("cached", &self.cached_count())
            .field("capacity", &self.slots().ready.cap())
            .finish()
    }
}
