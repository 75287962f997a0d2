//! Content repository port.
//!
//! The repository owns logical items; the pipeline only reads them. A
//! [`CachedRepository`] keeps items loaded during a run so partial updates and
//! escalations do not reload them, and must be cleared after each batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use reindex_types::{ItemId, LogicalItem, ReindexError};

/// Read access to source-of-truth content.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Load items by id. Unknown ids are left out of the result.
    async fn load_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<LogicalItem>, ReindexError>;

    /// Load one page of items of a bundle, in a stable order.
    async fn load_items_by_type(
        &self,
        bundle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LogicalItem>, ReindexError>;

    /// Bundles known to the repository.
    async fn bundles(&self) -> Result<Vec<String>, ReindexError>;

    /// Whether a locale variant of an item may appear in the index.
    fn is_searchable(&self, item: &LogicalItem, locale: &str) -> bool {
        item.searchable && item.translations.contains_key(locale)
    }

    fn get_translations(&self, item: &LogicalItem) -> BTreeSet<String> {
        item.locales().map(str::to_string).collect()
    }

    /// Fields of a bundle that may be partially updated.
    fn partial_indexable_fields(&self, bundle: &str) -> BTreeSet<String>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentFile {
    Items(Vec<LogicalItem>),
    Export {
        items: Vec<LogicalItem>,
        #[serde(default)]
        partial_fields: BTreeMap<String, Vec<String>>,
    },
}

/// Repository held in memory, optionally loaded from a JSON export.
///
/// The export is either an array of items or an object with `items` and
/// `partial_fields`.
#[derive(Debug, Default)]
pub struct InMemoryContentRepository {
    items: Vec<LogicalItem>,
    partial_fields: BTreeMap<String, BTreeSet<String>>,
}

impl InMemoryContentRepository {
    pub fn new(items: Vec<LogicalItem>) -> Self {
        Self {
            items,
            partial_fields: BTreeMap::new(),
        }
    }

    /// Allow-list partially updatable fields per bundle.
    pub fn with_partial_fields(mut self, fields: &BTreeMap<String, Vec<String>>) -> Self {
        for (bundle, names) in fields {
            self.partial_fields
                .entry(bundle.clone())
                .or_default()
                .extend(names.iter().cloned());
        }
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ReindexError> {
        let raw = std::fs::read_to_string(path)?;
        let file: ContentFile = serde_json::from_str(&raw)?;
        let repo = match file {
            ContentFile::Items(items) => Self::new(items),
            ContentFile::Export {
                items,
                partial_fields,
            } => Self::new(items).with_partial_fields(&partial_fields),
        };
        info!(path = %path.display(), items = repo.items.len(), "Loaded content export");
        Ok(repo)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    async fn load_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<LogicalItem>, ReindexError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.items.iter().find(|item| &item.id == id))
            .cloned()
            .collect())
    }

    async fn load_items_by_type(
        &self,
        bundle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LogicalItem>, ReindexError> {
        Ok(self
            .items
            .iter()
            .filter(|item| item.bundle == bundle)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn bundles(&self) -> Result<Vec<String>, ReindexError> {
        let bundles: BTreeSet<&str> = self.items.iter().map(|i| i.bundle.as_str()).collect();
        Ok(bundles.into_iter().map(str::to_string).collect())
    }

    fn partial_indexable_fields(&self, bundle: &str) -> BTreeSet<String> {
        self.partial_fields.get(bundle).cloned().unwrap_or_default()
    }
}

/// Per-run item cache in front of a repository.
pub struct CachedRepository {
    inner: Arc<dyn ContentRepository>,
    cache: Mutex<HashMap<ItemId, LogicalItem>>,
}

impl CachedRepository {
    pub fn new(inner: Arc<dyn ContentRepository>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, LogicalItem>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, items: &[LogicalItem]) {
        let mut cache = self.lock();
        for item in items {
            cache.insert(item.id.clone(), item.clone());
        }
    }

    /// Drop every cached item.
    pub fn clear(&self) {
        let mut cache = self.lock();
        debug!(cached = cache.len(), "Clearing item cache");
        cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl ContentRepository for CachedRepository {
    async fn load_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<LogicalItem>, ReindexError> {
        let (mut found, missing): (Vec<Option<LogicalItem>>, Vec<ItemId>) = {
            let cache = self.lock();
            let found = ids.iter().map(|id| cache.get(id).cloned()).collect();
            let missing = ids
                .iter()
                .filter(|id| !cache.contains_key(*id))
                .cloned()
                .collect();
            (found, missing)
        };

        if !missing.is_empty() {
            let loaded = self.inner.load_items_by_ids(&missing).await?;
            self.remember(&loaded);
            let loaded: HashMap<&ItemId, &LogicalItem> =
                loaded.iter().map(|item| (&item.id, item)).collect();
            for (slot, id) in found.iter_mut().zip(ids) {
                if slot.is_none() {
                    *slot = loaded.get(id).map(|item| (*item).clone());
                }
            }
        }

        Ok(found.into_iter().flatten().collect())
    }

    async fn load_items_by_type(
        &self,
        bundle: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LogicalItem>, ReindexError> {
        let items = self.inner.load_items_by_type(bundle, limit, offset).await?;
        self.remember(&items);
        Ok(items)
    }

    async fn bundles(&self) -> Result<Vec<String>, ReindexError> {
        self.inner.bundles().await
    }

    fn is_searchable(&self, item: &LogicalItem, locale: &str) -> bool {
        self.inner.is_searchable(item, locale)
    }

    fn get_translations(&self, item: &LogicalItem) -> BTreeSet<String> {
        self.inner.get_translations(item)
    }

    fn partial_indexable_fields(&self, bundle: &str) -> BTreeSet<String> {
        self.inner.partial_indexable_fields(bundle)
    }
}
