//! In-memory search index for tests and local dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use reindex_types::{DocumentId, IndexDocument};

use crate::error::SearchError;
use crate::service::{BrowseFilter, BrowsePage, QueryRule, SearchIndex};

/// A recorded write against the index, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexCall {
    Save { index: String, ids: Vec<DocumentId> },
    PartialUpdate { index: String, ids: Vec<DocumentId> },
    Delete { index: String, ids: Vec<DocumentId> },
}

#[derive(Default)]
struct State {
    documents: BTreeMap<String, BTreeMap<DocumentId, IndexDocument>>,
    settings: BTreeMap<String, serde_json::Value>,
    rules: BTreeMap<String, BTreeMap<String, QueryRule>>,
    calls: Vec<IndexCall>,
    failing_ids: HashSet<DocumentId>,
}

/// Search index kept in process memory.
///
/// Browse pages are cut at `page_size` and the cursor is the offset of the
/// next page. Filters of the form `field:value` are honoured; anything else
/// matches every document.
pub struct InMemorySearchIndex {
    state: Mutex<State>,
    page_size: usize,
}

impl InMemorySearchIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 1000,
        }
    }

    /// Create with a custom browse page size.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed documents without recording a call.
    pub fn insert(&self, index: &str, docs: impl IntoIterator<Item = IndexDocument>) {
        let mut state = self.lock();
        let target = state.documents.entry(index.to_string()).or_default();
        for doc in docs {
            target.insert(doc.object_id.clone(), doc);
        }
    }

    /// Seed settings for an index.
    pub fn put_settings(&self, index: &str, settings: serde_json::Value) {
        self.lock().settings.insert(index.to_string(), settings);
    }

    /// Any write call that touches `id` fails until cleared.
    pub fn fail_calls_containing(&self, id: impl Into<DocumentId>) {
        self.lock().failing_ids.insert(id.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failing_ids.clear();
    }

    /// Ids currently stored in an index, sorted.
    pub fn ids(&self, index: &str) -> Vec<DocumentId> {
        self.lock()
            .documents
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, index: &str, id: &DocumentId) -> Option<IndexDocument> {
        self.lock()
            .documents
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn len(&self, index: &str) -> usize {
        self.lock().documents.get(index).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    /// Write calls recorded so far.
    pub fn calls(&self) -> Vec<IndexCall> {
        self.lock().calls.clone()
    }

    pub fn rules(&self, index: &str) -> Vec<QueryRule> {
        self.lock()
            .rules
            .get(index)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_failure(state: &State, ids: &[DocumentId]) -> Result<(), SearchError> {
        if let Some(id) = ids.iter().find(|id| state.failing_ids.contains(*id)) {
            return Err(SearchError::Http(format!("injected failure for {}", id)));
        }
        Ok(())
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a `field:value` filter against a document.
fn matches_filter(doc: &IndexDocument, filter: &BrowseFilter) -> bool {
    let Some(expr) = filter.filters.as_deref() else {
        return true;
    };
    let Some((field, expected)) = expr.split_once(':') else {
        return true;
    };
    let expected = expected.trim().trim_matches('"');
    match doc.fields.get(field.trim()) {
        Some(reindex_types::FieldValue::Text(s)) => s == expected,
        Some(reindex_types::FieldValue::List(items)) => items.iter().any(|s| s == expected),
        Some(reindex_types::FieldValue::Number(n)) => n.to_string() == expected,
        Some(reindex_types::FieldValue::Bool(b)) => b.to_string() == expected,
        _ => false,
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn browse_page(
        &self,
        index: &str,
        filter: &BrowseFilter,
        cursor: Option<String>,
    ) -> Result<BrowsePage, SearchError> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|e| SearchError::Parse(format!("invalid cursor {}: {}", c, e)))?,
            None => 0,
        };

        let state = self.lock();
        let matching: Vec<&IndexDocument> = state
            .documents
            .get(index)
            .map(|docs| docs.values().filter(|d| matches_filter(d, filter)).collect())
            .unwrap_or_default();

        let hits: Vec<IndexDocument> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|doc| match &filter.attributes {
                Some(attrs) => doc.project(attrs.iter().map(String::as_str)),
                None => (*doc).clone(),
            })
            .collect();

        let next = offset + hits.len();
        let cursor = (next < matching.len()).then(|| next.to_string());
        Ok(BrowsePage { hits, cursor })
    }

    async fn get_documents(
        &self,
        index: &str,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<IndexDocument>>, SearchError> {
        let state = self.lock();
        let docs = state.documents.get(index);
        Ok(ids
            .iter()
            .map(|id| docs.and_then(|d| d.get(id)).cloned())
            .collect())
    }

    async fn save_documents(
        &self,
        index: &str,
        docs: &[IndexDocument],
    ) -> Result<(), SearchError> {
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.object_id.clone()).collect();
        let mut state = self.lock();
        Self::check_failure(&state, &ids)?;
        let target = state.documents.entry(index.to_string()).or_default();
        for doc in docs {
            target.insert(doc.object_id.clone(), doc.clone());
        }
        state.calls.push(IndexCall::Save {
            index: index.to_string(),
            ids,
        });
        Ok(())
    }

    async fn partial_update_documents(
        &self,
        index: &str,
        docs: &[IndexDocument],
    ) -> Result<(), SearchError> {
        let ids: Vec<DocumentId> = docs.iter().map(|d| d.object_id.clone()).collect();
        let mut state = self.lock();
        Self::check_failure(&state, &ids)?;
        if let Some(target) = state.documents.get_mut(index) {
            for doc in docs {
                if let Some(existing) = target.get_mut(&doc.object_id) {
                    for (name, value) in &doc.fields {
                        existing.fields.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        state.calls.push(IndexCall::PartialUpdate {
            index: index.to_string(),
            ids,
        });
        Ok(())
    }

    async fn delete_documents(&self, index: &str, ids: &[DocumentId]) -> Result<(), SearchError> {
        let mut state = self.lock();
        Self::check_failure(&state, ids)?;
        if let Some(target) = state.documents.get_mut(index) {
            for id in ids {
                target.remove(id);
            }
        }
        state.calls.push(IndexCall::Delete {
            index: index.to_string(),
            ids: ids.to_vec(),
        });
        Ok(())
    }

    async fn get_settings(&self, index: &str) -> Result<serde_json::Value, SearchError> {
        self.lock()
            .settings
            .get(index)
            .cloned()
            .ok_or_else(|| SearchError::Api {
                status: 404,
                message: format!("Index {} does not exist", index),
            })
    }

    async fn save_settings(
        &self,
        index: &str,
        settings: &serde_json::Value,
    ) -> Result<(), SearchError> {
        self.put_settings(index, settings.clone());
        Ok(())
    }

    async fn browse_rules(&self, index: &str) -> Result<Vec<QueryRule>, SearchError> {
        Ok(self.rules(index))
    }

    async fn save_rules(&self, index: &str, rules: &[QueryRule]) -> Result<(), SearchError> {
        let mut state = self.lock();
        let target = state.rules.entry(index.to_string()).or_default();
        for rule in rules {
            target.insert(rule.object_id.clone(), rule.clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
