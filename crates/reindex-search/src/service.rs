//! Search index service port.
//!
//! The index is a set of named indexes (one per locale) holding flat
//! documents keyed by `objectID`, plus per-index settings and query rules.
//! Writes are last-write-wins per identifier with no transactions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reindex_types::{DocumentId, IndexDocument};

use crate::error::SearchError;

/// Optional restrictions for a browse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowseFilter {
    /// Filter expression understood by the service (e.g. `type:widget`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,

    /// Attributes to retrieve; `None` retrieves everything
    #[serde(
        default,
        rename = "attributesToRetrieve",
        skip_serializing_if = "Option::is_none"
    )]
    pub attributes: Option<Vec<String>>,
}

impl BrowseFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_filters(mut self, filters: impl Into<String>) -> Self {
        self.filters = Some(filters.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// One page of browse results.
#[derive(Debug, Clone, Default)]
pub struct BrowsePage {
    pub hits: Vec<IndexDocument>,
    /// Cursor for the next page; `None` when the browse is exhausted
    pub cursor: Option<String>,
}

/// A query-rule record. Rules may embed document identifiers (pinned or
/// hidden hits), so they are rewritten when the identifier format changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRule {
    #[serde(rename = "objectID")]
    pub object_id: String,

    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Operations the pipeline needs from the search index service.
///
/// Every call is a blocking network round trip from the pipeline's point of
/// view; timeouts belong to the implementation.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Fetch one page of documents. Passing `None` starts a fresh browse.
    async fn browse_page(
        &self,
        index: &str,
        filter: &BrowseFilter,
        cursor: Option<String>,
    ) -> Result<BrowsePage, SearchError>;

    /// Fetch documents by id, `None` for ids that do not exist.
    async fn get_documents(
        &self,
        index: &str,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<IndexDocument>>, SearchError>;

    /// Create or replace whole documents.
    async fn save_documents(&self, index: &str, docs: &[IndexDocument])
        -> Result<(), SearchError>;

    /// Merge the given fields into existing documents. Documents that do not
    /// exist are not created.
    async fn partial_update_documents(
        &self,
        index: &str,
        docs: &[IndexDocument],
    ) -> Result<(), SearchError>;

    /// Delete documents. Ids that do not exist are ignored.
    async fn delete_documents(&self, index: &str, ids: &[DocumentId]) -> Result<(), SearchError>;

    async fn get_settings(&self, index: &str) -> Result<serde_json::Value, SearchError>;

    async fn save_settings(
        &self,
        index: &str,
        settings: &serde_json::Value,
    ) -> Result<(), SearchError>;

    async fn browse_rules(&self, index: &str) -> Result<Vec<QueryRule>, SearchError>;

    async fn save_rules(&self, index: &str, rules: &[QueryRule]) -> Result<(), SearchError>;

    /// Name of this backend for logging.
    fn name(&self) -> &str;
}

/// Browse an index to the end and collect every document.
///
/// Each call restarts the browse from the beginning.
pub async fn browse_all<S: SearchIndex + ?Sized>(
    service: &S,
    index: &str,
    filter: &BrowseFilter,
) -> Result<Vec<IndexDocument>, SearchError> {
    let mut documents = Vec::new();
    let mut cursor = None;

    loop {
        let page = service.browse_page(index, filter, cursor).await?;
        documents.extend(page.hits);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    tracing::debug!(index = %index, count = documents.len(), "Browse complete");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browse_filter_serialization() {
        let filter = BrowseFilter::all()
            .with_filters("type:widget")
            .with_attributes(vec!["objectID".into(), "title".into()]);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["filters"], "type:widget");
        assert_eq!(json["attributesToRetrieve"][1], "title");

        let empty = serde_json::to_value(BrowseFilter::all()).unwrap();
        assert_eq!(empty, serde_json::json!({}));
    }

    #[test]
    fn test_query_rule_keeps_unknown_fields() {
        let json = serde_json::json!({
            "objectID": "pin-adapters",
            "conditions": [{"pattern": "adapter", "anchoring": "contains"}],
            "consequence": {"promote": [{"objectID": "entity:node/42:en", "position": 0}]}
        });
        let rule: QueryRule = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(rule.object_id, "pin-adapters");
        assert_eq!(serde_json::to_value(&rule).unwrap(), json);
    }
}
