//! Read-only audit of index content against the repository.
//!
//! Both sides are reduced to one entry per logical id, then compared by id.
//! Nothing is written to either side.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use reindex_search::{browse_all, BrowseFilter, SearchIndex};
use reindex_types::{FieldValue, IndexDocument, ItemId, ReindexError};

use crate::codec::IdentifierCodec;
use crate::context::SyncContext;
use crate::source::ContentRepository;
use crate::split::{LOGICAL_ID_FIELD, TITLE_FIELD, TYPE_FIELD};

/// One logical item as seen by the diff.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DiffEntry {
    pub logical_id: ItemId,
    pub bundle: String,
    pub title: Option<String>,
}

impl DiffEntry {
    pub fn new(logical_id: ItemId, bundle: impl Into<String>, title: Option<String>) -> Self {
        Self {
            logical_id,
            bundle: bundle.into(),
            title,
        }
    }
}

/// Items present on one side only, sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    /// Searchable in the source, absent from the index
    pub missing_from_index: Vec<DiffEntry>,
    /// In the index, absent from the searchable source
    pub missing_from_source: Vec<DiffEntry>,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.missing_from_index.is_empty() && self.missing_from_source.is_empty()
    }
}

/// Set difference by logical id.
pub fn diff<I, S>(index_entries: I, source_entries: S) -> DiffReport
where
    I: IntoIterator<Item = DiffEntry>,
    S: IntoIterator<Item = DiffEntry>,
{
    let index: BTreeMap<ItemId, DiffEntry> = index_entries
        .into_iter()
        .map(|e| (e.logical_id.clone(), e))
        .collect();
    let source: BTreeMap<ItemId, DiffEntry> = source_entries
        .into_iter()
        .map(|e| (e.logical_id.clone(), e))
        .collect();

    DiffReport {
        missing_from_index: source
            .iter()
            .filter(|(id, _)| !index.contains_key(*id))
            .map(|(_, e)| e.clone())
            .collect(),
        missing_from_source: index
            .iter()
            .filter(|(id, _)| !source.contains_key(*id))
            .map(|(_, e)| e.clone())
            .collect(),
    }
}

fn text_field(doc: &IndexDocument, name: &str) -> Option<String> {
    doc.fields
        .get(name)
        .and_then(FieldValue::as_text)
        .map(str::to_string)
}

/// Reduce browsed documents to one entry per logical id.
///
/// The id comes from the decoded `objectID`, or the `logical_id` field for
/// documents whose identifier does not decode. Documents with neither are
/// skipped.
pub fn index_entries(codec: &IdentifierCodec, documents: &[IndexDocument]) -> Vec<DiffEntry> {
    let mut entries: BTreeMap<ItemId, DiffEntry> = BTreeMap::new();
    for doc in documents {
        let logical_id = match codec.decode(doc.object_id.as_str()) {
            Ok((_, key)) => Some(key.item_id),
            Err(_) => text_field(doc, LOGICAL_ID_FIELD).and_then(|id| ItemId::parse(&id).ok()),
        };
        let Some(logical_id) = logical_id else {
            warn!(object_id = %doc.object_id, "Skipping document with unknown identifier");
            continue;
        };

        let bundle = text_field(doc, TYPE_FIELD).unwrap_or_default();
        let title = text_field(doc, TITLE_FIELD);
        let entry = entries
            .entry(logical_id.clone())
            .or_insert_with(|| DiffEntry::new(logical_id, bundle, None));
        if entry.title.is_none() {
            entry.title = title;
        }
    }
    entries.into_values().collect()
}

/// Runs diffs for a set of bundles and one locale.
pub struct DiffReporter<'a> {
    ctx: &'a SyncContext,
    page_size: usize,
}

impl<'a> DiffReporter<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            page_size: ctx.executor().chunk_size(),
        }
    }

    /// Compare `bundles` in one locale.
    ///
    /// `index_name` overrides the physical index derived from the locale.
    pub async fn run(
        &self,
        bundles: &[String],
        locale: &str,
        index_name: Option<&str>,
    ) -> Result<DiffReport, ReindexError> {
        let index_name = index_name
            .map(str::to_string)
            .unwrap_or_else(|| self.ctx.naming().physical(locale));

        let from_index = self.collect_index(&index_name, bundles).await?;
        let from_source = self.collect_source(bundles, locale).await?;
        self.ctx.clear_cache();

        let report = diff(from_index, from_source);
        info!(
            index = %index_name,
            missing_from_index = report.missing_from_index.len(),
            missing_from_source = report.missing_from_source.len(),
            "Diff complete"
        );
        Ok(report)
    }

    async fn collect_index(
        &self,
        index_name: &str,
        bundles: &[String],
    ) -> Result<Vec<DiffEntry>, ReindexError> {
        let attributes: Vec<String> = ["objectID", LOGICAL_ID_FIELD, TYPE_FIELD, TITLE_FIELD]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let index: &dyn SearchIndex = self.ctx.index();

        let mut documents = Vec::new();
        for bundle in bundles {
            let filter = BrowseFilter::all()
                .with_filters(bundle_filter(bundle))
                .with_attributes(attributes.clone());
            documents.extend(browse_all(index, index_name, &filter).await?);
        }
        debug!(index = %index_name, documents = documents.len(), "Browsed index for diff");
        Ok(index_entries(self.ctx.codec(), &documents))
    }

    async fn collect_source(
        &self,
        bundles: &[String],
        locale: &str,
    ) -> Result<Vec<DiffEntry>, ReindexError> {
        let repository = self.ctx.repository();
        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();

        for bundle in bundles {
            let mut offset = 0;
            loop {
                let page = repository
                    .load_items_by_type(bundle, self.page_size, offset)
                    .await?;
                if page.is_empty() {
                    break;
                }
                offset += page.len();
                for item in &page {
                    if repository.is_searchable(item, locale) && seen.insert(item.id.clone()) {
                        entries.push(DiffEntry::new(
                            item.id.clone(),
                            item.bundle.as_str(),
                            item.title(locale).map(str::to_string),
                        ));
                    }
                }
                self.ctx.clear_cache();
            }
        }
        Ok(entries)
    }
}

/// Browse filter for one bundle. The value is quoted so bundle names with
/// spaces or reserved words stay a single term.
fn bundle_filter(bundle: &str) -> String {
    format!("{}:\"{}\"", TYPE_FIELD, bundle.replace('"', "\\\""))
}
