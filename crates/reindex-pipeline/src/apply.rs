//! Application of a [`ReindexPlan`] against the index.
//!
//! Each locale is its own physical index. Planned items are chunked; for each
//! chunk every stale identifier is deleted first and the fresh documents are
//! saved afterwards. A failed delete skips the save for that chunk.

use std::collections::BTreeSet;

use tracing::{info, warn};

use reindex_types::{DocumentId, IndexDocument, ItemId, ReindexError};

use crate::context::SyncContext;
use crate::executor::ProgressCallback;
use crate::planner::{PlannedItem, ReindexPlan};

/// Result of applying a plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Items whose chunk succeeded, per locale
    pub applied: usize,
    /// Identifiers sent in successful delete calls
    pub deleted: usize,
    /// Documents sent in successful save calls
    pub saved: usize,
    /// Chunks run across all locales
    pub chunk_calls: usize,
    /// Items with at least one failed chunk
    pub failed_items: BTreeSet<ItemId>,
    /// One message per failed chunk
    pub errors: Vec<String>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed_items.is_empty()
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.deleted += other.deleted;
        self.saved += other.saved;
        self.chunk_calls += other.chunk_calls;
        self.failed_items.extend(other.failed_items);
        self.errors.extend(other.errors);
    }
}

/// Writes plans to the index through the chunked executor.
pub struct PlanApplier<'a> {
    ctx: &'a SyncContext,
}

impl<'a> PlanApplier<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Apply every locale of the plan.
    ///
    /// Chunk failures are recorded and do not stop the remaining chunks or
    /// locales.
    pub async fn apply<P>(&self, plan: &ReindexPlan, progress: &P) -> ApplyReport
    where
        P: ProgressCallback + ?Sized,
    {
        let mut report = ApplyReport::default();
        for locale in plan.locales() {
            let index_name = self.ctx.naming().physical(locale);
            let locale_report = self
                .apply_locale(&index_name, plan.entries(locale), progress)
                .await;
            report.merge(locale_report);
        }

        info!(
            applied = report.applied,
            deleted = report.deleted,
            saved = report.saved,
            failed = report.failed_items.len(),
            "Plan applied"
        );
        report
    }

    async fn apply_locale<P>(
        &self,
        index_name: &str,
        entries: &[PlannedItem],
        progress: &P,
    ) -> ApplyReport
    where
        P: ProgressCallback + ?Sized,
    {
        let index = self.ctx.index();
        let mut report = ApplyReport::default();

        let run = self
            .ctx
            .executor()
            .run(
                entries.to_vec(),
                |chunk: Vec<PlannedItem>| async move {
                    let ids: Vec<DocumentId> = chunk
                        .iter()
                        .flat_map(|e| e.deletions.iter().cloned())
                        .collect();
                    let docs: Vec<IndexDocument> =
                        chunk.into_iter().flat_map(|e| e.upserts).collect();

                    if !ids.is_empty() {
                        index
                            .delete_documents(index_name, &ids)
                            .await
                            .map_err(ReindexError::from)?;
                    }
                    if !docs.is_empty() {
                        index
                            .save_documents(index_name, &docs)
                            .await
                            .map_err(ReindexError::from)?;
                    }
                    Ok::<(), ReindexError>(())
                },
                progress,
            )
            .await;

        report.chunk_calls = run.chunk_calls();
        report.failed_items = run.failed_items.iter().map(|e| e.item_id.clone()).collect();

        let failed: BTreeSet<&ItemId> = run.failed_items.iter().map(|e| &e.item_id).collect();
        for entry in entries.iter().filter(|e| !failed.contains(&e.item_id)) {
            report.applied += 1;
            report.deleted += entry.deletions.len();
            report.saved += entry.upserts.len();
        }

        for chunk in run.failed_chunks() {
            let message = format!(
                "{}: chunk {} ({} items): {}",
                index_name,
                chunk.index,
                chunk.len,
                chunk.error.as_deref().unwrap_or("unknown error")
            );
            warn!(index = %index_name, chunk = chunk.index, "Chunk not applied");
            report.errors.push(message);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reindex_search::{IndexCall, InMemorySearchIndex, SearchIndex};
    use reindex_types::{FieldMap, LogicalItem, Slot};

    use crate::codec::IdentifierCodec;
    use crate::context::IndexNaming;
    use crate::executor::{ChunkedBatchExecutor, NoOpProgressCallback};
    use crate::planner::ReindexPlanner;
    use crate::source::{ContentRepository, InMemoryContentRepository};
    use crate::split::SplitStrategy;

    fn context(index: Arc<InMemorySearchIndex>, chunk_size: usize) -> SyncContext {
        let repo: Arc<dyn ContentRepository> = Arc::new(InMemoryContentRepository::default());
        SyncContext::new(
            index as Arc<dyn SearchIndex>,
            repo,
            SplitStrategy::new(IdentifierCodec::new("node", 6), 10_000, "body", None),
            ChunkedBatchExecutor::new(chunk_size).unwrap(),
            IndexNaming::new("products"),
        )
    }

    fn widget(id: &str) -> LogicalItem {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), format!("Widget {}", id).into());
        LogicalItem::new(ItemId::parse(id).unwrap(), "widget").with_translation("en", fields)
    }

    #[tokio::test]
    async fn test_stale_slots_removed_and_fresh_saved() {
        let index = Arc::new(InMemorySearchIndex::new());
        let ctx = context(index.clone(), 50);
        let codec = ctx.codec().clone();
        let id = ItemId::parse("42").unwrap();

        let stale_part = codec.encode(&id, "en", Slot::Part(3)).unwrap();
        let legacy = codec.legacy_encode(&id, "en", Slot::Main).unwrap();
        index.insert(
            "products_en",
            [
                IndexDocument::new(stale_part.clone(), FieldMap::new()),
                IndexDocument::new(legacy.clone(), FieldMap::new()),
            ],
        );

        let plan = ReindexPlanner::from_context(&ctx)
            .plan_for(&[widget("42")])
            .unwrap();
        let report = PlanApplier::new(&ctx)
            .apply(&plan, &NoOpProgressCallback)
            .await;

        assert!(report.is_success());
        assert_eq!(report.deleted, 14);
        assert_eq!(report.saved, 1);
        assert_eq!(
            index.ids("products_en"),
            vec![codec.encode(&id, "en", Slot::Main).unwrap()]
        );

        let calls = index.calls();
        assert!(matches!(calls[0], IndexCall::Delete { .. }));
        assert!(matches!(calls[1], IndexCall::Save { .. }));
    }

    #[tokio::test]
    async fn test_failed_delete_skips_save_for_chunk_only() {
        let index = Arc::new(InMemorySearchIndex::new());
        let ctx = context(index.clone(), 1);
        let codec = ctx.codec().clone();
        let bad = codec
            .legacy_encode(&ItemId::parse("2").unwrap(), "en", Slot::Main)
            .unwrap();
        index.fail_calls_containing(bad);

        let plan = ReindexPlanner::from_context(&ctx)
            .plan_for(&[widget("1"), widget("2"), widget("3")])
            .unwrap();
        let report = PlanApplier::new(&ctx)
            .apply(&plan, &NoOpProgressCallback)
            .await;

        assert_eq!(report.chunk_calls, 3);
        assert_eq!(report.applied, 2);
        assert_eq!(
            report.failed_items.iter().map(ItemId::as_str).collect::<Vec<_>>(),
            vec!["2"]
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("products_en: chunk 1"));
        assert_eq!(index.len("products_en"), 2);
        assert!(index
            .get(
                "products_en",
                &codec.encode(&ItemId::parse("2").unwrap(), "en", Slot::Main).unwrap()
            )
            .is_none());
    }

    #[tokio::test]
    async fn test_each_locale_goes_to_its_own_index() {
        let index = Arc::new(InMemorySearchIndex::new());
        let ctx = context(index.clone(), 50);

        let item = widget("5").with_translation("de", FieldMap::new());
        let plan = ReindexPlanner::from_context(&ctx).plan_for(&[item]).unwrap();
        let report = PlanApplier::new(&ctx)
            .apply(&plan, &NoOpProgressCallback)
            .await;

        assert_eq!(report.applied, 2);
        assert_eq!(index.len("products_en"), 1);
        assert_eq!(index.len("products_de"), 1);
    }
}
