//! Top-level sync operations.
//!
//! A selection is resolved to item ids first. The ids are then processed in
//! executor chunks: each chunk is loaded, planned, applied, and the item
//! cache is cleared before the next one.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use reindex_types::{ItemId, LogicalItem, ReindexError};

use crate::apply::PlanApplier;
use crate::context::SyncContext;
use crate::executor::{NoOpProgressCallback, ProgressCallback};
use crate::partial::{PartialUpdatePipeline, PartialUpdateRequest};
use crate::planner::{ReindexPlan, ReindexPlanner};
use crate::source::ContentRepository;

/// Which items a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Ids(Vec<ItemId>),
    Type {
        bundle: String,
        limit: Option<usize>,
        offset: usize,
    },
    All,
}

impl Selection {
    fn label(&self) -> &'static str {
        match self {
            Selection::Ids(_) => "reindex-ids",
            Selection::Type { .. } => "reindex-type",
            Selection::All => "reindex-all",
        }
    }
}

/// Operator-facing result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    /// Item ids handed to the pipeline
    pub processed: usize,
    pub identifiers_deleted: usize,
    pub documents_saved: usize,
    /// Items with at least one failed index call
    pub failed: BTreeSet<ItemId>,
    /// Ids the repository did not return
    pub missing: Vec<ItemId>,
    pub escalated: Vec<ItemId>,
    pub partial_applied: usize,
    pub partial_skipped: usize,
    /// Items whose split field was cut at the slot bound
    pub truncated: Vec<ItemId>,
    pub dropped_slices: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            processed: 0,
            identifiers_deleted: 0,
            documents_saved: 0,
            failed: BTreeSet::new(),
            missing: Vec::new(),
            escalated: Vec::new(),
            partial_applied: 0,
            partial_skipped: 0,
            truncated: Vec::new(),
            dropped_slices: 0,
            errors: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.elapsed_ms = (Utc::now() - self.started_at).num_milliseconds();
        self
    }

    /// Fold a follow-up run (e.g. escalated items) into this report.
    pub fn absorb(&mut self, other: SyncReport) {
        self.identifiers_deleted += other.identifiers_deleted;
        self.documents_saved += other.documents_saved;
        self.failed.extend(other.failed);
        self.missing.extend(other.missing);
        self.truncated.extend(other.truncated);
        self.dropped_slices += other.dropped_slices;
        self.errors.extend(other.errors);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.errors.is_empty()
    }

    /// Human-readable summary listing ids to re-run.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{}: processed {} items, {} failed, in {} ms",
            self.operation,
            self.processed,
            self.failed.len(),
            self.elapsed_ms
        )];
        lines.push(format!(
            "deleted {} identifiers, saved {} documents",
            self.identifiers_deleted, self.documents_saved
        ));
        if self.partial_applied > 0 || self.partial_skipped > 0 || !self.escalated.is_empty() {
            lines.push(format!(
                "partial updates: {} applied, {} skipped, {} escalated",
                self.partial_applied,
                self.partial_skipped,
                self.escalated.len()
            ));
        }
        if !self.escalated.is_empty() {
            lines.push(format!("escalated: {}", join_ids(self.escalated.iter())));
        }
        if !self.missing.is_empty() {
            lines.push(format!("not in repository: {}", join_ids(self.missing.iter())));
        }
        if !self.truncated.is_empty() {
            lines.push(format!(
                "truncated: {} ({} slices dropped)",
                join_ids(self.truncated.iter()),
                self.dropped_slices
            ));
        }
        if !self.failed.is_empty() {
            lines.push(format!("failed: {}", join_ids(self.failed.iter())));
        }
        for error in &self.errors {
            lines.push(format!("error: {}", error));
        }
        lines.join("\n")
    }
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a ItemId>) -> String {
    ids.map(ItemId::as_str).collect::<Vec<_>>().join(",")
}

fn lock(report: &Mutex<SyncReport>) -> MutexGuard<'_, SyncReport> {
    report.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs reindex and partial update operations over a [`SyncContext`].
pub struct ReindexDriver<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ReindexDriver<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Resolve a selection to item ids without keeping items cached.
    pub async fn resolve(&self, selection: &Selection) -> Result<Vec<ItemId>, ReindexError> {
        match selection {
            Selection::Ids(ids) => {
                if ids.is_empty() {
                    return Err(ReindexError::InvalidInput("no item ids given".to_string()));
                }
                Ok(ids.clone())
            }
            Selection::Type {
                bundle,
                limit,
                offset,
            } => self.ids_of_type(bundle, *limit, *offset).await,
            Selection::All => {
                let mut ids = Vec::new();
                for bundle in self.ctx.repository().bundles().await? {
                    ids.extend(self.ids_of_type(&bundle, None, 0).await?);
                }
                Ok(ids)
            }
        }
    }

    async fn ids_of_type(
        &self,
        bundle: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ItemId>, ReindexError> {
        let items = self.items_of_type(bundle, limit, offset).await?;
        Ok(items.into_iter().map(|item| item.id).collect())
    }

    async fn items_of_type(
        &self,
        bundle: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<LogicalItem>, ReindexError> {
        if bundle.trim().is_empty() {
            return Err(ReindexError::InvalidInput("type is empty".to_string()));
        }
        let page_size = self.ctx.executor().chunk_size();
        let mut items = Vec::new();
        let mut next = offset;

        loop {
            let want = match limit {
                Some(limit) if items.len() >= limit => break,
                Some(limit) => page_size.min(limit - items.len()),
                None => page_size,
            };
            let page = self
                .ctx
                .repository()
                .load_items_by_type(bundle, want, next)
                .await?;
            self.ctx.clear_cache();
            if page.is_empty() {
                break;
            }
            next += page.len();
            items.extend(page);
        }

        debug!(bundle = %bundle, count = items.len(), "Resolved items of type");
        Ok(items)
    }

    /// Compute the plan for a selection without calling the index.
    pub async fn plan(&self, selection: &Selection) -> Result<ReindexPlan, ReindexError> {
        let ids = self.resolve(selection).await?;
        let planner = ReindexPlanner::from_context(self.ctx);
        let mut plan = ReindexPlan::default();
        for batch in ids.chunks(self.ctx.executor().chunk_size()) {
            let items = self.ctx.repository().load_items_by_ids(batch).await?;
            plan.merge(planner.plan_for(&items)?);
            self.ctx.clear_cache();
        }
        Ok(plan)
    }

    /// Full reindex of a selection.
    pub async fn run<P>(&self, selection: &Selection, progress: &P) -> Result<SyncReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        let ids = self.resolve(selection).await?;
        Ok(self.reindex_batches(selection.label(), ids, progress).await)
    }

    pub async fn reindex_ids<P>(&self, ids: Vec<ItemId>, progress: &P) -> Result<SyncReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        self.run(&Selection::Ids(ids), progress).await
    }

    pub async fn reindex_type<P>(
        &self,
        bundle: &str,
        limit: Option<usize>,
        offset: usize,
        progress: &P,
    ) -> Result<SyncReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        let selection = Selection::Type {
            bundle: bundle.to_string(),
            limit,
            offset,
        };
        self.run(&selection, progress).await
    }

    pub async fn reindex_all<P>(&self, progress: &P) -> Result<SyncReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        self.run(&Selection::All, progress).await
    }

    async fn reindex_batches<P>(&self, operation: &str, ids: Vec<ItemId>, progress: &P) -> SyncReport
    where
        P: ProgressCallback + ?Sized,
    {
        let report = Mutex::new(SyncReport::new(operation));
        info!(operation = %operation, items = ids.len(), "Starting reindex");

        let run = self
            .ctx
            .executor()
            .run(ids, |batch| self.reindex_batch(batch, &report), progress)
            .await;

        let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
        report.processed = run.processed;
        report.failed.extend(run.failed_items);
        report
            .errors
            .extend(run.chunks.into_iter().filter_map(|c| c.error));

        let report = report.finish();
        info!(
            operation = %operation,
            processed = report.processed,
            failed = report.failed.len(),
            elapsed_ms = report.elapsed_ms,
            "Reindex complete"
        );
        report
    }

    /// Load, plan and apply one batch. Index failures are recorded per item;
    /// only load and planning errors fail the whole batch.
    async fn reindex_batch(
        &self,
        batch: Vec<ItemId>,
        report: &Mutex<SyncReport>,
    ) -> Result<(), ReindexError> {
        let items = self.ctx.repository().load_items_by_ids(&batch).await?;
        let found: BTreeSet<&ItemId> = items.iter().map(|item| &item.id).collect();
        let missing: Vec<ItemId> = batch
            .iter()
            .filter(|id| !found.contains(id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(count = missing.len(), "Items not found in repository");
        }

        let plan = ReindexPlanner::from_context(self.ctx).plan_for(&items);
        self.ctx.clear_cache();
        let plan = plan?;

        let applied = PlanApplier::new(self.ctx)
            .apply(&plan, &NoOpProgressCallback)
            .await;

        let mut report = lock(report);
        report.missing.extend(missing);
        report.identifiers_deleted += applied.deleted;
        report.documents_saved += applied.saved;
        report.failed.extend(applied.failed_items);
        report.errors.extend(applied.errors);
        report.truncated.extend(plan.truncated_items().iter().cloned());
        report.dropped_slices += plan.dropped_slices();
        Ok(())
    }

    /// Requests carrying the current values of `fields` for every item of
    /// the given bundles.
    pub async fn partial_requests(
        &self,
        bundles: &[String],
        fields: &[String],
    ) -> Result<Vec<PartialUpdateRequest>, ReindexError> {
        if bundles.is_empty() {
            return Err(ReindexError::InvalidInput("no types given".to_string()));
        }
        if fields.is_empty() || fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ReindexError::InvalidInput(
                "field list is empty or malformed".to_string(),
            ));
        }
        let mut requests = Vec::new();
        for bundle in bundles {
            let items = self.items_of_type(bundle, None, 0).await?;
            requests.extend(PartialUpdateRequest::from_items(&items, fields));
        }
        Ok(requests)
    }

    /// Apply partial updates, then fully reindex whatever escalated.
    pub async fn partial_update<P>(
        &self,
        requests: Vec<PartialUpdateRequest>,
        progress: &P,
    ) -> Result<SyncReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        let mut report = SyncReport::new("partial-update");
        report.processed = requests.len();

        let mut outcome = PartialUpdatePipeline::new(self.ctx)
            .apply(requests, progress)
            .await;
        self.ctx.clear_cache();

        report.partial_applied = outcome.applied.len();
        report.partial_skipped = outcome.skipped.len();
        report.failed.extend(outcome.failed.iter().cloned());
        report.errors.extend(outcome.errors.iter().cloned());

        let queued = outcome.queue_full_reindex();
        if !queued.is_empty() {
            info!(count = queued.len(), "Reindexing escalated items");
            let follow_up = self
                .reindex_batches("reindex-escalated", queued.clone(), &NoOpProgressCallback)
                .await;
            report.absorb(follow_up);
            report.escalated = queued;
        }

        Ok(report.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reindex_search::{InMemorySearchIndex, SearchIndex};
    use reindex_types::{FieldMap, Slot};

    use crate::codec::IdentifierCodec;
    use crate::context::IndexNaming;
    use crate::executor::{BatchProgress, ChunkedBatchExecutor};
    use crate::source::InMemoryContentRepository;
    use crate::split::SplitStrategy;

    #[derive(Default)]
    struct Recorder(std::sync::Mutex<Vec<BatchProgress>>);

    impl ProgressCallback for Recorder {
        fn on_progress(&self, progress: &BatchProgress) {
            self.0.lock().unwrap().push(*progress);
        }
    }

    fn widget(id: usize) -> LogicalItem {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), format!("Widget {}", id).into());
        fields.insert("summary".into(), "Summary".into());
        LogicalItem::new(ItemId::parse(&id.to_string()).unwrap(), "widget")
            .with_translation("en", fields)
    }

    fn context(items: Vec<LogicalItem>, chunk_size: usize) -> (Arc<InMemorySearchIndex>, SyncContext) {
        let mut allow = std::collections::BTreeMap::new();
        allow.insert("widget".to_string(), vec!["title".to_string()]);
        let index = Arc::new(InMemorySearchIndex::new());
        let ctx = SyncContext::new(
            index.clone() as Arc<dyn SearchIndex>,
            Arc::new(InMemoryContentRepository::new(items).with_partial_fields(&allow)),
            SplitStrategy::new(IdentifierCodec::new("node", 6), 10_000, "body", None),
            ChunkedBatchExecutor::new(chunk_size).unwrap(),
            IndexNaming::new("products"),
        );
        (index, ctx)
    }

    #[tokio::test]
    async fn test_reindex_ids_progress_per_chunk() {
        let items: Vec<LogicalItem> = (1..=12).map(widget).collect();
        let ids: Vec<ItemId> = items.iter().map(|i| i.id.clone()).collect();
        let (index, ctx) = context(items, 5);
        let progress = Recorder::default();

        let report = ReindexDriver::new(&ctx)
            .reindex_ids(ids, &progress)
            .await
            .unwrap();

        assert_eq!(report.processed, 12);
        assert!(report.is_success());
        assert_eq!(report.documents_saved, 12);
        assert_eq!(index.len("products_en"), 12);

        let seen: Vec<usize> = progress.0.lock().unwrap().iter().map(|p| p.processed).collect();
        assert_eq!(seen, vec![5, 10, 12]);
        assert_eq!(ctx.repository().cached_len(), 0);
    }

    #[tokio::test]
    async fn test_missing_ids_reported() {
        let (_index, ctx) = context(vec![widget(1)], 50);
        let report = ReindexDriver::new(&ctx)
            .reindex_ids(ItemId::parse_list("1,99").unwrap(), &NoOpProgressCallback)
            .await
            .unwrap();
        assert_eq!(report.missing, vec![ItemId::parse("99").unwrap()]);
        assert!(report.summary().contains("not in repository: 99"));
    }

    #[tokio::test]
    async fn test_reindex_type_with_limit_and_offset() {
        let mut items: Vec<LogicalItem> = (1..=10).map(widget).collect();
        items.push(
            LogicalItem::new(ItemId::parse("100").unwrap(), "page")
                .with_translation("en", FieldMap::new()),
        );
        let (index, ctx) = context(items, 3);

        let report = ReindexDriver::new(&ctx)
            .reindex_type("widget", Some(4), 2, &NoOpProgressCallback)
            .await
            .unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(index.len("products_en"), 4);

        let all = ReindexDriver::new(&ctx)
            .reindex_all(&NoOpProgressCallback)
            .await
            .unwrap();
        assert_eq!(all.processed, 11);
        assert_eq!(index.len("products_en"), 11);
    }

    #[tokio::test]
    async fn test_plan_does_not_touch_index() {
        let (index, ctx) = context(vec![widget(1), widget(2)], 1);
        let plan = ReindexDriver::new(&ctx)
            .plan(&Selection::Ids(ItemId::parse_list("1,2").unwrap()))
            .await
            .unwrap();
        assert_eq!(plan.deletion_count(), 28);
        assert_eq!(plan.upsert_count(), 2);
        assert!(index.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_selection_is_invalid_input() {
        let (_index, ctx) = context(vec![], 50);
        let driver = ReindexDriver::new(&ctx);
        assert!(matches!(
            driver.resolve(&Selection::Ids(vec![])).await,
            Err(ReindexError::InvalidInput(_))
        ));
        assert!(matches!(
            driver.partial_requests(&["widget".to_string()], &[]).await,
            Err(ReindexError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_update_escalates_to_full_reindex() {
        let (index, ctx) = context(vec![widget(1), widget(2)], 50);
        let driver = ReindexDriver::new(&ctx);

        // only item 1 is indexed, so item 2 escalates
        let seeded = ctx.strategy().documents_for(&widget(1), "en").unwrap();
        index.insert("products_en", seeded);

        let requests = driver
            .partial_requests(&["widget".to_string()], &["title".to_string()])
            .await
            .unwrap();
        assert_eq!(requests.len(), 2);

        let report = driver
            .partial_update(requests, &NoOpProgressCallback)
            .await
            .unwrap();
        assert_eq!(report.partial_applied, 1);
        assert_eq!(report.escalated, vec![ItemId::parse("2").unwrap()]);
        assert_eq!(report.documents_saved, 1);

        let codec = ctx.codec();
        let id2 = codec
            .encode(&ItemId::parse("2").unwrap(), "en", Slot::Main)
            .unwrap();
        assert!(index.get("products_en", &id2).is_some());
        assert!(report.summary().contains("escalated: 2"));
    }
}
