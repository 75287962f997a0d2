//! Computation of delete and upsert sets for changed items.
//!
//! A plan is built without touching the index. For every item and locale it
//! deletes every identifier the item may have ever been stored under, then
//! upserts fresh documents when the locale is searchable.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use reindex_types::{DocumentId, IndexDocument, ItemId, LogicalItem, ReindexError};

use crate::context::SyncContext;
use crate::source::ContentRepository;
use crate::split::SplitStrategy;

/// Work for one item in one locale.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedItem {
    pub item_id: ItemId,
    /// Whether fresh documents are written after the purge
    pub searchable: bool,
    pub deletions: BTreeSet<DocumentId>,
    pub upserts: Vec<IndexDocument>,
}

/// Deletions and upserts, grouped by locale then item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReindexPlan {
    locales: BTreeMap<String, Vec<PlannedItem>>,
    truncated: Vec<ItemId>,
    dropped_slices: usize,
}

impl ReindexPlan {
    /// Locales touched by the plan, sorted.
    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.locales.keys().map(String::as_str)
    }

    pub fn entries(&self, locale: &str) -> &[PlannedItem] {
        self.locales.get(locale).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every identifier the plan deletes, across locales.
    pub fn identifiers_to_delete(&self) -> BTreeSet<DocumentId> {
        self.all_entries()
            .flat_map(|e| e.deletions.iter().cloned())
            .collect()
    }

    /// Every document the plan writes, across locales.
    pub fn documents_to_upsert(&self) -> Vec<&IndexDocument> {
        self.all_entries().flat_map(|e| e.upserts.iter()).collect()
    }

    pub fn deletion_count(&self) -> usize {
        self.all_entries().map(|e| e.deletions.len()).sum()
    }

    pub fn upsert_count(&self) -> usize {
        self.all_entries().map(|e| e.upserts.len()).sum()
    }

    /// Distinct items in the plan.
    pub fn item_ids(&self) -> BTreeSet<&ItemId> {
        self.all_entries().map(|e| &e.item_id).collect()
    }

    /// Items whose split field did not fit in the slot bound.
    pub fn truncated_items(&self) -> &[ItemId] {
        &self.truncated
    }

    pub fn dropped_slices(&self) -> usize {
        self.dropped_slices
    }

    pub fn is_empty(&self) -> bool {
        self.locales.values().all(Vec::is_empty)
    }

    /// Fold another plan into this one.
    pub fn merge(&mut self, other: ReindexPlan) {
        for (locale, entries) in other.locales {
            self.locales.entry(locale).or_default().extend(entries);
        }
        self.truncated.extend(other.truncated);
        self.dropped_slices += other.dropped_slices;
    }

    fn all_entries(&self) -> impl Iterator<Item = &PlannedItem> {
        self.locales.values().flatten()
    }
}

/// Builds [`ReindexPlan`]s from loaded items.
pub struct ReindexPlanner<'a> {
    strategy: &'a SplitStrategy,
    repository: &'a dyn ContentRepository,
}

impl<'a> ReindexPlanner<'a> {
    pub fn new(strategy: &'a SplitStrategy, repository: &'a dyn ContentRepository) -> Self {
        Self {
            strategy,
            repository,
        }
    }

    pub fn from_context(ctx: &'a SyncContext) -> Self {
        Self::new(ctx.strategy(), ctx.repository())
    }

    /// Plan deletions and upserts for the given items.
    ///
    /// Deletions are always planned, searchable or not. Callers should clear
    /// the item cache once the plan has been applied.
    pub fn plan_for(&self, items: &[LogicalItem]) -> Result<ReindexPlan, ReindexError> {
        let codec = self.strategy.codec();
        let mut plan = ReindexPlan::default();
        let mut seen = HashSet::new();

        for item in items {
            if !seen.insert(&item.id) {
                debug!(item = %item.id, "Skipping duplicate item in batch");
                continue;
            }

            let split = self.strategy.plan(item);
            let mut item_dropped = 0;

            for locale in self.repository.get_translations(item) {
                let deletions = codec.all_identifiers_for(&item.id, &locale)?;
                let searchable = self.repository.is_searchable(item, &locale);

                let upserts = if searchable {
                    item_dropped += split.overflow_for(&locale);
                    let keys: Vec<_> = split.keys_for(&locale).cloned().collect();
                    self.strategy.expand(item, &keys)?
                } else {
                    Vec::new()
                };

                plan.locales.entry(locale).or_default().push(PlannedItem {
                    item_id: item.id.clone(),
                    searchable,
                    deletions,
                    upserts,
                });
            }

            if item_dropped > 0 {
                plan.truncated.push(item.id.clone());
                plan.dropped_slices += item_dropped;
            }
        }

        if !plan.truncated.is_empty() {
            warn!(
                items = plan.truncated.len(),
                dropped_slices = plan.dropped_slices,
                "Items truncated at the split bound"
            );
        }
        debug!(
            deletions = plan.deletion_count(),
            upserts = plan.upsert_count(),
            "Plan computed"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IdentifierCodec;
    use crate::source::InMemoryContentRepository;
    use reindex_types::{FieldMap, Slot};

    fn strategy() -> SplitStrategy {
        SplitStrategy::new(
            IdentifierCodec::new("node", 6),
            10_000,
            "body",
            Some("attachment_text".to_string()),
        )
    }

    fn widget(id: &str, locales: &[&str]) -> LogicalItem {
        let mut item = LogicalItem::new(ItemId::parse(id).unwrap(), "widget");
        for locale in locales {
            let mut fields = FieldMap::new();
            fields.insert("title".into(), format!("Widget {}", id).into());
            fields.insert("body".into(), "Short body".into());
            item = item.with_translation(*locale, fields);
        }
        item
    }

    #[test]
    fn test_single_searchable_item() {
        let strategy = strategy();
        let repo = InMemoryContentRepository::default();
        let planner = ReindexPlanner::new(&strategy, &repo);

        let plan = planner.plan_for(&[widget("42", &["en"])]).unwrap();
        assert_eq!(plan.identifiers_to_delete().len(), 14);
        let upserts = plan.documents_to_upsert();
        assert_eq!(upserts.len(), 1);
        assert_eq!(
            upserts[0].object_id,
            strategy
                .codec()
                .encode(&ItemId::parse("42").unwrap(), "en", Slot::Main)
                .unwrap()
        );
        assert!(plan
            .identifiers_to_delete()
            .contains(&DocumentId::new("entity:node/42:en")));
    }

    #[test]
    fn test_unsearchable_item_is_only_purged() {
        let strategy = strategy();
        let repo = InMemoryContentRepository::default();
        let planner = ReindexPlanner::new(&strategy, &repo);

        let item = widget("7", &["en", "fr"]).with_searchable(false);
        let plan = planner.plan_for(&[item]).unwrap();
        assert_eq!(plan.deletion_count(), 28);
        assert_eq!(plan.upsert_count(), 0);
        assert_eq!(plan.locales().collect::<Vec<_>>(), vec!["en", "fr"]);
        assert!(plan.entries("en").iter().all(|e| !e.searchable));
    }

    #[test]
    fn test_locales_grouped_separately() {
        let strategy = strategy();
        let repo = InMemoryContentRepository::default();
        let planner = ReindexPlanner::new(&strategy, &repo);

        let plan = planner
            .plan_for(&[widget("1", &["en", "de"]), widget("2", &["en"])])
            .unwrap();
        assert_eq!(plan.entries("en").len(), 2);
        assert_eq!(plan.entries("de").len(), 1);
        assert!(plan.entries("fr").is_empty());
        assert_eq!(plan.item_ids().len(), 2);
    }

    #[test]
    fn test_duplicate_items_planned_once() {
        let strategy = strategy();
        let repo = InMemoryContentRepository::default();
        let planner = ReindexPlanner::new(&strategy, &repo);

        let plan = planner
            .plan_for(&[widget("3", &["en"]), widget("3", &["en"])])
            .unwrap();
        assert_eq!(plan.entries("en").len(), 1);
    }

    #[test]
    fn test_truncated_items_are_counted() {
        let strategy = SplitStrategy::new(IdentifierCodec::new("node", 2), 2, "body", None);
        let repo = InMemoryContentRepository::default();
        let planner = ReindexPlanner::new(&strategy, &repo);

        let mut fields = FieldMap::new();
        fields.insert("body".into(), "aa bb cc dd".into());
        let item = LogicalItem::new(ItemId::parse("9").unwrap(), "page").with_translation("en", fields);

        let plan = planner.plan_for(&[item]).unwrap();
        assert_eq!(plan.upsert_count(), 2);
        assert_eq!(plan.truncated_items().len(), 1);
        assert_eq!(plan.dropped_slices(), 2);
    }

    #[test]
    fn test_merge_plans() {
        let strategy = strategy();
        let repo = InMemoryContentRepository::default();
        let planner = ReindexPlanner::new(&strategy, &repo);

        let mut plan = planner.plan_for(&[widget("1", &["en"])]).unwrap();
        plan.merge(planner.plan_for(&[widget("2", &["fr"])]).unwrap());
        assert_eq!(plan.upsert_count(), 2);
        assert_eq!(plan.locales().count(), 2);
        assert!(!plan.is_empty());
        assert!(ReindexPlan::default().is_empty());
    }
}
