//! Field-level updates of existing documents.
//!
//! A request is restricted to the bundle's allow-list and merged into every
//! fragment of the item. Before writing, the slots present in the index are
//! compared with the slots the updated item needs; any difference escalates
//! the item to a full reindex instead of guessing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reindex_types::{DocumentId, FieldMap, ItemId, LogicalItem, ReindexError, Slot, SplitKey};

use crate::context::SyncContext;
use crate::executor::ProgressCallback;
use crate::source::ContentRepository;

/// Changed field values for one item and locale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialUpdateRequest {
    pub logical_id: ItemId,
    pub locale: String,
    pub field_values: FieldMap,
}

impl PartialUpdateRequest {
    pub fn new(logical_id: ItemId, locale: impl Into<String>, field_values: FieldMap) -> Self {
        Self {
            logical_id,
            locale: locale.into(),
            field_values,
        }
    }

    /// Requests carrying the current values of `fields` for every locale of
    /// each item. Fields an item lacks are left out.
    pub fn from_items<'a>(
        items: impl IntoIterator<Item = &'a LogicalItem>,
        fields: &[String],
    ) -> Vec<Self> {
        let mut requests = Vec::new();
        for item in items {
            for (locale, values) in &item.translations {
                let field_values: FieldMap = fields
                    .iter()
                    .filter_map(|name| values.get(name).map(|v| (name.clone(), v.clone())))
                    .collect();
                requests.push(Self::new(item.id.clone(), locale.as_str(), field_values));
            }
        }
        requests
    }
}

/// Lifecycle of an item in a partial update pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Applied as a field merge
    Partial,
    /// Not safe to merge; needs a full reindex
    Escalated,
    /// Handed to the full reindex path
    FullReindexQueued,
}

/// An item taken off the partial path.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub item_id: ItemId,
    pub locale: String,
    pub reason: String,
    pub state: UpdateState,
}

/// Result of a partial update pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialUpdateOutcome {
    /// Items whose merge was written
    pub applied: Vec<ItemId>,
    pub escalated: Vec<Escalation>,
    /// Requests left with no allow-listed field
    pub skipped: Vec<ItemId>,
    /// Items whose own index call failed, or with invalid requests
    pub failed: Vec<ItemId>,
    pub errors: Vec<String>,
}

impl PartialUpdateOutcome {
    /// Escalated item ids, without duplicates, in escalation order.
    pub fn escalated_ids(&self) -> Vec<ItemId> {
        let mut seen = HashSet::new();
        self.escalated
            .iter()
            .filter(|e| seen.insert(&e.item_id))
            .map(|e| e.item_id.clone())
            .collect()
    }

    /// Move every escalation to `FullReindexQueued` and return the ids to
    /// reindex.
    pub fn queue_full_reindex(&mut self) -> Vec<ItemId> {
        for escalation in &mut self.escalated {
            if escalation.state == UpdateState::Escalated {
                escalation.state = UpdateState::FullReindexQueued;
            }
        }
        self.escalated_ids()
    }

    pub fn state_of(&self, id: &ItemId) -> Option<UpdateState> {
        if let Some(escalation) = self.escalated.iter().find(|e| &e.item_id == id) {
            return Some(escalation.state);
        }
        self.applied.contains(id).then_some(UpdateState::Partial)
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct PassState {
    applied: Vec<ItemId>,
    escalated: Vec<Escalation>,
    escalated_ids: HashSet<ItemId>,
    skipped: Vec<ItemId>,
    /// Requests whose write was attempted and failed
    failed: Vec<ItemId>,
}

impl PassState {
    fn escalate(&mut self, item_id: &ItemId, locale: &str, reason: String) {
        warn!(item = %item_id, locale = %locale, reason = %reason, "Escalating to full reindex");
        self.escalated_ids.insert(item_id.clone());
        self.escalated.push(Escalation {
            item_id: item_id.clone(),
            locale: locale.to_string(),
            reason,
            state: UpdateState::Escalated,
        });
    }
}

/// A request ready to be checked against the index.
struct Candidate {
    request: PartialUpdateRequest,
    merged: LogicalItem,
    restricted: BTreeSet<String>,
    expected: Vec<SplitKey>,
    lookups: Vec<(Slot, DocumentId)>,
}

enum Prepared {
    Ready(Box<Candidate>),
    Skip,
    Escalate(String),
}

/// Applies partial updates, escalating items whose structure may have
/// changed.
pub struct PartialUpdatePipeline<'a> {
    ctx: &'a SyncContext,
}

impl<'a> PartialUpdatePipeline<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Apply requests, one executor pass per locale.
    ///
    /// Index failures are reported per chunk and not retried here. Escalated
    /// items are not retried as partial updates within the same pass.
    pub async fn apply<P>(
        &self,
        requests: Vec<PartialUpdateRequest>,
        progress: &P,
    ) -> PartialUpdateOutcome
    where
        P: ProgressCallback + ?Sized,
    {
        let mut outcome = PartialUpdateOutcome::default();
        let mut by_locale: BTreeMap<String, Vec<PartialUpdateRequest>> = BTreeMap::new();

        for request in merge_requests(requests) {
            let check = self
                .ctx
                .codec()
                .encode(&request.logical_id, &request.locale, Slot::Main);
            if let Err(e) = check {
                outcome.errors.push(e.to_string());
                outcome.failed.push(request.logical_id);
                continue;
            }
            by_locale
                .entry(request.locale.clone())
                .or_default()
                .push(request);
        }

        let state = Mutex::new(PassState::default());
        for (locale, requests) in by_locale {
            let index_name = self.ctx.naming().physical(&locale);
            let run = self
                .ctx
                .executor()
                .run(
                    requests,
                    |chunk| self.process_chunk(&index_name, chunk, &state),
                    progress,
                )
                .await;

            for chunk in run.failed_chunks() {
                outcome.errors.push(format!(
                    "{}: chunk {} ({} requests): {}",
                    index_name,
                    chunk.index,
                    chunk.len,
                    chunk.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcome.applied = state.applied;
        outcome.escalated = state.escalated;
        outcome.skipped = state.skipped;
        outcome.failed.extend(state.failed);

        info!(
            applied = outcome.applied.len(),
            escalated = outcome.escalated.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Partial update pass complete"
        );
        outcome
    }

    async fn process_chunk(
        &self,
        index_name: &str,
        chunk: Vec<PartialUpdateRequest>,
        state: &Mutex<PassState>,
    ) -> Result<(), ReindexError> {
        let repository = self.ctx.repository();
        let mut ids: Vec<ItemId> = chunk.iter().map(|r| r.logical_id.clone()).collect();
        ids.dedup();
        let items: HashMap<ItemId, LogicalItem> = match repository.load_items_by_ids(&ids).await {
            Ok(items) => items.into_iter().map(|item| (item.id.clone(), item)).collect(),
            Err(e) => {
                let mut pass = lock(state);
                let pending: Vec<ItemId> = ids
                    .into_iter()
                    .filter(|id| !pass.escalated_ids.contains(id))
                    .collect();
                pass.failed.extend(pending);
                return Err(e);
            }
        };

        let mut candidates = Vec::new();
        let mut first_error = None;
        for request in chunk {
            let mut pass = lock(state);
            if pass.escalated_ids.contains(&request.logical_id) {
                debug!(item = %request.logical_id, "Already escalated in this pass");
                continue;
            }
            let Some(item) = items.get(&request.logical_id) else {
                pass.escalate(
                    &request.logical_id,
                    &request.locale,
                    "item not found in repository".to_string(),
                );
                continue;
            };
            match self.prepare(request.clone(), item) {
                Ok(Prepared::Ready(candidate)) => candidates.push(*candidate),
                Ok(Prepared::Skip) => pass.skipped.push(request.logical_id),
                Ok(Prepared::Escalate(reason)) => {
                    pass.escalate(&request.logical_id, &request.locale, reason)
                }
                Err(e) => {
                    pass.failed.push(request.logical_id);
                    first_error.get_or_insert(e);
                }
            }
        }

        if !candidates.is_empty() {
            if let Err(e) = self.write_candidates(index_name, candidates, state).await {
                return Err(first_error.unwrap_or(e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Check the candidates' fragments against the index and send the
    /// partial update for those that still match. Requests that were part
    /// of a failed index call are recorded as failed.
    async fn write_candidates(
        &self,
        index_name: &str,
        candidates: Vec<Candidate>,
        state: &Mutex<PassState>,
    ) -> Result<(), ReindexError> {
        let lookup_ids: Vec<DocumentId> = candidates
            .iter()
            .flat_map(|c| c.lookups.iter().map(|(_, id)| id.clone()))
            .collect();
        let found = match self.ctx.index().get_documents(index_name, &lookup_ids).await {
            Ok(found) if found.len() == lookup_ids.len() => found,
            result => {
                lock(state)
                    .failed
                    .extend(candidates.iter().map(|c| c.request.logical_id.clone()));
                return Err(match result {
                    Ok(found) => ReindexError::TransientIndex(format!(
                        "asked for {} documents, got {}",
                        lookup_ids.len(),
                        found.len()
                    )),
                    Err(e) => e.into(),
                });
            }
        };

        let mut documents = Vec::new();
        let mut ready = Vec::new();
        let mut offset = 0;
        for candidate in candidates {
            let window = &found[offset..offset + candidate.lookups.len()];
            offset += candidate.lookups.len();

            let present: BTreeSet<Slot> = candidate
                .lookups
                .iter()
                .zip(window)
                .filter(|(_, doc)| doc.is_some())
                .map(|((slot, _), _)| *slot)
                .collect();
            let expected: BTreeSet<Slot> = candidate.expected.iter().map(|k| k.slot).collect();

            let id = &candidate.request.logical_id;
            if present != expected {
                let mismatch = ReindexError::StructuralMismatch {
                    item_id: id.to_string(),
                    reason: format!(
                        "index holds slots {:?}, content needs {:?}",
                        present, expected
                    ),
                };
                lock(state).escalate(id, &candidate.request.locale, mismatch.to_string());
                continue;
            }

            match self.ctx.strategy().expand(&candidate.merged, &candidate.expected) {
                Ok(docs) => {
                    documents.extend(
                        docs.iter()
                            .map(|d| d.project(candidate.restricted.iter().map(String::as_str))),
                    );
                    ready.push(id.clone());
                }
                Err(e) => lock(state).escalate(id, &candidate.request.locale, e.to_string()),
            }
        }

        if !documents.is_empty() {
            if let Err(e) = self
                .ctx
                .index()
                .partial_update_documents(index_name, &documents)
                .await
            {
                lock(state).failed.extend(ready);
                return Err(e.into());
            }
            debug!(index = %index_name, documents = documents.len(), "Partial update sent");
        }
        lock(state).applied.extend(ready);
        Ok(())
    }

    fn prepare(
        &self,
        request: PartialUpdateRequest,
        item: &LogicalItem,
    ) -> Result<Prepared, ReindexError> {
        let repository = self.ctx.repository();
        let allowed = repository.partial_indexable_fields(&item.bundle);

        let (restricted, dropped): (FieldMap, FieldMap) = request
            .field_values
            .clone()
            .into_iter()
            .partition(|(name, _)| allowed.contains(name));
        if !dropped.is_empty() {
            debug!(
                item = %item.id,
                bundle = %item.bundle,
                dropped = ?dropped.keys().collect::<Vec<_>>(),
                "Dropping fields outside the allow-list"
            );
        }
        if restricted.is_empty() {
            return Ok(Prepared::Skip);
        }

        if !repository.is_searchable(item, &request.locale) {
            return Ok(Prepared::Escalate(format!(
                "item is not searchable in {}",
                request.locale
            )));
        }

        let mut merged = item.clone();
        merged
            .translations
            .entry(request.locale.clone())
            .or_default()
            .extend(restricted.iter().map(|(k, v)| (k.clone(), v.clone())));

        let plan = self.ctx.strategy().plan(&merged);
        let expected: Vec<SplitKey> = plan.keys_for(&request.locale).cloned().collect();
        let lookups = self
            .ctx
            .codec()
            .current_identifiers_for(&item.id, &request.locale)?;

        Ok(Prepared::Ready(Box::new(Candidate {
            restricted: restricted.into_keys().collect(),
            request,
            merged,
            expected,
            lookups,
        })))
    }
}

fn lock(state: &Mutex<PassState>) -> MutexGuard<'_, PassState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fold requests for the same item and locale; later values win.
fn merge_requests(requests: Vec<PartialUpdateRequest>) -> Vec<PartialUpdateRequest> {
    let mut merged: Vec<PartialUpdateRequest> = Vec::with_capacity(requests.len());
    let mut positions: HashMap<(ItemId, String), usize> = HashMap::new();
    for request in requests {
        let key = (request.logical_id.clone(), request.locale.clone());
        match positions.get(&key) {
            Some(&pos) => merged[pos].field_values.extend(request.field_values),
            None => {
                positions.insert(key, merged.len());
                merged.push(request);
            }
        }
    }
    merged
}
