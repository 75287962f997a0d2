//! Migration of stored identifiers from the legacy to the current format.
//!
//! Documents are re-saved under their current identifier before the legacy
//! one is deleted, so a failed chunk never loses a record. Query rules that
//! embed legacy identifiers are rewritten in place.

use serde_json::Value;
use tracing::{debug, info, warn};

use reindex_search::{browse_all, BrowseFilter, QueryRule, SearchIndex};
use reindex_types::{DocumentId, IdFormat, IndexDocument, ReindexError};

use crate::codec::IdentifierCodec;
use crate::executor::{ChunkedBatchExecutor, ProgressCallback};

/// Result of a document identifier migration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub already_current: usize,
    /// Identifiers that decode in neither format
    pub unrecognized: Vec<DocumentId>,
    /// Legacy identifiers left in place after a failed chunk
    pub failed: Vec<DocumentId>,
    pub errors: Vec<String>,
}

/// Result of a rule rewrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleMigrationReport {
    pub scanned: usize,
    /// Rules with at least one rewritten identifier
    pub changed: usize,
    /// Identifiers rewritten across all rules
    pub rewritten_ids: usize,
    pub failed: Vec<String>,
    pub errors: Vec<String>,
}

/// Rewrite every string in `value` that is a legacy identifier.
///
/// Returns how many strings were replaced.
pub fn rewrite_legacy_ids(value: &mut Value, codec: &IdentifierCodec) -> usize {
    match value {
        Value::String(s) => match codec.decode(s) {
            Ok((IdFormat::Legacy, key)) => match codec.encode_key(&key) {
                Ok(current) => {
                    *s = current.as_str().to_string();
                    1
                }
                Err(_) => 0,
            },
            _ => 0,
        },
        Value::Array(items) => items.iter_mut().map(|v| rewrite_legacy_ids(v, codec)).sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|v| rewrite_legacy_ids(v, codec))
            .sum(),
        _ => 0,
    }
}

/// Moves documents and rules of one physical index to current identifiers.
pub struct IdMigrator<'a> {
    index: &'a dyn SearchIndex,
    codec: &'a IdentifierCodec,
    executor: ChunkedBatchExecutor,
}

impl<'a> IdMigrator<'a> {
    pub fn new(
        index: &'a dyn SearchIndex,
        codec: &'a IdentifierCodec,
        executor: ChunkedBatchExecutor,
    ) -> Self {
        Self {
            index,
            codec,
            executor,
        }
    }

    /// Re-save legacy documents under current identifiers, then delete the
    /// legacy ones.
    pub async fn migrate_documents<P>(
        &self,
        index_name: &str,
        progress: &P,
    ) -> Result<MigrationReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        let documents = browse_all(self.index, index_name, &BrowseFilter::all()).await?;
        let mut report = MigrationReport {
            scanned: documents.len(),
            ..Default::default()
        };

        let mut moves: Vec<(DocumentId, IndexDocument)> = Vec::new();
        for doc in documents {
            match self.codec.decode(doc.object_id.as_str()) {
                Ok((IdFormat::Current, _)) => report.already_current += 1,
                Ok((IdFormat::Legacy, key)) => {
                    let current = self.codec.encode_key(&key)?;
                    let legacy = doc.object_id.clone();
                    moves.push((legacy, IndexDocument::new(current, doc.fields)));
                }
                Err(e) => {
                    debug!(object_id = %doc.object_id, error = %e, "Unrecognized identifier");
                    report.unrecognized.push(doc.object_id);
                }
            }
        }

        info!(
            index = %index_name,
            scanned = report.scanned,
            legacy = moves.len(),
            "Migrating legacy identifiers"
        );

        let index = self.index;
        let run = self
            .executor
            .run(
                moves,
                |chunk: Vec<(DocumentId, IndexDocument)>| async move {
                    let (legacy, docs): (Vec<DocumentId>, Vec<IndexDocument>) =
                        chunk.into_iter().unzip();
                    index.save_documents(index_name, &docs).await?;
                    index.delete_documents(index_name, &legacy).await?;
                    Ok::<(), ReindexError>(())
                },
                progress,
            )
            .await;

        report.migrated = run.succeeded_count();
        report.failed = run.failed_items.into_iter().map(|(id, _)| id).collect();
        report.errors = run
            .chunks
            .iter()
            .filter_map(|c| c.error.clone())
            .collect();
        if !report.unrecognized.is_empty() {
            warn!(
                index = %index_name,
                count = report.unrecognized.len(),
                "Documents with unrecognized identifiers left untouched"
            );
        }
        Ok(report)
    }

    /// Rewrite legacy identifiers embedded in query rules. Only changed rules
    /// are saved.
    pub async fn migrate_rules<P>(
        &self,
        index_name: &str,
        progress: &P,
    ) -> Result<RuleMigrationReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        let rules = self.index.browse_rules(index_name).await?;
        let mut report = RuleMigrationReport {
            scanned: rules.len(),
            ..Default::default()
        };

        let mut changed: Vec<QueryRule> = Vec::new();
        for mut rule in rules {
            let mut body = Value::Object(std::mem::take(&mut rule.body));
            let count = rewrite_legacy_ids(&mut body, self.codec);
            if let Value::Object(map) = body {
                rule.body = map;
            }
            if count > 0 {
                debug!(rule = %rule.object_id, rewritten = count, "Rule rewritten");
                report.rewritten_ids += count;
                changed.push(rule);
            }
        }
        report.changed = changed.len();

        let index = self.index;
        let run = self
            .executor
            .run(
                changed,
                |chunk: Vec<QueryRule>| async move {
                    index.save_rules(index_name, &chunk).await?;
                    Ok::<(), ReindexError>(())
                },
                progress,
            )
            .await;

        report.failed = run.failed_items.into_iter().map(|r| r.object_id).collect();
        report.errors = run
            .chunks
            .iter()
            .filter_map(|c| c.error.clone())
            .collect();

        info!(
            index = %index_name,
            scanned = report.scanned,
            changed = report.changed,
            "Rule migration complete"
        );
        Ok(report)
    }
}
