//! Whole-index record maintenance: copies, reversed duplicates and
//! attribute conversions.

use tracing::{debug, info};

use reindex_search::{browse_all, BrowseFilter, SearchIndex};
use reindex_types::{DocumentId, FieldValue, IndexDocument, ReindexError};

use crate::executor::{ChunkedBatchExecutor, ProgressCallback};

/// Records per save call when copying an index.
pub const COPY_CHUNK_SIZE: usize = 500;

/// Result of a browse-and-save pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    /// Records read from the source index
    pub total: usize,
    /// Records that needed writing
    pub selected: usize,
    /// Records written successfully
    pub written: usize,
    pub failed: Vec<DocumentId>,
    pub errors: Vec<String>,
}

impl TransformReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turn a text value into a one-element list. Returns whether it changed.
pub fn to_multi_value(doc: &mut IndexDocument, attribute: &str) -> bool {
    let Some(FieldValue::Text(text)) = doc.fields.get(attribute) else {
        return false;
    };
    let list = FieldValue::List(vec![text.clone()]);
    doc.fields.insert(attribute.to_string(), list);
    true
}

/// Remove the given attributes. Returns how many were present.
pub fn strip_attributes(doc: &mut IndexDocument, keys: &[String]) -> usize {
    keys.iter()
        .filter(|key| doc.fields.remove(key.as_str()).is_some())
        .count()
}

/// Mirror image of a two-sided record: the value of each `(a, b)` pair is
/// swapped and the copy gets the `-reverse` identifier suffix.
///
/// Returns `None` when any pair attribute is missing or empty.
pub fn reversed(doc: &IndexDocument, pairs: &[(String, String)]) -> Option<IndexDocument> {
    let mut reverse = IndexDocument::new(
        DocumentId::new(format!("{}-reverse", doc.object_id)),
        doc.fields.clone(),
    );
    for (a, b) in pairs {
        let left = doc.fields.get(a).filter(|v| !v.is_empty())?;
        let right = doc.fields.get(b).filter(|v| !v.is_empty())?;
        reverse.fields.insert(a.clone(), right.clone());
        reverse.fields.insert(b.clone(), left.clone());
    }
    Some(reverse)
}

/// Browses one index and writes records back in chunks.
pub struct RecordTransformer<'a> {
    index: &'a dyn SearchIndex,
    executor: ChunkedBatchExecutor,
}

impl<'a> RecordTransformer<'a> {
    pub fn new(index: &'a dyn SearchIndex, executor: ChunkedBatchExecutor) -> Self {
        Self { index, executor }
    }

    /// Save every record of `from` into `to`.
    pub async fn copy_index<P>(
        &self,
        from: &str,
        to: &str,
        progress: &P,
    ) -> Result<TransformReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        self.copy_index_without(from, to, &[], progress).await
    }

    /// Save every record of `from` into `to` with `remove_keys` stripped.
    pub async fn copy_index_without<P>(
        &self,
        from: &str,
        to: &str,
        remove_keys: &[String],
        progress: &P,
    ) -> Result<TransformReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        check_distinct(from, to)?;
        let mut records = browse_all(self.index, from, &BrowseFilter::all()).await?;
        let total = records.len();
        for doc in &mut records {
            strip_attributes(doc, remove_keys);
        }
        let mut report = self.write(to, records, progress).await;
        report.total = total;

        info!(from = %from, to = %to, "Copied {}/{} records", report.written, report.total);
        Ok(report)
    }

    /// Copy the records of `from` matching `filter` into `to`, each followed
    /// by its [`reversed`] twin. Records lacking a pair attribute are skipped.
    pub async fn duplicate_reversed<P>(
        &self,
        from: &str,
        to: &str,
        pairs: &[(String, String)],
        remove_keys: &[String],
        filter: Option<&str>,
        progress: &P,
    ) -> Result<TransformReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        check_distinct(from, to)?;
        if pairs.is_empty() {
            return Err(ReindexError::InvalidInput(
                "no attribute pairs to swap".to_string(),
            ));
        }
        let browse = match filter {
            Some(expr) => BrowseFilter::all().with_filters(expr),
            None => BrowseFilter::all(),
        };
        let records = browse_all(self.index, from, &browse).await?;
        let total = records.len();
        let mut output = Vec::with_capacity(total * 2);
        for mut doc in records {
            strip_attributes(&mut doc, remove_keys);
            let Some(reverse) = reversed(&doc, pairs) else {
                debug!(id = %doc.object_id, "Skipping record without both sides");
                continue;
            };
            output.push(doc);
            output.push(reverse);
        }

        let mut report = self.write(to, output, progress).await;
        report.total = total;

        info!(
            from = %from,
            to = %to,
            duplicated = report.selected / 2,
            "Copied {}/{} records",
            report.written,
            report.selected
        );
        Ok(report)
    }

    /// Convert a text attribute to a single-element list on every record
    /// where it is text. Records already holding a list are left alone.
    pub async fn convert_to_multi_value<P>(
        &self,
        index_name: &str,
        attribute: &str,
        progress: &P,
    ) -> Result<TransformReport, ReindexError>
    where
        P: ProgressCallback + ?Sized,
    {
        if attribute.trim().is_empty() {
            return Err(ReindexError::InvalidInput(
                "attribute name is empty".to_string(),
            ));
        }
        let records = browse_all(self.index, index_name, &BrowseFilter::all()).await?;
        let total = records.len();
        let changed: Vec<IndexDocument> = records
            .into_iter()
            .filter_map(|mut doc| to_multi_value(&mut doc, attribute).then_some(doc))
            .collect();

        let mut report = self.write(index_name, changed, progress).await;
        report.total = total;

        info!(
            index = %index_name,
            attribute = %attribute,
            converted = report.written,
            total = report.total,
            "Multi-value conversion complete"
        );
        Ok(report)
    }

    async fn write<P>(
        &self,
        index_name: &str,
        records: Vec<IndexDocument>,
        progress: &P,
    ) -> TransformReport
    where
        P: ProgressCallback + ?Sized,
    {
        let selected = records.len();
        let index = self.index;
        let run = self
            .executor
            .run(
                records,
                |chunk: Vec<IndexDocument>| async move {
                    index.save_documents(index_name, &chunk).await?;
                    Ok::<(), ReindexError>(())
                },
                progress,
            )
            .await;

        TransformReport {
            total: selected,
            selected,
            written: run.succeeded_count(),
            failed: run.failed_items.into_iter().map(|d| d.object_id).collect(),
            errors: run.chunks.into_iter().filter_map(|c| c.error).collect(),
        }
    }
}

fn check_distinct(from: &str, to: &str) -> Result<(), ReindexError> {
    if from == to {
        return Err(ReindexError::InvalidInput(format!(
            "source and target index are both {}",
            from
        )));
    }
    Ok(())
}
