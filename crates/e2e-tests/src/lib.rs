//! End-to-end test infrastructure for search-reindex.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering planning, chunked application and index maintenance.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use reindex_pipeline::{
    BatchProgress, InMemoryContentRepository, ProgressCallback, SyncContext,
};
use reindex_search::{InMemorySearchIndex, SearchIndex};
use reindex_types::{FieldMap, FieldValue, ItemId, LogicalItem, Settings};

/// Shared test harness for E2E tests.
///
/// Holds an in-memory index and a content export written to a temp dir, so
/// the repository goes through the same JSON loading path as the CLI.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Path of the content export
    pub content_path: PathBuf,
    /// Index shared with every context built from this harness
    pub index: Arc<InMemorySearchIndex>,
    pub settings: Settings,
}

impl TestHarness {
    /// Create a harness for `items` with the default settings.
    pub fn new(items: &[LogicalItem]) -> Self {
        Self::with_settings(items, test_settings())
    }

    pub fn with_settings(items: &[LogicalItem], settings: Settings) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let content_path = temp_dir.path().join("content.json");
        let export = serde_json::json!({
            "items": items,
            "partial_fields": settings.partial_fields,
        });
        std::fs::write(
            &content_path,
            serde_json::to_vec_pretty(&export).expect("Failed to serialize content"),
        )
        .expect("Failed to write content export");

        Self {
            _temp_dir: temp_dir,
            content_path,
            index: Arc::new(InMemorySearchIndex::new()),
            settings,
        }
    }

    /// Build a fresh sync context over the harness index and content.
    pub fn context(&self) -> SyncContext {
        let repository = InMemoryContentRepository::from_json_file(&self.content_path)
            .expect("Failed to load content export")
            .with_partial_fields(&self.settings.partial_fields);
        SyncContext::from_settings(
            &self.settings,
            self.index.clone() as Arc<dyn SearchIndex>,
            Arc::new(repository),
        )
        .expect("Failed to build sync context")
    }

    /// Physical index name for a locale.
    pub fn index_name(&self, locale: &str) -> String {
        format!(
            "{}_{}",
            self.settings.index_name.as_deref().unwrap_or_default(),
            locale
        )
    }
}

/// Settings used by every scenario: index `products`, `widget` bundle with
/// `title` and `summary` allow-listed for partial updates.
pub fn test_settings() -> Settings {
    let mut partial_fields = BTreeMap::new();
    partial_fields.insert(
        "widget".to_string(),
        vec!["title".to_string(), "summary".to_string()],
    );
    Settings {
        app_id: Some("TESTAPP".to_string()),
        api_key: Some("test-key".to_string()),
        index_name: Some("products".to_string()),
        partial_fields,
        ..Default::default()
    }
}

/// A widget item with title, summary and body in the given locales.
pub fn widget(id: usize, locales: &[&str], body: &str) -> LogicalItem {
    let mut item = LogicalItem::new(
        ItemId::parse(&id.to_string()).expect("Invalid test id"),
        "widget",
    );
    for locale in locales {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), FieldValue::from(format!("Widget {} ({})", id, locale)));
        fields.insert("summary".into(), "Signal adapter".into());
        fields.insert("body".into(), body.into());
        item = item.with_translation(*locale, fields);
    }
    item
}

/// `count` single-locale widgets with ids 1..=count.
pub fn widgets(count: usize) -> Vec<LogicalItem> {
    (1..=count).map(|id| widget(id, &["en"], "Short body")).collect()
}

/// Progress callback that records every report.
#[derive(Default)]
pub struct RecordingProgress {
    reports: Mutex<Vec<BatchProgress>>,
}

impl RecordingProgress {
    pub fn reports(&self) -> Vec<BatchProgress> {
        self.reports
            .lock()
            .expect("progress lock poisoned")
            .clone()
    }
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, progress: &BatchProgress) {
        self.reports
            .lock()
            .expect("progress lock poisoned")
            .push(*progress);
    }
}
