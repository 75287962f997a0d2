//! Per-run context passed to every pipeline stage.
//!
//! Built once per run. Holds the index client, the cached repository and the
//! split and chunking configuration. Nothing in here is global.

use std::sync::Arc;

use reindex_search::SearchIndex;
use reindex_types::{ReindexError, Settings};

use crate::codec::IdentifierCodec;
use crate::executor::ChunkedBatchExecutor;
use crate::source::{CachedRepository, ContentRepository};
use crate::split::SplitStrategy;

/// Maps a base index name and a locale to the physical index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNaming {
    base: String,
}

impl IndexNaming {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// `{base}_{locale}`
    pub fn physical(&self, locale: &str) -> String {
        format!("{}_{}", self.base, locale)
    }

    /// Locale of a physical index created by this naming.
    pub fn locale_of<'a>(&self, index: &'a str) -> Option<&'a str> {
        index
            .strip_prefix(self.base.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|locale| !locale.is_empty())
    }
}

/// Everything a sync run needs, with a defined lifecycle.
pub struct SyncContext {
    index: Arc<dyn SearchIndex>,
    repository: CachedRepository,
    strategy: SplitStrategy,
    executor: ChunkedBatchExecutor,
    naming: IndexNaming,
}

impl SyncContext {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        repository: Arc<dyn ContentRepository>,
        strategy: SplitStrategy,
        executor: ChunkedBatchExecutor,
        naming: IndexNaming,
    ) -> Self {
        Self {
            index,
            repository: CachedRepository::new(repository),
            strategy,
            executor,
            naming,
        }
    }

    /// Build from settings. Only the limits are checked here, so planning
    /// works without credentials.
    pub fn from_settings(
        settings: &Settings,
        index: Arc<dyn SearchIndex>,
        repository: Arc<dyn ContentRepository>,
    ) -> Result<Self, ReindexError> {
        settings.validate_limits()?;
        let base = settings
            .index_name
            .clone()
            .ok_or_else(|| ReindexError::Configuration("index_name is not set".to_string()))?;
        Ok(Self::new(
            index,
            repository,
            SplitStrategy::from_settings(settings),
            ChunkedBatchExecutor::new(settings.chunk_size)?,
            IndexNaming::new(base),
        ))
    }

    pub fn index(&self) -> &dyn SearchIndex {
        self.index.as_ref()
    }

    pub fn repository(&self) -> &CachedRepository {
        &self.repository
    }

    pub fn strategy(&self) -> &SplitStrategy {
        &self.strategy
    }

    pub fn codec(&self) -> &IdentifierCodec {
        self.strategy.codec()
    }

    pub fn executor(&self) -> &ChunkedBatchExecutor {
        &self.executor
    }

    pub fn naming(&self) -> &IndexNaming {
        &self.naming
    }

    /// Drop items cached since the last clear. Called after every batch.
    pub fn clear_cache(&self) {
        self.repository.clear();
    }
}
