//! Reindex pipeline for split search documents.
//!
//! This crate turns logical content items into split index documents and
//! keeps a hosted search index in sync with them.
//!
//! ## Key Components
//!
//! - [`IdentifierCodec`]: Current and legacy document identifiers
//! - [`SplitStrategy`]: Slices one item into per-locale fragments
//! - [`ReindexPlanner`]: Deletions and upserts for a set of items
//! - [`PlanApplier`]: Writes a plan through the chunked executor
//! - [`PartialUpdatePipeline`]: Field-level updates with escalation
//! - [`ReindexDriver`]: Id, type and full reindex runs
//! - [`DiffReporter`]: Read-only index vs. repository audit
//! - [`IdMigrator`] / [`RecordTransformer`]: Index maintenance
//!
//! ## Architecture
//!
//! 1. A selection is resolved to item ids
//! 2. Ids are processed in chunks by [`ChunkedBatchExecutor`]
//! 3. Each chunk is loaded, planned and applied; every identifier an item
//!    could own is deleted before its fresh documents are saved
//! 4. The item cache is cleared between chunks
//!
//! ## Example
//!
//! ```ignore
//! use reindex_pipeline::{LoggingProgressCallback, ReindexDriver, SyncContext};
//!
//! let ctx = SyncContext::from_settings(&settings, index, repository)?;
//! let report = ReindexDriver::new(&ctx)
//!     .reindex_type("product", None, 0, &LoggingProgressCallback::new("Reindexed"))
//!     .await?;
//! println!("{}", report.summary());
//! ```

pub mod apply;
pub mod codec;
pub mod context;
pub mod diff;
pub mod driver;
pub mod executor;
pub mod migrate;
pub mod partial;
pub mod planner;
pub mod source;
pub mod split;
pub mod transform;

pub use apply::{ApplyReport, PlanApplier};
pub use codec::IdentifierCodec;
pub use context::{IndexNaming, SyncContext};
pub use diff::{diff, DiffEntry, DiffReport, DiffReporter};
pub use driver::{ReindexDriver, Selection, SyncReport};
pub use executor::{
    BatchProgress, ChunkOutcome, ChunkedBatchExecutor, ExecutionReport, LoggingProgressCallback,
    NoOpProgressCallback, ProgressCallback,
};
pub use migrate::{rewrite_legacy_ids, IdMigrator, MigrationReport, RuleMigrationReport};
pub use partial::{
    Escalation, PartialUpdateOutcome, PartialUpdatePipeline, PartialUpdateRequest, UpdateState,
};
pub use planner::{PlannedItem, ReindexPlan, ReindexPlanner};
pub use source::{CachedRepository, ContentRepository, InMemoryContentRepository};
pub use split::{slice_text, SplitPlan, SplitStrategy};
pub use transform::{RecordTransformer, TransformReport, COPY_CHUNK_SIZE};
