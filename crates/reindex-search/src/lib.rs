//! Search index service access for the reindexing pipeline.
//!
//! ## Key Components
//!
//! - [`SearchIndex`]: async port over browse/save/partial/delete/settings/rules
//! - [`AlgoliaClient`]: HTTP implementation with retry and backoff
//! - [`InMemorySearchIndex`]: in-process implementation for tests and dry runs
//! - [`export_settings`]: settings export with sorted keys
//!
//! Each logical index is split physically by locale; callers pass the
//! physical index name (see `IndexNaming` in `reindex-pipeline`).

mod algolia;
mod error;
mod memory;
mod service;
mod settings_export;

pub use algolia::{AlgoliaClient, AlgoliaConfig};
pub use error::SearchError;
pub use memory::{InMemorySearchIndex, IndexCall};
pub use service::{browse_all, BrowseFilter, BrowsePage, QueryRule, SearchIndex};
pub use settings_export::{export_settings, normalize_settings, STRIPPED_SETTINGS_KEYS};
