//! Search Reindex
//!
//! Keeps a locale-split search index in sync with the content repository.
//!
//! # Usage
//!
//! ```bash
//! reindex ids 12,40,41
//! reindex type product [--limit N] [--offset N] [--chunk-size N]
//! reindex all [--dry-run]
//! reindex partial --types product --fields price,stock
//! reindex diff --types product --locale en
//! reindex export-settings --locales en,de
//! reindex migrate-ids --locale en
//! reindex migrate-rules --locale en
//! reindex copy-index --from products_en --to products_en_backup
//! reindex copy-index --from prod --to test --remove-keys _highlightResult
//! reindex duplicate-reversed --from prod --to test --pairs c1_gender:c2_gender,c1_series:c2_series
//! reindex multi-value --index products_en --attribute tags
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/search-reindex/config.toml)
//! 3. Environment variables (REINDEX_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use reindex_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
