//! Command implementations for the reindex tool.
//!
//! Every command loads settings, validates them before the first index
//! call, and prints a summary. Whole-command failures surface as errors and
//! exit non-zero; chunk failures inside a run only show up in the summary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use reindex_pipeline::{
    ChunkedBatchExecutor, ContentRepository, DiffReporter, IdMigrator, IdentifierCodec,
    InMemoryContentRepository, LoggingProgressCallback, RecordTransformer, ReindexDriver,
    ReindexPlan, Selection, SyncContext, COPY_CHUNK_SIZE,
};
use reindex_search::{export_settings, AlgoliaClient, AlgoliaConfig, InMemorySearchIndex, SearchIndex};
use reindex_types::{ItemId, Settings};

use crate::cli::{Cli, Commands, IndexTarget};

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
    if let Some(chunk_size) = cli.chunk_size {
        settings.chunk_size = chunk_size;
    }
    Ok(settings)
}

/// Open the hosted index. Fails on incomplete configuration.
fn connect(settings: &Settings) -> Result<Arc<dyn SearchIndex>> {
    settings.validate().context("Invalid configuration")?;
    let config = AlgoliaConfig::from_settings(settings).context("Invalid index configuration")?;
    let client = AlgoliaClient::new(config).context("Failed to create index client")?;
    Ok(Arc::new(client))
}

fn open_repository(settings: &Settings) -> Result<Arc<dyn ContentRepository>> {
    let path = settings.expanded_content_path();
    info!("Loading content from {:?}", path);
    let repository = InMemoryContentRepository::from_json_file(&path)
        .with_context(|| format!("Failed to load content from {}", path.display()))?
        .with_partial_fields(&settings.partial_fields);
    Ok(Arc::new(repository))
}

/// A dry run plans against an in-memory index and needs no credentials.
fn build_context(settings: &Settings, dry_run: bool) -> Result<SyncContext> {
    let index: Arc<dyn SearchIndex> = if dry_run {
        Arc::new(InMemorySearchIndex::new())
    } else {
        connect(settings)?
    };
    let repository = open_repository(settings)?;
    SyncContext::from_settings(settings, index, repository).context("Invalid configuration")
}

fn physical_index(settings: &Settings, target: &IndexTarget) -> Result<String> {
    if let Some(index) = &target.index {
        return Ok(index.clone());
    }
    let base = settings
        .index_name
        .as_deref()
        .context("index_name is not set and no --index was given")?;
    Ok(format!("{}_{}", base, target.locale))
}

/// Run the parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Ids { ids } => {
            let ids = ItemId::parse_list(&ids).context("Invalid item ids")?;
            handle_reindex(&settings, Selection::Ids(ids), cli.dry_run).await
        }
        Commands::Type {
            bundle,
            limit,
            offset,
        } => {
            let selection = Selection::Type {
                bundle,
                limit,
                offset,
            };
            handle_reindex(&settings, selection, cli.dry_run).await
        }
        Commands::All => handle_reindex(&settings, Selection::All, cli.dry_run).await,
        Commands::Partial { types, fields } => {
            handle_partial(&settings, &types, &fields, cli.dry_run).await
        }
        Commands::Diff {
            types,
            locale,
            index,
        } => handle_diff(&settings, &types, &locale, index.as_deref()).await,
        Commands::ExportSettings { locales, out } => {
            reject_dry_run(cli.dry_run, "export-settings")?;
            handle_export_settings(&settings, &locales, out).await
        }
        Commands::MigrateIds { target } => {
            reject_dry_run(cli.dry_run, "migrate-ids")?;
            handle_migrate_ids(&settings, &target).await
        }
        Commands::MigrateRules { target } => {
            reject_dry_run(cli.dry_run, "migrate-rules")?;
            handle_migrate_rules(&settings, &target).await
        }
        Commands::CopyIndex {
            from,
            to,
            remove_keys,
        } => {
            reject_dry_run(cli.dry_run, "copy-index")?;
            let chunk_size = cli.chunk_size.unwrap_or(COPY_CHUNK_SIZE);
            handle_copy_index(&settings, &from, &to, &remove_keys, chunk_size).await
        }
        Commands::DuplicateReversed {
            from,
            to,
            pairs,
            remove_keys,
            filter,
        } => {
            reject_dry_run(cli.dry_run, "duplicate-reversed")?;
            let pairs = parse_pairs(&pairs)?;
            let chunk_size = cli.chunk_size.unwrap_or(COPY_CHUNK_SIZE);
            handle_duplicate_reversed(
                &settings,
                &from,
                &to,
                &pairs,
                &remove_keys,
                filter.as_deref(),
                chunk_size,
            )
            .await
        }
        Commands::MultiValue { index, attribute } => {
            reject_dry_run(cli.dry_run, "multi-value")?;
            handle_multi_value(&settings, &index, &attribute).await
        }
    }
}

/// Parse `left:right` attribute pairs.
fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| match pair.split_once(':') {
            Some((left, right)) if !left.trim().is_empty() && !right.trim().is_empty() => {
                Ok((left.trim().to_string(), right.trim().to_string()))
            }
            _ => bail!("invalid attribute pair '{}', expected left:right", pair),
        })
        .collect()
}

fn reject_dry_run(dry_run: bool, command: &str) -> Result<()> {
    if dry_run {
        bail!("--dry-run is not supported by {}", command);
    }
    Ok(())
}

/// Render a plan for `--dry-run`.
pub fn describe_plan(plan: &ReindexPlan) -> String {
    let mut lines = Vec::new();
    for locale in plan.locales() {
        let entries = plan.entries(locale);
        let deletes: usize = entries.iter().map(|e| e.deletions.len()).sum();
        let upserts: usize = entries.iter().map(|e| e.upserts.len()).sum();
        let hidden = entries.iter().filter(|e| !e.searchable).count();
        lines.push(format!(
            "{}: {} items, {} identifiers to delete, {} documents to save, {} not searchable",
            locale,
            entries.len(),
            deletes,
            upserts,
            hidden
        ));
    }
    if !plan.truncated_items().is_empty() {
        let ids: Vec<&str> = plan.truncated_items().iter().map(ItemId::as_str).collect();
        lines.push(format!(
            "truncated: {} ({} slices dropped)",
            ids.join(","),
            plan.dropped_slices()
        ));
    }
    if lines.is_empty() {
        lines.push("nothing to do".to_string());
    }
    lines.join("\n")
}

async fn handle_reindex(settings: &Settings, selection: Selection, dry_run: bool) -> Result<()> {
    let ctx = build_context(settings, dry_run)?;
    let driver = ReindexDriver::new(&ctx);

    if dry_run {
        let plan = driver.plan(&selection).await.context("Failed to plan reindex")?;
        println!("{}", describe_plan(&plan));
        return Ok(());
    }

    let report = driver
        .run(&selection, &LoggingProgressCallback::new("Reindexed"))
        .await
        .context("Reindex failed")?;
    println!("{}", report.summary());
    Ok(())
}

async fn handle_partial(
    settings: &Settings,
    types: &[String],
    fields: &[String],
    dry_run: bool,
) -> Result<()> {
    let ctx = build_context(settings, dry_run)?;
    let driver = ReindexDriver::new(&ctx);

    let mut requests = Vec::new();
    if fields.is_empty() {
        for bundle in types {
            let allowed = settings.partial_fields_for(bundle);
            if allowed.is_empty() {
                bail!("No partial update fields configured for type {}", bundle);
            }
            requests.extend(
                driver
                    .partial_requests(std::slice::from_ref(bundle), &allowed)
                    .await
                    .context("Failed to build partial update requests")?,
            );
        }
    } else {
        requests = driver
            .partial_requests(types, fields)
            .await
            .context("Failed to build partial update requests")?;
    }

    if dry_run {
        println!("{} partial update requests", requests.len());
        return Ok(());
    }

    let report = driver
        .partial_update(requests, &LoggingProgressCallback::new("Partially updated"))
        .await
        .context("Partial update failed")?;
    println!("{}", report.summary());
    Ok(())
}

async fn handle_diff(
    settings: &Settings,
    types: &[String],
    locale: &str,
    index: Option<&str>,
) -> Result<()> {
    let ctx = build_context(settings, false)?;
    let report = DiffReporter::new(&ctx)
        .run(types, locale, index)
        .await
        .context("Diff failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render diff")?
    );
    if !report.is_clean() {
        warn!(
            missing_from_index = report.missing_from_index.len(),
            missing_from_source = report.missing_from_source.len(),
            "Index and repository differ"
        );
    }
    Ok(())
}

async fn handle_export_settings(
    settings: &Settings,
    locales: &[String],
    out: Option<String>,
) -> Result<()> {
    let index = connect(settings)?;
    let dir = PathBuf::from(out.unwrap_or_else(|| settings.settings_export_dir.clone()));

    for locale in locales {
        let target = IndexTarget {
            locale: locale.clone(),
            index: None,
        };
        let name = physical_index(settings, &target)?;
        let path = export_settings(index.as_ref(), &name, &dir)
            .await
            .with_context(|| format!("Failed to export settings of {}", name))?;
        println!("{} -> {}", name, path.display());
    }
    Ok(())
}

async fn handle_migrate_ids(settings: &Settings, target: &IndexTarget) -> Result<()> {
    let index = connect(settings)?;
    let name = physical_index(settings, target)?;
    let codec = IdentifierCodec::from_settings(settings);
    let executor = ChunkedBatchExecutor::new(settings.chunk_size)?;

    let report = IdMigrator::new(index.as_ref(), &codec, executor)
        .migrate_documents(&name, &LoggingProgressCallback::new("Migrated"))
        .await
        .context("Identifier migration failed")?;

    println!(
        "{}: scanned {}, migrated {}, already current {}, unrecognized {}, failed {}",
        name,
        report.scanned,
        report.migrated,
        report.already_current,
        report.unrecognized.len(),
        report.failed.len()
    );
    for id in &report.failed {
        println!("failed: {}", id);
    }
    Ok(())
}

async fn handle_migrate_rules(settings: &Settings, target: &IndexTarget) -> Result<()> {
    let index = connect(settings)?;
    let name = physical_index(settings, target)?;
    let codec = IdentifierCodec::from_settings(settings);
    let executor = ChunkedBatchExecutor::new(settings.chunk_size)?;

    let report = IdMigrator::new(index.as_ref(), &codec, executor)
        .migrate_rules(&name, &LoggingProgressCallback::new("Saved rules"))
        .await
        .context("Rule migration failed")?;

    println!(
        "{}: scanned {} rules, rewrote {} identifiers in {} rules, failed {}",
        name,
        report.scanned,
        report.rewritten_ids,
        report.changed,
        report.failed.len()
    );
    for id in &report.failed {
        println!("failed: {}", id);
    }
    Ok(())
}

async fn handle_copy_index(
    settings: &Settings,
    from: &str,
    to: &str,
    remove_keys: &[String],
    chunk_size: usize,
) -> Result<()> {
    let index = connect(settings)?;
    let executor = ChunkedBatchExecutor::new(chunk_size)?;

    let report = RecordTransformer::new(index.as_ref(), executor)
        .copy_index_without(from, to, remove_keys, &LoggingProgressCallback::new("Copied"))
        .await
        .context("Index copy failed")?;

    println!("Copied {}/{} records", report.written, report.total);
    for error in &report.errors {
        println!("error: {}", error);
    }
    Ok(())
}

async fn handle_duplicate_reversed(
    settings: &Settings,
    from: &str,
    to: &str,
    pairs: &[(String, String)],
    remove_keys: &[String],
    filter: Option<&str>,
    chunk_size: usize,
) -> Result<()> {
    let index = connect(settings)?;
    let executor = ChunkedBatchExecutor::new(chunk_size)?;

    let report = RecordTransformer::new(index.as_ref(), executor)
        .duplicate_reversed(
            from,
            to,
            pairs,
            remove_keys,
            filter,
            &LoggingProgressCallback::new("Copied"),
        )
        .await
        .context("Duplication failed")?;

    println!(
        "Copied {}/{} records ({} browsed)",
        report.written, report.selected, report.total
    );
    for error in &report.errors {
        println!("error: {}", error);
    }
    Ok(())
}

async fn handle_multi_value(settings: &Settings, index_name: &str, attribute: &str) -> Result<()> {
    let index = connect(settings)?;
    let executor = ChunkedBatchExecutor::new(settings.chunk_size)?;

    let report = RecordTransformer::new(index.as_ref(), executor)
        .convert_to_multi_value(index_name, attribute, &LoggingProgressCallback::new("Converted"))
        .await
        .context("Multi-value conversion failed")?;

    println!(
        "{}: converted {}/{} records ({} total)",
        index_name, report.written, report.selected, report.total
    );
    for error in &report.errors {
        println!("error: {}", error);
    }
    Ok(())
}
