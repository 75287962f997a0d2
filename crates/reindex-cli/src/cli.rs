//! CLI argument parsing for the reindex tool.
//!
//! CLI flags override every other config source.

use clap::{Args, Parser, Subcommand};

/// Search Reindex
///
/// Keeps a locale-split search index in sync with the content repository.
#[derive(Parser, Debug)]
#[command(name = "reindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/search-reindex/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the number of items per index call
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Print what would be written without calling the index
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Reindex commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reindex items by id
    Ids {
        /// Comma-separated item ids, e.g. 12,40,41
        ids: String,
    },

    /// Reindex every item of one type
    Type {
        /// Content type (bundle)
        bundle: String,

        /// Stop after this many items
        #[arg(long)]
        limit: Option<usize>,

        /// Skip this many items first
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Reindex every item of every type
    All,

    /// Update allow-listed fields without a full reindex
    Partial {
        /// Comma-separated content types
        #[arg(long, value_delimiter = ',', required = true)]
        types: Vec<String>,

        /// Comma-separated fields (default: the configured allow-list)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Compare index content with the repository
    Diff {
        /// Comma-separated content types
        #[arg(long, value_delimiter = ',', required = true)]
        types: Vec<String>,

        /// Locale to compare
        #[arg(long, default_value = "en")]
        locale: String,

        /// Physical index name (default: derived from locale)
        #[arg(long)]
        index: Option<String>,
    },

    /// Write index settings to JSON files
    ExportSettings {
        /// Comma-separated locales to export
        #[arg(long, value_delimiter = ',', default_value = "en")]
        locales: Vec<String>,

        /// Output directory (default from config)
        #[arg(long)]
        out: Option<String>,
    },

    /// Move legacy document identifiers to the current format
    MigrateIds {
        #[command(flatten)]
        target: IndexTarget,
    },

    /// Rewrite legacy identifiers inside query rules
    MigrateRules {
        #[command(flatten)]
        target: IndexTarget,
    },

    /// Copy every record of one index into another
    CopyIndex {
        /// Source index
        #[arg(long)]
        from: String,

        /// Target index
        #[arg(long)]
        to: String,

        /// Attributes to drop from every copied record
        #[arg(long, value_delimiter = ',')]
        remove_keys: Vec<String>,
    },

    /// Copy matching records and add a `-reverse` twin with paired
    /// attributes swapped
    DuplicateReversed {
        /// Source index
        #[arg(long)]
        from: String,

        /// Target index
        #[arg(long)]
        to: String,

        /// Attribute pairs to swap, as `left:right`
        #[arg(long, value_delimiter = ',', required = true)]
        pairs: Vec<String>,

        /// Attributes to drop from every written record
        #[arg(long, value_delimiter = ',')]
        remove_keys: Vec<String>,

        /// Browse filter selecting the records to duplicate
        #[arg(long)]
        filter: Option<String>,
    },

    /// Convert a text attribute to a list on every record
    MultiValue {
        /// Physical index name
        #[arg(long)]
        index: String,

        /// Attribute to convert
        #[arg(long)]
        attribute: String,
    },
}

/// A physical index chosen by locale or by name.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    /// Locale whose index to use
    #[arg(long, default_value = "en")]
    pub locale: String,

    /// Physical index name (overrides --locale)
    #[arg(long)]
    pub index: Option<String>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_ids() {
        let cli = Cli::parse_from(["reindex", "ids", "12,40"]);
        match cli.command {
            Commands::Ids { ids } => assert_eq!(ids, "12,40"),
            _ => panic!("Expected Ids command"),
        }
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_type_with_paging() {
        let cli = Cli::parse_from([
            "reindex", "type", "product", "--limit", "100", "--offset", "200",
        ]);
        match cli.command {
            Commands::Type {
                bundle,
                limit,
                offset,
            } => {
                assert_eq!(bundle, "product");
                assert_eq!(limit, Some(100));
                assert_eq!(offset, 200);
            }
            _ => panic!("Expected Type command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["reindex", "all", "--dry-run", "--chunk-size", "25"]);
        assert!(matches!(cli.command, Commands::All));
        assert!(cli.dry_run);
        assert_eq!(cli.chunk_size, Some(25));
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["reindex", "--config", "/path/to/config.toml", "all"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
    }

    #[test]
    fn test_cli_partial_lists() {
        let cli = Cli::parse_from([
            "reindex",
            "partial",
            "--types",
            "product,accessory",
            "--fields",
            "price,stock",
        ]);
        match cli.command {
            Commands::Partial { types, fields } => {
                assert_eq!(types, vec!["product", "accessory"]);
                assert_eq!(fields, vec!["price", "stock"]);
            }
            _ => panic!("Expected Partial command"),
        }
    }

    #[test]
    fn test_cli_partial_requires_types() {
        assert!(Cli::try_parse_from(["reindex", "partial"]).is_err());
    }

    #[test]
    fn test_cli_diff_defaults() {
        let cli = Cli::parse_from(["reindex", "diff", "--types", "product"]);
        match cli.command {
            Commands::Diff {
                types,
                locale,
                index,
            } => {
                assert_eq!(types, vec!["product"]);
                assert_eq!(locale, "en");
                assert!(index.is_none());
            }
            _ => panic!("Expected Diff command"),
        }
    }

    #[test]
    fn test_cli_migrate_ids_target() {
        let cli = Cli::parse_from(["reindex", "migrate-ids", "--locale", "fr"]);
        match cli.command {
            Commands::MigrateIds { target } => {
                assert_eq!(target.locale, "fr");
                assert!(target.index.is_none());
            }
            _ => panic!("Expected MigrateIds command"),
        }
    }

    #[test]
    fn test_cli_copy_index() {
        let cli = Cli::parse_from([
            "reindex",
            "copy-index",
            "--from",
            "products_en",
            "--to",
            "products_en_backup",
        ]);
        match cli.command {
            Commands::CopyIndex {
                from,
                to,
                remove_keys,
            } => {
                assert_eq!(from, "products_en");
                assert_eq!(to, "products_en_backup");
                assert!(remove_keys.is_empty());
            }
            _ => panic!("Expected CopyIndex command"),
        }
    }

    #[test]
    fn test_cli_copy_index_remove_keys() {
        let cli = Cli::parse_from([
            "reindex",
            "copy-index",
            "--from",
            "prod",
            "--to",
            "test",
            "--remove-keys",
            "_highlightResult,price",
        ]);
        match cli.command {
            Commands::CopyIndex { remove_keys, .. } => {
                assert_eq!(remove_keys, vec!["_highlightResult", "price"]);
            }
            _ => panic!("Expected CopyIndex command"),
        }
    }

    #[test]
    fn test_cli_duplicate_reversed() {
        let cli = Cli::parse_from([
            "reindex",
            "duplicate-reversed",
            "--from",
            "prod",
            "--to",
            "test",
            "--pairs",
            "c1_gender:c2_gender,c1_series:c2_series",
            "--filter",
            "category:\"RF Adapters\"",
        ]);
        match cli.command {
            Commands::DuplicateReversed {
                from,
                to,
                pairs,
                remove_keys,
                filter,
            } => {
                assert_eq!(from, "prod");
                assert_eq!(to, "test");
                assert_eq!(pairs, vec!["c1_gender:c2_gender", "c1_series:c2_series"]);
                assert!(remove_keys.is_empty());
                assert_eq!(filter.as_deref(), Some("category:\"RF Adapters\""));
            }
            _ => panic!("Expected DuplicateReversed command"),
        }
    }

    #[test]
    fn test_cli_duplicate_reversed_requires_pairs() {
        let result = Cli::try_parse_from(["reindex", "duplicate-reversed", "--from", "a", "--to", "b"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_export_settings_locales() {
        let cli = Cli::parse_from(["reindex", "export-settings", "--locales", "en,de"]);
        match cli.command {
            Commands::ExportSettings { locales, out } => {
                assert_eq!(locales, vec!["en", "de"]);
                assert!(out.is_none());
            }
            _ => panic!("Expected ExportSettings command"),
        }
    }
}
