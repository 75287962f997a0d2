//! Configuration loading for search-reindex.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/search-reindex/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ReindexError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Search service application id
    #[serde(default)]
    pub app_id: Option<String>,

    /// Search service admin API key (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override for the service base URL (defaults to the hosted endpoint for app_id)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Base index name; the physical index for a locale is `{index_name}_{locale}`
    #[serde(default)]
    pub index_name: Option<String>,

    /// Entity type used in document identifiers
    #[serde(default = "default_entity_type")]
    pub entity_type: String,

    /// Items per index call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upper bound on documents per item and locale (main + numbered parts)
    #[serde(default = "default_max_split")]
    pub max_split: usize,

    /// Maximum bytes of split-field text per document
    #[serde(default = "default_max_slice_bytes")]
    pub max_slice_bytes: usize,

    /// Field whose text is divided across split documents
    #[serde(default = "default_split_field")]
    pub split_field: String,

    /// Field holding attachment text, indexed under the reserved pdf slot
    #[serde(default = "default_pdf_field")]
    pub pdf_field: Option<String>,

    /// Fields that may be partially updated, per bundle
    #[serde(default)]
    pub partial_fields: BTreeMap<String, Vec<String>>,

    /// JSON export of the content repository
    #[serde(default = "default_content_path")]
    pub content_path: String,

    /// Directory for exported index settings
    #[serde(default = "default_settings_export_dir")]
    pub settings_export_dir: String,

    /// Request timeout for index calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per index call before the chunk is reported as failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_entity_type() -> String {
    "node".to_string()
}

fn default_chunk_size() -> usize {
    50
}

fn default_max_split() -> usize {
    6
}

fn default_max_slice_bytes() -> usize {
    10_000
}

fn default_split_field() -> String {
    "body".to_string()
}

fn default_pdf_field() -> Option<String> {
    Some("attachment_text".to_string())
}

fn default_content_path() -> String {
    ProjectDirs::from("", "", "search-reindex")
        .map(|p| p.data_local_dir().join("content.json"))
        .unwrap_or_else(|| PathBuf::from("./content.json"))
        .to_string_lossy()
        .to_string()
}

fn default_settings_export_dir() -> String {
    "./index-settings".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_id: None,
            api_key: None,
            base_url: None,
            index_name: None,
            entity_type: default_entity_type(),
            chunk_size: default_chunk_size(),
            max_split: default_max_split(),
            max_slice_bytes: default_max_slice_bytes(),
            split_field: default_split_field(),
            pdf_field: default_pdf_field(),
            partial_fields: BTreeMap::new(),
            content_path: default_content_path(),
            settings_export_dir: default_settings_export_dir(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/search-reindex/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (REINDEX_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ReindexError> {
        let config_dir = ProjectDirs::from("", "", "search-reindex")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("entity_type", default_entity_type())
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .set_default("chunk_size", default_chunk_size() as i64)
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .set_default("max_split", default_max_split() as i64)
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .set_default("max_slice_bytes", default_max_slice_bytes() as i64)
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .set_default("split_field", default_split_field())
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .set_default("content_path", default_content_path())
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| ReindexError::Configuration(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: REINDEX_APP_ID, REINDEX_API_KEY, REINDEX_INDEX_NAME, etc.
        // The double underscore separator keeps snake_case keys intact.
        builder = builder.add_source(
            Environment::with_prefix("REINDEX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ReindexError::Configuration(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ReindexError::Configuration(e.to_string()))
    }

    /// Check everything an index-touching command needs.
    ///
    /// Runs before the first index call; a failure aborts the run.
    pub fn validate(&self) -> Result<(), ReindexError> {
        if self.app_id.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(ReindexError::Configuration("app_id is not set".to_string()));
        }
        if self.api_key.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(ReindexError::Configuration("api_key is not set".to_string()));
        }
        if self.index_name.as_deref().is_none_or(|s| s.trim().is_empty()) {
            return Err(ReindexError::Configuration(
                "index_name is not set".to_string(),
            ));
        }
        self.validate_limits()
    }

    /// Check the limits used by planning, which needs no credentials.
    pub fn validate_limits(&self) -> Result<(), ReindexError> {
        if self.chunk_size == 0 {
            return Err(ReindexError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if self.max_split == 0 {
            return Err(ReindexError::Configuration(
                "max_split must be > 0".to_string(),
            ));
        }
        if self.max_slice_bytes == 0 {
            return Err(ReindexError::Configuration(
                "max_slice_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Allow-listed partial update fields for a bundle.
    pub fn partial_fields_for(&self, bundle: &str) -> Vec<String> {
        self.partial_fields.get(bundle).cloned().unwrap_or_default()
    }

    /// Expand ~ in content_path to the home directory
    pub fn expanded_content_path(&self) -> PathBuf {
        if let Some(rest) = self.content_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.content_path)
    }
}
