//! Export of index settings for versioning outside the pipeline.
//!
//! Files are JSON with keys sorted at every level. `version` and `replicas`
//! are removed because they change between environments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use reindex_types::ReindexError;

use crate::service::SearchIndex;

/// Top-level keys stripped before writing.
pub const STRIPPED_SETTINGS_KEYS: [&str; 2] = ["version", "replicas"];

/// Value with object keys held in sorted order.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum Sorted {
    Object(BTreeMap<String, Sorted>),
    Array(Vec<Sorted>),
    Scalar(Value),
}

fn sorted(value: Value) -> Sorted {
    match value {
        Value::Object(map) => Sorted::Object(map.into_iter().map(|(k, v)| (k, sorted(v))).collect()),
        Value::Array(items) => Sorted::Array(items.into_iter().map(sorted).collect()),
        scalar => Sorted::Scalar(scalar),
    }
}

/// Remove environment-specific keys and render with sorted keys.
pub fn normalize_settings(mut settings: Value) -> Result<String, ReindexError> {
    if let Value::Object(map) = &mut settings {
        for key in STRIPPED_SETTINGS_KEYS {
            map.remove(key);
        }
    }
    let mut rendered = serde_json::to_string_pretty(&sorted(settings))?;
    rendered.push('\n');
    Ok(rendered)
}

/// Fetch settings for `index` and write them to `{dir}/{index}.json`.
pub async fn export_settings<S: SearchIndex + ?Sized>(
    service: &S,
    index: &str,
    dir: &Path,
) -> Result<PathBuf, ReindexError> {
    let settings = service.get_settings(index).await?;
    let rendered = normalize_settings(settings)?;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", index));
    std::fs::write(&path, rendered)?;

    info!(index = %index, path = %path.display(), "Exported index settings");
    Ok(path)
}
