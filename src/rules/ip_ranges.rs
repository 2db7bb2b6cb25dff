//! IP range files referenced by rule conditions
//!
//! Two layouts are accepted:
//!
//! ```text
//! {"prefixes": [{"ip_prefix": "10.0.0.0/8", "name": "corp"}, ...]}
//! ["10.0.0.0/8", "192.168.0.0/16"]
//! ```

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait IpRangeReader: Send + Sync {
    /// Read the prefixes stored in `path`.
    ///
    /// `local_file` resolves the path against the caller's working directory
    /// instead of the rule catalog. With `ip_only` the bare prefix strings are
    /// returned, otherwise the full prefix objects.
    fn read_ip_ranges(&self, path: &str, local_file: bool, ip_only: bool) -> Result<Vec<Value>>;
}

impl<F> IpRangeReader for F
where
    F: Fn(&str, bool, bool) -> Result<Vec<Value>> + Send + Sync,
{
    fn read_ip_ranges(&self, path: &str, local_file: bool, ip_only: bool) -> Result<Vec<Value>> {
        self(path, local_file, ip_only)
    }
}

/// Reads IP range files from disk
#[derive(Debug, Clone)]
pub struct FsIpRangeReader {
    catalog_dir: PathBuf,
    working_dir: Option<PathBuf>,
}

impl FsIpRangeReader {
    pub fn new(catalog_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog_dir: catalog_dir.into(),
            working_dir: None,
        }
    }

    /// Resolve local files against `dir` instead of the process working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn resolve(&self, path: &str, local_file: bool) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        if local_file {
            match &self.working_dir {
                Some(dir) => dir.join(candidate),
                None => candidate.to_path_buf(),
            }
        } else {
            self.catalog_dir.join(candidate)
        }
    }
}

impl IpRangeReader for FsIpRangeReader {
    fn read_ip_ranges(&self, path: &str, local_file: bool, ip_only: bool) -> Result<Vec<Value>> {
        let resolved = self.resolve(path, local_file);
        debug!("Reading IP ranges from {}", resolved.display());

        let content = std::fs::read_to_string(&resolved)
            .with_context(|| format!("Failed to read {}", resolved.display()))?;
        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", resolved.display()))?;

        prefixes_from_document(&document, ip_only)
            .with_context(|| format!("Unexpected IP range layout in {}", resolved.display()))
    }
}

fn prefixes_from_document(document: &Value, ip_only: bool) -> Result<Vec<Value>> {
    let entries = match document {
        Value::Object(map) => match map.get("prefixes") {
            Some(Value::Array(prefixes)) => prefixes,
            _ => bail!("missing 'prefixes' array"),
        },
        Value::Array(items) => items,
        _ => bail!("expected an object or an array"),
    };

    let mut prefixes = Vec::with_capacity(entries.len());
    for entry in entries {
        let prefix = match entry {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => match obj.get("ip_prefix").and_then(|v| v.as_str()) {
                Some(s) => s,
                None => bail!("prefix entry without 'ip_prefix': {}", entry),
            },
            other => bail!("unsupported prefix entry: {}", other),
        };

        if ip_only {
            prefixes.push(Value::String(prefix.to_string()));
        } else if entry.is_object() {
            prefixes.push(entry.clone());
        } else {
            prefixes.push(json!({ "ip_prefix": prefix }));
        }
    }
    Ok(prefixes)
}
