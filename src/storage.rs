//! On-disk layout helpers: version directory scanning and JSON persistence.
//!
//! Layout:
//! ```text
//! {static}/{package}/manifest.json
//! {static}/{package}/{tag}/api.json
//! {static}/{package}/{tag}/manifest.json
//! {static}/{package}/{tag}/search-index.json
//! {static}/{package}/{tag}/crossref-index.json
//! {static}/{package}/{tag}/embeddings-index.json
//! ```

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::types::Tag;

pub const API_FILE: &str = "api.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SEARCH_INDEX_FILE: &str = "search-index.json";
pub const CROSSREF_INDEX_FILE: &str = "crossref-index.json";
pub const EMBEDDINGS_FILE: &str = "embeddings-index.json";

/// Tags that currently have a version directory under `package_dir`.
///
/// Entries whose names are not release tags are ignored. A missing package
/// directory has no versions.
pub fn scan_version_dirs(package_dir: &Path) -> Result<BTreeSet<Tag>> {
    let mut tags = BTreeSet::new();
    let entries = match std::fs::read_dir(package_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tags),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(tag) = entry.file_name().to_str().and_then(Tag::parse) {
            tags.insert(tag);
        }
    }
    Ok(tags)
}

/// `{package_dir}/{tag}`.
pub fn version_dir(package_dir: &Path, tag: &Tag) -> PathBuf {
    package_dir.join(tag.to_string())
}

/// Serialize `value` as pretty JSON and replace `path` atomically.
///
/// The bytes go to a hidden sibling file first and are renamed over the
/// target, so readers see either the old file or the new one.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Compact variant for large payloads (embedding vectors).
pub fn write_json_compact_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Read a JSON file, treating a missing or unparseable file as absent.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    match read_json(path) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable file");
            None
        }
    }
}
