//! Search and crossref index construction.
//!
//! Both indexes derive from one version's `api.json` and `manifest.json`.
//! The search index is a flat list whose order is part of the contract:
//! per module, the module entry, then each class followed by its methods,
//! then the module's functions; all examples come after all modules. The
//! crossref index maps several lookup keys to each API entity; when two
//! entities claim the same key the one visited later wins.

pub mod site;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{
    read_json, read_json_opt, write_json_atomic, API_FILE, CROSSREF_INDEX_FILE, MANIFEST_FILE,
    SEARCH_INDEX_FILE,
};
use crate::types::{
    ApiDocument, CrossrefEntry, EntryKind, SearchEntry, VersionManifest,
};

pub use site::{build_site_index, SiteIndexStats};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// URL prefixes that API and example paths are built on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePaths {
    pub api: String,
    pub examples: String,
}

impl BasePaths {
    /// `{package}/{tag}/api` and `{package}/{tag}/examples`.
    pub fn version(package_id: &str, tag: &str) -> Self {
        Self {
            api: format!("{package_id}/{tag}/api"),
            examples: format!("{package_id}/{tag}/examples"),
        }
    }

    /// Version-less prefixes used by the site-wide index.
    pub fn unversioned(package_id: &str) -> Self {
        Self {
            api: format!("{package_id}/api"),
            examples: format!("{package_id}/examples"),
        }
    }
}

/// Module anchors use `-` in place of `.` so they survive as HTML ids.
pub fn module_anchor(module_name: &str) -> String {
    module_name.replace('.', "-")
}

/// Path of an API entity, reconstructible from the entity alone.
///
/// Methods anchor on `Class.method`; modules on their dashed name; classes
/// and functions on their bare name.
pub fn api_entry_path(
    base: &BasePaths,
    kind: EntryKind,
    module_name: &str,
    parent_class: Option<&str>,
    name: &str,
) -> String {
    let anchor = match (kind, parent_class) {
        (EntryKind::Module, _) => module_anchor(module_name),
        (EntryKind::Method, Some(class)) => format!("{class}.{name}"),
        _ => name.to_string(),
    };
    format!("{}#{}", base.api, anchor)
}

/// Path of an example page.
pub fn example_path(base: &BasePaths, slug: &str) -> String {
    format!("{}/{}", base.examples, slug)
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// The two derived lookup structures for one version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Indexes {
    pub search: Vec<SearchEntry>,
    pub crossref: BTreeMap<String, CrossrefEntry>,
    /// Crossref inserts that replaced an earlier entity under the same key.
    pub overwritten_keys: usize,
}

impl Indexes {
    fn register(&mut self, key: String, entry: CrossrefEntry) {
        if let Some(previous) = self.crossref.insert(key, entry) {
            self.overwritten_keys += 1;
            debug!(name = %previous.name, path = %previous.path, "crossref key reassigned");
        }
    }
}

/// Build the search and crossref indexes from an API document and an
/// example manifest. Either input may be absent.
pub fn build_indexes(
    package_id: &str,
    api: Option<&ApiDocument>,
    manifest: Option<&VersionManifest>,
    base: &BasePaths,
) -> Indexes {
    let mut out = Indexes::default();

    if let Some(api) = api {
        push_api_entries(&mut out, package_id, api, base);
    }
    if let Some(manifest) = manifest {
        out.search.extend(example_entries(package_id, manifest, base));
    }
    out
}

fn push_api_entries(out: &mut Indexes, package_id: &str, api: &ApiDocument, base: &BasePaths) {
    let target = |kind: EntryKind, name: &str, module: &str, parent: Option<&str>| CrossrefEntry {
        name: name.to_string(),
        kind,
        package_id: package_id.to_string(),
        module_name: module.to_string(),
        parent_class: parent.map(str::to_string),
        path: api_entry_path(base, kind, module, parent, name),
    };
    let entry = |kind: EntryKind, name: &str, description: &str, module: &str, parent: Option<&str>| {
        SearchEntry {
            kind,
            name: name.to_string(),
            description: description.to_string(),
            path: api_entry_path(base, kind, module, parent, name),
            package_id: package_id.to_string(),
            module_name: module.to_string(),
            parent_class: parent.map(str::to_string),
            tags: None,
        }
    };

    for module in &api.modules {
        let m = module.name.as_str();
        out.search
            .push(entry(EntryKind::Module, m, &module.description, m, None));
        out.register(m.to_string(), target(EntryKind::Module, m, m, None));

        for class in &module.classes {
            let c = class.name.as_str();
            out.search
                .push(entry(EntryKind::Class, c, &class.description, m, None));
            let class_target = target(EntryKind::Class, c, m, None);
            out.register(c.to_string(), class_target.clone());
            out.register(format!("{m}.{c}"), class_target.clone());
            out.register(format!("{package_id}.{c}"), class_target);

            for method in &class.methods {
                let name = method.name.as_str();
                out.search.push(entry(
                    EntryKind::Method,
                    name,
                    &method.description,
                    m,
                    Some(c),
                ));
                out.register(
                    format!("{c}.{name}"),
                    target(EntryKind::Method, name, m, Some(c)),
                );
            }
        }

        for function in &module.functions {
            let f = function.name.as_str();
            out.search
                .push(entry(EntryKind::Function, f, &function.description, m, None));
            let function_target = target(EntryKind::Function, f, m, None);
            out.register(f.to_string(), function_target.clone());
            out.register(format!("{m}.{f}"), function_target);
        }
    }
}

fn example_entries<'a>(
    package_id: &'a str,
    manifest: &'a VersionManifest,
    base: &'a BasePaths,
) -> impl Iterator<Item = SearchEntry> + 'a {
    manifest.notebooks.iter().map(move |nb| SearchEntry {
        kind: EntryKind::Example,
        name: nb.title.clone(),
        description: nb.description.clone(),
        path: example_path(base, &nb.slug),
        package_id: package_id.to_string(),
        module_name: nb.category.clone(),
        parent_class: None,
        tags: Some(nb.tags.clone()),
    })
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Counts reported after writing a version's indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub search_entries: usize,
    pub crossref_keys: usize,
    pub overwritten_keys: usize,
}

/// Write both index files into `dir`, each replaced atomically.
pub fn write_indexes(dir: &Path, indexes: &Indexes) -> Result<IndexStats> {
    write_json_atomic(&dir.join(SEARCH_INDEX_FILE), &indexes.search)?;
    write_json_atomic(&dir.join(CROSSREF_INDEX_FILE), &indexes.crossref)?;
    Ok(IndexStats {
        search_entries: indexes.search.len(),
        crossref_keys: indexes.crossref.len(),
        overwritten_keys: indexes.overwritten_keys,
    })
}

/// Load the API document persisted in a version directory, if any.
///
/// Unparseable files count as absent; malformed entities inside a readable
/// file are skipped with a warning.
pub fn load_api_document(package_id: &str, dir: &Path) -> Option<ApiDocument> {
    let path = dir.join(API_FILE);
    if !path.is_file() {
        return None;
    }
    let raw: serde_json::Value = match read_json(&path) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable api document");
            return None;
        }
    };
    let (doc, report) = ApiDocument::from_value(package_id, &raw);
    for skipped in &report.skipped {
        warn!(entity = %skipped.entity, reason = %skipped.reason, "skipped api entity");
    }
    Some(doc)
}

/// Load a version manifest, treating a missing or malformed file as absent.
pub fn load_version_manifest(dir: &Path) -> Option<VersionManifest> {
    read_json_opt(&dir.join(MANIFEST_FILE))
}

/// Rebuild `search-index.json` and `crossref-index.json` for one version
/// directory from the `api.json` and `manifest.json` already in it.
pub fn regenerate_version_indexes(package_id: &str, tag: &str, dir: &Path) -> Result<IndexStats> {
    let api = load_api_document(package_id, dir);
    let manifest = load_version_manifest(dir);
    let indexes = build_indexes(
        package_id,
        api.as_ref(),
        manifest.as_ref(),
        &BasePaths::version(package_id, tag),
    );
    let stats = write_indexes(dir, &indexes)?;
    info!(
        package = package_id,
        tag,
        search = stats.search_entries,
        crossref = stats.crossref_keys,
        "indexes written"
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
