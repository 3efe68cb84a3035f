//! Site-wide index over the latest version of every package.
//!
//! Paths are version-less (`{package}/api#...`), so links from the landing
//! pages always resolve to whatever is currently latest. Entries are grouped
//! as: package pages for all packages, then API entities for all packages,
//! then examples for all packages.

use std::path::Path;

use tracing::{info, warn};

use super::{build_indexes, example_entries, load_api_document, load_version_manifest, write_indexes};
use super::{BasePaths, IndexStats, Indexes};
use crate::config::{DocsConfig, PackageConfig};
use crate::error::Result;
use crate::storage::{scan_version_dirs, version_dir};
use crate::types::{ApiDocument, EntryKind, SearchEntry, VersionManifest};

/// What went into the site-wide index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteIndexStats {
    pub packages: usize,
    pub index: IndexStats,
}

struct PackageSnapshot<'a> {
    package: &'a PackageConfig,
    built: bool,
    api: Option<ApiDocument>,
    manifest: Option<VersionManifest>,
}

impl PackageSnapshot<'_> {
    fn has_examples(&self) -> bool {
        self.manifest
            .as_ref()
            .is_some_and(|m| !m.notebooks.is_empty())
    }
}

fn snapshot<'a>(config: &DocsConfig, package: &'a PackageConfig) -> PackageSnapshot<'a> {
    let package_dir = config.package_dir(&package.id);
    let latest = match scan_version_dirs(&package_dir) {
        Ok(tags) => tags.into_iter().next_back(),
        Err(e) => {
            warn!(package = %package.id, error = %e, "could not scan versions");
            None
        }
    };
    let Some(latest) = latest else {
        return PackageSnapshot {
            package,
            built: false,
            api: None,
            manifest: None,
        };
    };
    let dir = version_dir(&package_dir, &latest);
    PackageSnapshot {
        package,
        built: true,
        api: load_api_document(&package.id, &dir),
        manifest: load_version_manifest(&dir),
    }
}

/// Build the site-wide indexes in memory. Every configured package gets its
/// overview and API pages; the rest comes from its latest built version.
/// Returns the indexes and the number of packages with a built version.
pub fn build_site_indexes(config: &DocsConfig) -> (Indexes, usize) {
    let snapshots: Vec<PackageSnapshot<'_>> = config
        .packages
        .iter()
        .map(|package| snapshot(config, package))
        .collect();

    let mut out = Indexes::default();
    for snap in &snapshots {
        out.search.extend(page_entries(snap.package, snap.has_examples()));
    }
    for snap in &snapshots {
        let base = BasePaths::unversioned(&snap.package.id);
        let per_package = build_indexes(&snap.package.id, snap.api.as_ref(), None, &base);
        out.search.extend(per_package.search);
        out.overwritten_keys += per_package.overwritten_keys;
        for (key, entry) in per_package.crossref {
            out.register(key, entry);
        }
    }
    for snap in &snapshots {
        if let Some(manifest) = &snap.manifest {
            let base = BasePaths::unversioned(&snap.package.id);
            out.search
                .extend(example_entries(&snap.package.id, manifest, &base));
        }
    }
    let built = snapshots.iter().filter(|s| s.built).count();
    (out, built)
}

/// Build and write `{static}/search-index.json` and `{static}/crossref-index.json`.
pub fn build_site_index(config: &DocsConfig, dry_run: bool) -> Result<SiteIndexStats> {
    let (indexes, packages) = build_site_indexes(config);
    let index = if dry_run {
        IndexStats {
            search_entries: indexes.search.len(),
            crossref_keys: indexes.crossref.len(),
            overwritten_keys: indexes.overwritten_keys,
        }
    } else {
        write_site(&config.static_dir, &indexes)?
    };
    info!(
        packages,
        search = index.search_entries,
        crossref = index.crossref_keys,
        "site index built"
    );
    Ok(SiteIndexStats { packages, index })
}

fn write_site(static_dir: &Path, indexes: &Indexes) -> Result<IndexStats> {
    std::fs::create_dir_all(static_dir)?;
    write_indexes(static_dir, indexes)
}

fn page_entries(package: &PackageConfig, has_examples: bool) -> Vec<SearchEntry> {
    let page = |name: String, description: String, path: String| SearchEntry {
        kind: EntryKind::Page,
        name,
        description,
        path,
        package_id: package.id.clone(),
        module_name: String::new(),
        parent_class: None,
        tags: None,
    };
    let name = &package.display_name;

    let mut pages = vec![
        page(name.clone(), package.description.clone(), package.id.clone()),
        page(
            format!("{name} API"),
            format!("API reference for {name}"),
            format!("{}/api", package.id),
        ),
    ];
    if has_examples {
        pages.push(page(
            format!("{name} Examples"),
            format!("Example notebooks for {name}"),
            format!("{}/examples", package.id),
        ));
    }
    pages
}
