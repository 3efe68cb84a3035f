//! Package-level manifest: every built version of a package, newest first.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::config::{DocsConfig, PackageConfig};
use crate::error::Result;
use crate::git::GitRepo;
use crate::index::load_version_manifest;
use crate::storage::{scan_version_dirs, version_dir, write_json_atomic, MANIFEST_FILE};
use crate::types::{PackageManifest, VersionInfo};

/// Scans the version directories of a package and summarizes them.
#[derive(Debug, Clone)]
pub struct PackageManifestAggregator<'a> {
    config: &'a DocsConfig,
}

impl<'a> PackageManifestAggregator<'a> {
    pub fn new(config: &'a DocsConfig) -> Self {
        Self { config }
    }

    /// Build the package manifest from what is on disk.
    ///
    /// Returns `None` when the package has no version directories. A version
    /// whose own manifest is missing or unreadable is listed without
    /// examples.
    pub fn aggregate(&self, package: &PackageConfig) -> Result<Option<PackageManifest>> {
        let package_dir = self.config.package_dir(&package.id);
        let tags = scan_version_dirs(&package_dir)?;
        let Some(latest) = tags.iter().next_back().copied() else {
            info!(package = %package.id, "no versions built");
            return Ok(None);
        };

        let repo = GitRepo::new(&package.repo, Duration::from_secs(self.config.git.timeout_secs));
        let versions = tags
            .iter()
            .rev()
            .map(|tag| {
                let has_examples = load_version_manifest(&version_dir(&package_dir, tag))
                    .is_some_and(|m| !m.notebooks.is_empty());
                VersionInfo {
                    tag: tag.to_string(),
                    released: repo.tag_date(&tag.to_string()),
                    has_examples,
                }
            })
            .collect();

        Ok(Some(PackageManifest {
            package: package.id.clone(),
            latest_tag: latest.to_string(),
            versions,
        }))
    }

    /// Aggregate and write `{static}/{package}/manifest.json`.
    pub fn write(&self, package: &PackageConfig, dry_run: bool) -> Result<Option<PackageManifest>> {
        let Some(manifest) = self.aggregate(package)? else {
            return Ok(None);
        };
        if !dry_run {
            write_json_atomic(&self.manifest_path(&package.id), &manifest)?;
        }
        info!(
            package = %package.id,
            latest = %manifest.latest_tag,
            versions = manifest.versions.len(),
            dry_run,
            "package manifest"
        );
        Ok(Some(manifest))
    }

    pub fn manifest_path(&self, package_id: &str) -> PathBuf {
        self.config.package_dir(package_id).join(MANIFEST_FILE)
    }
}
