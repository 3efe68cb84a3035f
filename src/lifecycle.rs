//! Version lifecycle planning.
//!
//! Decides which version directories must be (re)built and which are stale.
//! The retained set for a package is every milestone (`vX.Y.0`) at or above
//! the minimum supported minor line, plus the overall latest tag. Any other
//! version directory on disk is a superseded patch release and is deleted in
//! the same pass that introduces its replacement.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info};

use crate::config::PackageConfig;
use crate::error::Result;
use crate::git::{latest, milestones_at_or_above};
use crate::storage::{scan_version_dirs, version_dir};
use crate::types::{MinorVersion, Tag};

/// Work computed for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Versions to build, newest first.
    pub to_build: Vec<Tag>,
    /// Stale version directories to remove, newest first.
    pub to_delete: Vec<Tag>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.to_build.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the build/delete plan for one package.
///
/// `existing` holds the tags that already have a version directory. With
/// `force_all`, every retained version is rebuilt regardless of `existing`.
/// An empty tag set is a no-op.
pub fn plan(
    all_tags: &[Tag],
    existing: &BTreeSet<Tag>,
    min_supported: MinorVersion,
    force_all: bool,
) -> Plan {
    let Some(latest) = latest(all_tags) else {
        return Plan::default();
    };
    let milestones: BTreeSet<Tag> = milestones_at_or_above(all_tags, min_supported)
        .into_iter()
        .collect();

    let mut to_build: BTreeSet<Tag> = milestones
        .iter()
        .filter(|t| force_all || !existing.contains(t))
        .copied()
        .collect();
    if force_all || !existing.contains(&latest) {
        to_build.insert(latest);
    }

    // Older milestones below the minimum are left alone; only patch releases
    // that are no longer latest are stale.
    let to_delete: BTreeSet<Tag> = existing
        .iter()
        .filter(|t| !t.is_milestone() && !milestones.contains(t) && **t != latest)
        .copied()
        .collect();

    Plan {
        to_build: to_build.into_iter().rev().collect(),
        to_delete: to_delete.into_iter().rev().collect(),
    }
}

/// Planner bound to the output tree.
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePlanner<'a> {
    package_dir: &'a Path,
}

impl<'a> LifecyclePlanner<'a> {
    pub fn new(package_dir: &'a Path) -> Self {
        Self { package_dir }
    }

    /// Plan `package` against the version directories currently on disk.
    pub fn plan_package(&self, package: &PackageConfig, tags: &[Tag], force_all: bool) -> Result<Plan> {
        let existing = scan_version_dirs(self.package_dir)?;
        let plan = plan(tags, &existing, package.min_supported, force_all);
        debug!(
            package = %package.id,
            existing = existing.len(),
            build = plan.to_build.len(),
            delete = plan.to_delete.len(),
            "planned"
        );
        Ok(plan)
    }

    /// Remove the stale version directories named in `plan`.
    pub fn apply_deletions(&self, plan: &Plan, dry_run: bool) -> Result<usize> {
        let mut removed = 0;
        for tag in &plan.to_delete {
            let dir = version_dir(self.package_dir, tag);
            if dry_run {
                continue;
            }
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
                info!(tag = %tag, "removed stale version");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
