//! Pure tag-set queries: parsing, latest, and milestone selection.

use std::collections::BTreeSet;

use crate::types::{MinorVersion, Tag};

/// Parse `git tag -l` output, dropping anything that is not `vX.Y.Z`.
/// Result is deduplicated and sorted newest first.
pub fn parse_tag_list(output: &str) -> Vec<Tag> {
    let set: BTreeSet<Tag> = output.lines().filter_map(|l| Tag::parse(l.trim())).collect();
    set.into_iter().rev().collect()
}

/// Highest tag overall, milestone or not.
pub fn latest(tags: &[Tag]) -> Option<Tag> {
    tags.iter().copied().max()
}

/// One `vX.Y.0` tag per minor line at or above `min`, newest first.
pub fn milestones_at_or_above(tags: &[Tag], min: MinorVersion) -> Vec<Tag> {
    let set: BTreeSet<Tag> = tags
        .iter()
        .copied()
        .filter(|t| t.is_milestone() && t.minor_version() >= min)
        .collect();
    set.into_iter().rev().collect()
}
