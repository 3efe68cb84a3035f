//! Property-based tests for docforge using proptest.
//!
//! These cover the version lifecycle planner and the index builder, where
//! the interesting cases come from arbitrary tag sets and API shapes.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::Map;

use docforge::index::{build_indexes, BasePaths};
use docforge::lifecycle::plan;
use docforge::types::{ApiClass, ApiDocument, ApiFunction, ApiModule, EntryKind, MinorVersion, Tag};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_tag() -> impl Strategy<Value = Tag> {
    (0u32..2, 0u32..6, prop_oneof![Just(0u32), 0u32..4]).prop_map(|(a, b, c)| Tag::new(a, b, c))
}

fn arb_tags() -> impl Strategy<Value = Vec<Tag>> {
    prop::collection::vec(arb_tag(), 0..12)
}

fn arb_ident() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,6}"
}

fn function(name: String) -> ApiFunction {
    ApiFunction {
        name,
        description: String::new(),
        extra: Map::new(),
    }
}

fn arb_module() -> impl Strategy<Value = ApiModule> {
    (
        "[a-z]{1,5}(\\.[a-z]{1,5}){0,2}",
        prop::collection::vec((arb_ident(), prop::collection::vec(arb_ident(), 0..4)), 0..4),
        prop::collection::vec(arb_ident(), 0..4),
    )
        .prop_map(|(name, classes, functions)| ApiModule {
            name,
            description: String::new(),
            classes: classes
                .into_iter()
                .map(|(class, methods)| ApiClass {
                    name: class,
                    description: String::new(),
                    methods: methods.into_iter().map(function).collect(),
                    extra: Map::new(),
                })
                .collect(),
            functions: functions.into_iter().map(function).collect(),
            extra: Map::new(),
        })
}

fn arb_document() -> impl Strategy<Value = ApiDocument> {
    prop::collection::vec(arb_module(), 0..5).prop_map(|modules| ApiDocument {
        package: "pkg".into(),
        modules,
    })
}

fn entity_count(doc: &ApiDocument) -> usize {
    doc.modules
        .iter()
        .map(|m| 1 + m.functions.len() + m.classes.iter().map(|c| 1 + c.methods.len()).sum::<usize>())
        .sum()
}

// ---------------------------------------------------------------------------
// Lifecycle planner
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn plan_always_includes_latest_unless_present(
        tags in arb_tags(),
        existing in prop::collection::btree_set(arb_tag(), 0..8),
        min_minor in 0u32..6,
    ) {
        let min = MinorVersion::new(0, min_minor);
        let p = plan(&tags, &existing, min, false);
        match tags.iter().max() {
            None => prop_assert!(p.is_empty()),
            Some(latest) => prop_assert_eq!(p.to_build.contains(latest), !existing.contains(latest)),
        }
    }

    #[test]
    fn plan_lists_are_newest_first_and_disjoint_from_retained(
        tags in arb_tags(),
        existing in prop::collection::btree_set(arb_tag(), 0..8),
        force in any::<bool>(),
    ) {
        let p = plan(&tags, &existing, MinorVersion::new(0, 2), force);
        prop_assert!(p.to_build.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(p.to_delete.windows(2).all(|w| w[0] > w[1]));
        for tag in &p.to_delete {
            prop_assert!(!tag.is_milestone());
            prop_assert!(!p.to_build.contains(tag));
            prop_assert!(existing.contains(tag));
        }
    }

    #[test]
    fn plan_never_builds_below_minimum_except_latest(
        tags in arb_tags(),
        min_minor in 0u32..6,
        force in any::<bool>(),
    ) {
        let min = MinorVersion::new(0, min_minor);
        let p = plan(&tags, &BTreeSet::new(), min, force);
        let latest = tags.iter().max().copied();
        for tag in &p.to_build {
            prop_assert!(Some(*tag) == latest || (tag.is_milestone() && tag.minor_version() >= min));
        }
    }

    #[test]
    fn applying_a_plan_reaches_a_fixed_point(
        tags in arb_tags(),
        min_minor in 0u32..6,
    ) {
        let min = MinorVersion::new(0, min_minor);
        let first = plan(&tags, &BTreeSet::new(), min, false);
        let built: BTreeSet<Tag> = first.to_build.iter().copied().collect();
        let second = plan(&tags, &built, min, false);
        prop_assert!(second.is_empty());
    }
}

// ---------------------------------------------------------------------------
// Index builder
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn search_has_one_entry_per_entity(doc in arb_document()) {
        let idx = build_indexes("pkg", Some(&doc), None, &BasePaths::version("pkg", "v1.0.0"));
        prop_assert_eq!(idx.search.len(), entity_count(&doc));
    }

    #[test]
    fn search_paths_live_under_the_version(doc in arb_document()) {
        let idx = build_indexes("pkg", Some(&doc), None, &BasePaths::version("pkg", "v1.0.0"));
        for entry in &idx.search {
            prop_assert!(entry.path.starts_with("pkg/v1.0.0/api#"));
            let anchor = entry.path.rsplit('#').next().unwrap_or_default();
            match entry.kind {
                EntryKind::Module => prop_assert!(!anchor.contains('.')),
                EntryKind::Method => {
                    let expected = format!("{}.{}", entry.parent_class.as_deref().unwrap_or_default(), entry.name);
                    prop_assert_eq!(anchor, expected.as_str());
                }
                _ => prop_assert_eq!(anchor, entry.name.as_str()),
            }
        }
    }

    #[test]
    fn crossref_targets_point_into_search(doc in arb_document()) {
        let idx = build_indexes("pkg", Some(&doc), None, &BasePaths::version("pkg", "v1.0.0"));
        let paths: BTreeSet<&str> = idx.search.iter().map(|e| e.path.as_str()).collect();
        for entry in idx.crossref.values() {
            prop_assert!(paths.contains(entry.path.as_str()));
        }
    }

    #[test]
    fn index_build_is_deterministic(doc in arb_document()) {
        let base = BasePaths::version("pkg", "v1.0.0");
        let a = build_indexes("pkg", Some(&doc), None, &base);
        let b = build_indexes("pkg", Some(&doc), None, &base);
        prop_assert_eq!(
            serde_json::to_string(&a.search).unwrap(),
            serde_json::to_string(&b.search).unwrap()
        );
        prop_assert_eq!(a.crossref, b.crossref);
    }
}
