//! End-to-end tests for the docforge build pipeline.
//!
//! Each test creates a real git repository with tagged releases, runs the
//! pipeline against it with an in-process extractor and executor, and checks
//! the output tree the site reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use docforge::config::{DocsConfig, PackageConfig};
use docforge::error::{DocError, Result};
use docforge::pipeline::extract::finalize;
use docforge::pipeline::{
    ApiExtractor, BuildOptions, ExampleExecutor, ExecutionResult, NotebookSource, PipelineRunner, Stage,
};
use docforge::storage::{
    read_json, scan_version_dirs, CROSSREF_INDEX_FILE, MANIFEST_FILE, SEARCH_INDEX_FILE,
};
use docforge::types::{ApiDocument, ExampleMeta, MinorVersion, PackageManifest, SkipReport, Tag, VersionManifest};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reads the API document from a fixture file committed in the checked-out
/// tree, so each tag yields its own API.
struct FixtureExtractor;

impl ApiExtractor for FixtureExtractor {
    fn extract(&self, package: &PackageConfig) -> Result<(ApiDocument, SkipReport)> {
        let path = package.source.join("api_fixture.json");
        if !path.exists() {
            return Err(DocError::stage("extract", "fixture missing"));
        }
        let raw: Value = read_json(&path)?;
        Ok(finalize(&package.id, &raw, |m| m.contains("_version")))
    }
}

/// Marks every executable example as run, with a fixed timestamp.
struct InstantExecutor;

impl ExampleExecutor for InstantExecutor {
    fn execute_all(&self, _dir: &Path, examples: &[ExampleMeta]) -> Result<BTreeMap<String, ExecutionResult>> {
        Ok(examples
            .iter()
            .filter(|e| e.executable)
            .map(|e| {
                let result = ExecutionResult {
                    success: e.stem() != "broken",
                    cells: BTreeMap::new(),
                    executed_at: "2024-03-01T12:00:00+00:00".into(),
                    duration_ms: 0,
                    error: None,
                };
                (e.stem().to_string(), result)
            })
            .collect())
    }
}

struct Workspace {
    _dir: TempDir,
    repo: PathBuf,
    config: DocsConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let repo = root.join("pathsim");
        std::fs::create_dir_all(&repo).unwrap();

        let mut config = DocsConfig::builtin(&root, root.join("static"));
        config.packages.truncate(1);
        config.packages[0].min_supported = MinorVersion::new(0, 5);

        let ws = Self {
            _dir: dir,
            repo,
            config,
        };
        ws.git(&["init", "--quiet", "--initial-branch=main"]);
        ws.git(&["config", "user.email", "test@example.com"]);
        ws.git(&["config", "user.name", "Test Author"]);
        ws
    }

    fn package(&self) -> &PackageConfig {
        &self.config.packages[0]
    }

    fn git(&self, args: &[&str]) {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .env("GIT_AUTHOR_NAME", "Test Author")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test Author")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_DATE", "2024-03-01T12:00:00+00:00")
            .env("GIT_AUTHOR_DATE", "2024-03-01T12:00:00+00:00")
            .output()
            .unwrap();
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }

    fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.repo.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Commit a release whose API carries `classes` in `pathsim.blocks`.
    fn release(&self, tag: &str, classes: &[&str]) {
        let classes: Vec<Value> = classes
            .iter()
            .map(|c| json!({"name": c, "description": format!("{c} block"), "methods": [{"name": "update", "description": "Advance one step"}]}))
            .collect();
        let api = json!({
            "modules": {
                "pathsim": {
                    "description": "Core simulation",
                    "classes": [{"name": "Simulation", "description": "Top-level simulation", "methods": [{"name": "run"}]}],
                    "functions": []
                },
                "pathsim.blocks": {"description": "Blocks", "classes": classes, "functions": [{"name": "block_factory"}]},
                "pathsim._version": {"functions": [{"name": "version"}]},
                "pathsim.empty": {"classes": [], "functions": []}
            }
        });
        self.write("src/api_fixture.json", serde_json::to_string_pretty(&api).unwrap().as_bytes());
        self.commit_and_tag(tag);
    }

    fn add_example(&self, stem: &str, title: &str) {
        let notebook = json!({
            "cells": [
                {"cell_type": "markdown", "source": [format!("# {title}")]},
                {"cell_type": "markdown", "source": ["Swinging **mass** on a rod.\n", "![plot](figures/plot.png)"]},
                {"cell_type": "code", "source": ["print('hi')"], "outputs": [{"output_type": "stream", "text": "hi"}], "execution_count": 3}
            ],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        });
        self.write(
            &format!("docs/source/examples/{stem}.ipynb"),
            serde_json::to_string(&notebook).unwrap().as_bytes(),
        );
        self.write("docs/source/examples/figures/plot.png", b"\x89PNG fake");
    }

    fn commit_and_tag(&self, tag: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "--quiet", "--allow-empty", "-m", tag]);
        self.git(&["tag", tag]);
    }

    fn runner(&self) -> PipelineRunner<'_> {
        PipelineRunner::new(
            &self.config,
            Box::new(FixtureExtractor),
            Box::new(NotebookSource::new(&self.config)),
            Box::new(InstantExecutor),
        )
    }

    fn package_dir(&self) -> PathBuf {
        self.config.package_dir(&self.package().id)
    }

    fn version_file(&self, tag: &str, file: &str) -> PathBuf {
        self.package_dir().join(tag).join(file)
    }

    fn current_branch(&self) -> String {
        let out = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.repo)
            .output()
            .unwrap();
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }
}

fn tags(names: &[&str]) -> Vec<Tag> {
    names.iter().map(|n| Tag::parse(n).unwrap()).collect()
}

fn read_value(path: &Path) -> Value {
    read_json(path).unwrap()
}

// ---------------------------------------------------------------------------
// Full build
// ---------------------------------------------------------------------------

#[test]
fn build_package_produces_every_retained_version() {
    let ws = Workspace::new();
    ws.release("v0.4.0", &["Old"]);
    ws.release("v0.5.0", &["Integrator"]);
    ws.add_example("pendulum", "Pendulum");
    ws.release("v0.6.0", &["Integrator", "Amplifier"]);
    ws.release("v0.6.3", &["Integrator", "Amplifier", "Scope"]);

    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    assert_eq!(run.skipped, None);
    assert_eq!(run.tags_found, 4);
    assert_eq!(run.plan.to_build, tags(&["v0.6.3", "v0.6.0", "v0.5.0"]));
    assert_eq!(run.failed_builds(), 0);
    assert_eq!(
        scan_version_dirs(&ws.package_dir()).unwrap().into_iter().collect::<Vec<_>>(),
        tags(&["v0.5.0", "v0.6.0", "v0.6.3"])
    );
    assert_eq!(ws.current_branch(), "main");

    let manifest: PackageManifest = read_json(&ws.package_dir().join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.latest_tag, "v0.6.3");
    let listed: Vec<(&str, &str, bool)> = manifest
        .versions
        .iter()
        .map(|v| (v.tag.as_str(), v.released.as_str(), v.has_examples))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("v0.6.3", "2024-03-01", true),
            ("v0.6.0", "2024-03-01", true),
            ("v0.5.0", "2024-03-01", false),
        ]
    );
}

#[test]
fn version_api_reflects_its_own_tag() {
    let ws = Workspace::new();
    ws.release("v0.5.0", &["Integrator"]);
    ws.release("v0.6.0", &["Integrator", "Scope"]);

    ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    let old = read_value(&ws.version_file("v0.5.0", CROSSREF_INDEX_FILE));
    let new = read_value(&ws.version_file("v0.6.0", CROSSREF_INDEX_FILE));
    assert!(old.get("Scope").is_none());
    assert_eq!(new["Scope"]["path"], "pathsim/v0.6.0/api#Scope");
    assert_eq!(old["Integrator"]["path"], "pathsim/v0.5.0/api#Integrator");
}

#[test]
fn search_index_orders_api_before_examples() {
    let ws = Workspace::new();
    ws.add_example("pendulum", "Pendulum");
    ws.release("v0.5.0", &["Integrator"]);

    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();
    let report = &run.builds[0];
    assert!(report.success(), "{:?}", report.failures);
    assert_eq!(report.modules, 2);
    assert_eq!(report.examples, 1);
    assert_eq!(report.executed, 1);
    assert!(report.execution_failures.is_empty());

    let search = read_value(&ws.version_file("v0.5.0", SEARCH_INDEX_FILE));
    let rows: Vec<(String, String)> = search
        .as_array()
        .unwrap()
        .iter()
        .map(|e| {
            (
                e["type"].as_str().unwrap().to_string(),
                e["path"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    let expected: Vec<(String, String)> = [
        ("module", "pathsim/v0.5.0/api#pathsim"),
        ("class", "pathsim/v0.5.0/api#Simulation"),
        ("method", "pathsim/v0.5.0/api#Simulation.run"),
        ("module", "pathsim/v0.5.0/api#pathsim-blocks"),
        ("class", "pathsim/v0.5.0/api#Integrator"),
        ("method", "pathsim/v0.5.0/api#Integrator.update"),
        ("function", "pathsim/v0.5.0/api#block_factory"),
        ("example", "pathsim/v0.5.0/examples/pendulum"),
    ]
    .into_iter()
    .map(|(k, p)| (k.to_string(), p.to_string()))
    .collect();
    assert_eq!(rows, expected);

    let crossref = read_value(&ws.version_file("v0.5.0", CROSSREF_INDEX_FILE));
    assert_eq!(crossref["pathsim.blocks.Integrator"]["type"], "class");
    assert_eq!(crossref["pathsim.Integrator"]["moduleName"], "pathsim.blocks");
    assert_eq!(crossref["Integrator.update"]["parentClass"], "Integrator");
    assert!(crossref.get("pathsim._version").is_none());
}

#[test]
fn examples_are_copied_stripped_with_figures_and_manifest() {
    let ws = Workspace::new();
    ws.add_example("pendulum", "Pendulum");
    ws.release("v0.5.0", &["Integrator"]);

    ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    let copied = read_value(&ws.version_file("v0.5.0", "notebooks/pendulum.ipynb"));
    assert_eq!(copied["cells"][2]["outputs"], json!([]));
    assert_eq!(copied["cells"][2]["execution_count"], Value::Null);
    assert!(ws.version_file("v0.5.0", "figures/plot.png").exists());

    let manifest: VersionManifest = read_json(&ws.version_file("v0.5.0", MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.package, "pathsim");
    assert_eq!(manifest.tag, "v0.5.0");
    let nb = &manifest.notebooks[0];
    assert_eq!(nb.title, "Pendulum");
    assert_eq!(nb.description, "Swinging mass on a rod.");
    assert_eq!(nb.category, "getting-started");
    assert_eq!(nb.thumbnail.as_deref(), Some("plot.png"));
    assert!(!manifest.categories.is_empty());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn new_patch_release_replaces_previous_patch() {
    let ws = Workspace::new();
    ws.release("v0.5.0", &["Integrator"]);
    ws.release("v0.5.1", &["Integrator"]);

    ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();
    assert!(ws.package_dir().join("v0.5.1").is_dir());

    ws.release("v0.5.2", &["Integrator", "Scope"]);
    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    assert_eq!(run.plan.to_build, tags(&["v0.5.2"]));
    assert_eq!(run.plan.to_delete, tags(&["v0.5.1"]));
    assert_eq!(run.removed, 1);
    assert_eq!(
        scan_version_dirs(&ws.package_dir()).unwrap().into_iter().collect::<Vec<_>>(),
        tags(&["v0.5.0", "v0.5.2"])
    );
    let manifest: PackageManifest = read_json(&ws.package_dir().join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.latest_tag, "v0.5.2");
    assert_eq!(manifest.versions.len(), 2);
}

#[test]
fn second_run_without_new_tags_builds_nothing() {
    let ws = Workspace::new();
    ws.release("v0.5.0", &["Integrator"]);
    ws.release("v0.6.1", &["Integrator"]);

    ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();
    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    assert!(run.plan.is_empty());
    assert!(run.builds.is_empty());
    assert!(run.manifest.is_some());
}

#[test]
fn forced_rebuild_is_byte_identical() {
    let ws = Workspace::new();
    ws.add_example("pendulum", "Pendulum");
    ws.release("v0.5.0", &["Integrator", "Scope"]);

    ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();
    let files = [SEARCH_INDEX_FILE, CROSSREF_INDEX_FILE, MANIFEST_FILE, "api.json"];
    let before: Vec<Vec<u8>> = files
        .iter()
        .map(|f| std::fs::read(ws.version_file("v0.5.0", f)).unwrap())
        .collect();

    let options = BuildOptions {
        force_all: true,
        ..BuildOptions::default()
    };
    let run = ws.runner().build_package(ws.package(), options).unwrap();
    assert_eq!(run.plan.to_build, tags(&["v0.5.0"]));

    for (file, bytes) in files.iter().zip(&before) {
        assert_eq!(&std::fs::read(ws.version_file("v0.5.0", file)).unwrap(), bytes, "{file} changed");
    }
}

#[test]
fn dry_run_writes_nothing() {
    let ws = Workspace::new();
    ws.release("v0.5.0", &["Integrator"]);

    let options = BuildOptions {
        dry_run: true,
        ..BuildOptions::default()
    };
    let run = ws.runner().build_package(ws.package(), options).unwrap();

    assert_eq!(run.plan.to_build, tags(&["v0.5.0"]));
    assert!(run.builds.iter().all(|b| b.dry_run && b.success()));
    assert!(!ws.package_dir().join("v0.5.0").exists());
    assert!(!ws.package_dir().join(MANIFEST_FILE).exists());
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[test]
fn extract_failure_is_isolated_to_its_version() {
    let ws = Workspace::new();
    ws.add_example("pendulum", "Pendulum");
    ws.commit_and_tag("v0.5.0");
    ws.release("v0.6.0", &["Integrator"]);

    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    assert_eq!(run.failed_builds(), 1);
    let broken = run.builds.iter().find(|b| b.tag == Tag::new(0, 5, 0)).unwrap();
    assert_eq!(broken.failures[0].stage, Stage::Extract);
    // Examples and indexes still land for the broken version.
    assert!(ws.version_file("v0.5.0", MANIFEST_FILE).exists());
    let search = read_value(&ws.version_file("v0.5.0", SEARCH_INDEX_FILE));
    assert_eq!(search.as_array().unwrap().len(), 1);

    let good = run.builds.iter().find(|b| b.tag == Tag::new(0, 6, 0)).unwrap();
    assert!(good.success());
    assert_eq!(ws.current_branch(), "main");
}

#[test]
fn failed_example_is_reported_without_failing_the_build() {
    let ws = Workspace::new();
    ws.add_example("broken", "Broken");
    ws.release("v0.5.0", &["Integrator"]);

    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();
    let report = &run.builds[0];

    assert!(report.success());
    assert_eq!(report.execution_failures, vec!["broken".to_string()]);
}

#[test]
fn package_manifest_failure_keeps_build_reports() {
    let ws = Workspace::new();
    ws.release("v0.5.0", &["Integrator"]);
    // A directory where the package manifest file should go.
    std::fs::create_dir_all(ws.package_dir().join(MANIFEST_FILE).join("blocked")).unwrap();

    let run = ws.runner().build_package(ws.package(), BuildOptions::default()).unwrap();

    assert_eq!(run.builds.len(), 1);
    assert!(run.builds[0].success());
    assert!(run.manifest.is_none());
    assert!(run.manifest_error.is_some());
    assert!(!run.success());
    assert!(ws.version_file("v0.5.0", SEARCH_INDEX_FILE).exists());
}

#[test]
fn missing_repository_skips_package() {
    let ws = Workspace::new();
    let mut config = ws.config.clone();
    config.packages[0].repo = ws.repo.join("does-not-exist");
    let runner = PipelineRunner::new(
        &config,
        Box::new(FixtureExtractor),
        Box::new(NotebookSource::new(&config)),
        Box::new(InstantExecutor),
    );

    let run = runner.build_package(&config.packages[0], BuildOptions::default()).unwrap();
    assert!(run.skipped.is_some());
    assert!(run.builds.is_empty());
}
