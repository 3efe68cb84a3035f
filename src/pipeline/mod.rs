//! Per-version build pipeline.
//!
//! For one (package, tag) the runner checks the tag out, then runs
//! extraction, example copy, execution, manifest generation, and index
//! generation into `{static}/{package}/{tag}/`. Every stage after checkout
//! is best-effort: a failure is logged and recorded in the [`BuildReport`],
//! and later stages run with whatever the earlier ones produced.
//!
//! The collaborators (API extractor, example source, executor) are trait
//! objects so tests can substitute cheap fakes.

pub mod executor;
pub mod extract;
pub mod notebooks;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{DocsConfig, PackageConfig};
use crate::error::Result;
use crate::git::GitRepo;
use crate::index::{build_indexes, write_indexes, BasePaths, IndexStats};
use crate::lifecycle::{LifecyclePlanner, Plan};
use crate::manifest::PackageManifestAggregator;
use crate::storage::{version_dir, write_json_atomic, API_FILE, MANIFEST_FILE};
use crate::types::{ApiDocument, ExampleMeta, PackageManifest, SkipReport, Tag};

pub use executor::{CellOutput, ExampleExecutor, ExecutionResult, NotebookExecutor};
pub use extract::{ApiExtractor, CommandExtractor};
pub use notebooks::{copy_figures, generate_version_manifest, rebuild_manifest, ExampleSource, NotebookSource};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Checkout,
    Prepare,
    Extract,
    Examples,
    Figures,
    Execute,
    Manifest,
    Indexes,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Prepare => "prepare",
            Self::Extract => "extract",
            Self::Examples => "examples",
            Self::Figures => "figures",
            Self::Execute => "execute",
            Self::Manifest => "manifest",
            Self::Indexes => "indexes",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// What happened while building one version.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub package: String,
    pub tag: Tag,
    pub dry_run: bool,
    pub modules: usize,
    pub examples: usize,
    pub executed: usize,
    /// Stems of examples whose execution failed or timed out.
    pub execution_failures: Vec<String>,
    pub index: Option<IndexStats>,
    /// Entities (modules, notebooks) dropped along the way.
    pub skipped: SkipReport,
    pub failures: Vec<StageFailure>,
}

impl BuildReport {
    fn new(package: &str, tag: Tag, dry_run: bool) -> Self {
        Self {
            package: package.to_string(),
            tag,
            dry_run,
            modules: 0,
            examples: 0,
            executed: 0,
            execution_failures: Vec::new(),
            index: None,
            skipped: SkipReport::default(),
            failures: Vec::new(),
        }
    }

    /// True when every stage that ran completed.
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, stage: Stage, err: impl fmt::Display) {
        let message = err.to_string();
        error!(package = %self.package, tag = %self.tag, %stage, error = %message, "stage failed");
        self.failures.push(StageFailure { stage, message });
    }
}

/// Outcome of one package's build run.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRun {
    pub package: String,
    /// Why the package was not processed at all, if it wasn't.
    pub skipped: Option<String>,
    pub tags_found: usize,
    pub plan: Plan,
    pub removed: usize,
    pub builds: Vec<BuildReport>,
    pub manifest: Option<PackageManifest>,
    /// Set when the package manifest could not be written.
    pub manifest_error: Option<String>,
}

impl PackageRun {
    fn skipped(package: &str, reason: &str) -> Self {
        Self {
            package: package.to_string(),
            skipped: Some(reason.to_string()),
            tags_found: 0,
            plan: Plan::default(),
            removed: 0,
            builds: Vec::new(),
            manifest: None,
            manifest_error: None,
        }
    }

    pub fn failed_builds(&self) -> usize {
        self.builds.iter().filter(|b| !b.success()).count()
    }

    /// True when every build and the package manifest succeeded.
    pub fn success(&self) -> bool {
        self.failed_builds() == 0 && self.manifest_error.is_none()
    }
}

/// Switches for a build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub force_all: bool,
    pub dry_run: bool,
    pub execute: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            force_all: false,
            dry_run: false,
            execute: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Drives the per-version pipeline for the packages of one config.
pub struct PipelineRunner<'a> {
    config: &'a DocsConfig,
    extractor: Box<dyn ApiExtractor + 'a>,
    examples: Box<dyn ExampleSource + 'a>,
    executor: Box<dyn ExampleExecutor + 'a>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        config: &'a DocsConfig,
        extractor: Box<dyn ApiExtractor + 'a>,
        examples: Box<dyn ExampleSource + 'a>,
        executor: Box<dyn ExampleExecutor + 'a>,
    ) -> Self {
        Self {
            config,
            extractor,
            examples,
            executor,
        }
    }

    /// Runner wired to the external commands named in the config.
    pub fn from_config(config: &'a DocsConfig) -> Self {
        Self::new(
            config,
            Box::new(CommandExtractor::new(config)),
            Box::new(NotebookSource::new(config)),
            Box::new(NotebookExecutor::new(&config.execution)),
        )
    }

    fn repo(&self, package: &PackageConfig) -> GitRepo {
        GitRepo::new(&package.repo, Duration::from_secs(self.config.git.timeout_secs))
    }

    /// Plan, clean up, and build every scheduled version of `package`, then
    /// refresh its package manifest.
    pub fn build_package(&self, package: &PackageConfig, options: BuildOptions) -> Result<PackageRun> {
        let repo = self.repo(package);
        if !repo.exists() {
            warn!(package = %package.id, repo = %package.repo.display(), "repository not found");
            return Ok(PackageRun::skipped(&package.id, "repository not found"));
        }

        let tags = repo.list_tags();
        let package_dir = self.config.package_dir(&package.id);
        let planner = LifecyclePlanner::new(&package_dir);
        let plan = planner.plan_package(package, &tags, options.force_all)?;
        info!(
            package = %package.id,
            tags = tags.len(),
            build = plan.to_build.len(),
            delete = plan.to_delete.len(),
            "plan"
        );

        let removed = planner.apply_deletions(&plan, options.dry_run)?;
        let builds: Vec<BuildReport> = plan
            .to_build
            .iter()
            .map(|tag| self.build_with(&repo, package, *tag, options))
            .collect();

        let (manifest, manifest_error) = match PackageManifestAggregator::new(self.config).write(package, options.dry_run) {
            Ok(manifest) => (manifest, None),
            Err(e) => {
                error!(package = %package.id, error = %e, "package manifest failed");
                (None, Some(e.to_string()))
            }
        };

        Ok(PackageRun {
            package: package.id.clone(),
            skipped: None,
            tags_found: tags.len(),
            plan,
            removed,
            builds,
            manifest,
            manifest_error,
        })
    }

    /// Build one version directory.
    pub fn build(&self, package: &PackageConfig, tag: Tag, options: BuildOptions) -> BuildReport {
        self.build_with(&self.repo(package), package, tag, options)
    }

    fn build_with(&self, repo: &GitRepo, package: &PackageConfig, tag: Tag, options: BuildOptions) -> BuildReport {
        let mut report = BuildReport::new(&package.id, tag, options.dry_run);
        let dir = version_dir(&self.config.package_dir(&package.id), &tag);

        if options.dry_run {
            info!(package = %package.id, %tag, dir = %dir.display(), "would build");
            return report;
        }

        let _checkout = match repo.checkout_scoped(&tag) {
            Ok(guard) => guard,
            Err(e) => {
                report.fail(Stage::Checkout, e);
                return report;
            }
        };
        info!(package = %package.id, %tag, "building");

        if let Err(e) = reset_dir(&dir) {
            report.fail(Stage::Prepare, e);
            return report;
        }

        let api = self.extract_stage(package, &dir, &mut report);
        let examples = self.examples_stage(package, &dir, &mut report);
        if options.execute && !examples.is_empty() {
            self.execute_stage(&dir, &examples, &mut report);
        }

        let manifest = generate_version_manifest(self.config, &package.id, &tag.to_string(), examples);
        let manifest = match write_json_atomic(&dir.join(MANIFEST_FILE), &manifest) {
            Ok(()) => Some(manifest),
            Err(e) => {
                report.fail(Stage::Manifest, e);
                None
            }
        };

        let indexes = build_indexes(
            &package.id,
            api.as_ref(),
            manifest.as_ref(),
            &BasePaths::version(&package.id, &tag.to_string()),
        );
        match write_indexes(&dir, &indexes) {
            Ok(stats) => report.index = Some(stats),
            Err(e) => report.fail(Stage::Indexes, e),
        }

        info!(
            package = %package.id,
            %tag,
            modules = report.modules,
            examples = report.examples,
            failed_stages = report.failures.len(),
            "version done"
        );
        report
    }

    fn extract_stage(&self, package: &PackageConfig, dir: &Path, report: &mut BuildReport) -> Option<ApiDocument> {
        let doc = match self.extractor.extract(package) {
            Ok((doc, skipped)) => {
                report.skipped.merge(skipped);
                doc
            }
            Err(e) => {
                report.fail(Stage::Extract, e);
                return None;
            }
        };
        if doc.modules.is_empty() {
            info!(package = %package.id, tag = %report.tag, "no modules found");
            return None;
        }
        match write_json_atomic(&dir.join(API_FILE), &doc) {
            Ok(()) => {
                report.modules = doc.modules.len();
                Some(doc)
            }
            Err(e) => {
                report.fail(Stage::Extract, e);
                None
            }
        }
    }

    fn examples_stage(&self, package: &PackageConfig, dir: &Path, report: &mut BuildReport) -> Vec<ExampleMeta> {
        let Some(source) = package.examples.as_deref().filter(|p| p.is_dir()) else {
            info!(package = %package.id, tag = %report.tag, "no examples directory");
            return Vec::new();
        };
        let examples = match self.examples.copy_and_describe(source, dir) {
            Ok((examples, skipped)) => {
                report.skipped.merge(skipped);
                examples
            }
            Err(e) => {
                report.fail(Stage::Examples, e);
                Vec::new()
            }
        };
        report.examples = examples.len();

        if let Some(figures) = package.figures.as_deref() {
            if let Err(e) = copy_figures(figures, dir) {
                report.fail(Stage::Figures, e);
            }
        }
        examples
    }

    fn execute_stage(&self, dir: &Path, examples: &[ExampleMeta], report: &mut BuildReport) {
        match self.executor.execute_all(dir, examples) {
            Ok(results) => {
                report.executed = results.len();
                report.execution_failures = results
                    .into_iter()
                    .filter(|(_, r)| !r.success)
                    .map(|(stem, _)| stem)
                    .collect();
            }
            Err(e) => report.fail(Stage::Execute, e),
        }
    }
}

/// Start every build from an empty version directory so reruns are
/// byte-for-byte repeatable.
fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}
