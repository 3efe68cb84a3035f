//! Command-line surface.
//!
//! Each subcommand maps to a `cmd_*` function that walks the selected
//! packages, prints a per-package / per-version trace to stdout, and returns
//! a [`RunSummary`]. Structured logs go to stderr via `tracing`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use tracing::error;

use crate::config::{DocsConfig, PackageConfig, CONFIG_FILE};
use crate::embeddings::{needs_regeneration, regenerate_version_embeddings, Embedder, EmbeddingOutcome};
use crate::error::{DocError, Result};
use crate::git::GitRepo;
use crate::index::{build_site_index, regenerate_version_indexes};
use crate::lifecycle::LifecyclePlanner;
use crate::manifest::PackageManifestAggregator;
use crate::observability::RunSummary;
use crate::pipeline::{rebuild_manifest, BuildOptions, BuildReport, PackageRun, PipelineRunner};
use crate::storage::{scan_version_dirs, version_dir, SEARCH_INDEX_FILE};
use crate::types::Tag;

/// Exit status when every unit succeeded or was skipped.
pub const EXIT_OK: u8 = 0;
/// Exit status when at least one unit failed.
pub const EXIT_FAILED: u8 = 1;
/// Exit status for configuration errors detected before any work.
pub const EXIT_USAGE: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "docforge",
    version,
    about = "Build versioned API and example documentation from tagged releases"
)]
pub struct Cli {
    /// Config file (defaults to ./docforge.yaml, else the built-in package table)
    #[arg(long, short = 'c', global = true, env = "DOCFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build missing milestones and the latest release of each package
    Build {
        /// Only this package
        #[arg(long, short = 'p')]
        package: Option<String>,
        /// Rebuild every retained version, not just missing ones
        #[arg(long, short = 'a', default_value_t = false)]
        all: bool,
        /// Report the plan without writing anything
        #[arg(long, short = 'n', default_value_t = false)]
        dry_run: bool,
        /// Skip notebook execution
        #[arg(long, default_value_t = false)]
        no_execute: bool,
    },
    /// Regenerate search and crossref indexes from existing version data
    Indexes {
        #[arg(long, short = 'p')]
        package: Option<String>,
        #[arg(long, short = 'n', default_value_t = false)]
        dry_run: bool,
    },
    /// Regenerate semantic embeddings for versions whose search index changed
    Embeddings {
        #[arg(long, short = 'p')]
        package: Option<String>,
        /// Regenerate even when up to date
        #[arg(long, short = 'f', default_value_t = false)]
        force: bool,
        #[arg(long, short = 'n', default_value_t = false)]
        dry_run: bool,
    },
    /// Re-derive version manifests from copied notebooks, then package manifests
    Manifests {
        #[arg(long, short = 'p')]
        package: Option<String>,
        #[arg(long, short = 'n', default_value_t = false)]
        dry_run: bool,
    },
    /// Print which versions would be built and deleted
    Plan {
        #[arg(long, short = 'p')]
        package: Option<String>,
        #[arg(long, short = 'a', default_value_t = false)]
        all: bool,
    },
}

impl Command {
    fn package(&self) -> Option<&str> {
        match self {
            Self::Build { package, .. }
            | Self::Indexes { package, .. }
            | Self::Embeddings { package, .. }
            | Self::Manifests { package, .. }
            | Self::Plan { package, .. } => package.as_deref(),
        }
    }
}

/// Resolve the config: an explicit file, `./docforge.yaml`, or the built-in
/// table rooted at the current directory.
pub fn load_config(explicit: Option<&Path>) -> Result<DocsConfig> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(DocError::Config(format!("config file not found: {}", path.display())));
        }
        return DocsConfig::load(path);
    }
    let cwd = std::env::current_dir()?;
    let local = cwd.join(CONFIG_FILE);
    if local.is_file() {
        return DocsConfig::load(&local);
    }
    let repos_root = cwd.parent().unwrap_or(&cwd).to_path_buf();
    Ok(DocsConfig::builtin(&repos_root, cwd.join("static")))
}

/// Run a parsed command line and map the outcome to an exit status.
pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let packages = match config.selected_packages(cli.command.package()) {
        Ok(packages) => packages,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let result = match &cli.command {
        Command::Build {
            all,
            dry_run,
            no_execute,
            ..
        } => cmd_build(
            &config,
            &packages,
            BuildOptions {
                force_all: *all,
                dry_run: *dry_run,
                execute: !*no_execute,
            },
        ),
        Command::Indexes { dry_run, .. } => cmd_indexes(&config, &packages, *dry_run),
        Command::Embeddings { force, dry_run, .. } => cmd_embeddings(&config, &packages, *force, *dry_run),
        Command::Manifests { dry_run, .. } => cmd_manifests(&config, &packages, *dry_run),
        Command::Plan { all, .. } => cmd_plan(&config, &packages, *all),
    };

    match result {
        Ok(summary) => {
            println!("\n{} {summary} ({} ms)", style("Summary:").bold(), summary.elapsed_ms());
            if summary.has_failures() {
                ExitCode::from(EXIT_FAILED)
            } else {
                ExitCode::from(EXIT_OK)
            }
        }
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("{} {e}", style("error:").red().bold());
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn heading(package: &PackageConfig) {
    println!("\n{}", style(format!("{} ({})", package.display_name, package.id)).bold().cyan());
}

/// Version directories of one package. A scan error fails that package
/// only; the caller moves on to the next one.
fn package_versions(package: &PackageConfig, package_dir: &Path, summary: &mut RunSummary) -> Option<BTreeSet<Tag>> {
    match scan_version_dirs(package_dir) {
        Ok(tags) => Some(tags),
        Err(e) => {
            error!(package = %package.id, error = %e, "could not scan versions");
            println!("  {} {e}", style("error:").red());
            summary.fail();
            None
        }
    }
}

fn tag_list(tags: &[Tag]) -> String {
    if tags.is_empty() {
        "none".to_string()
    } else {
        tags.iter().map(Tag::to_string).collect::<Vec<_>>().join(", ")
    }
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

pub fn cmd_build(config: &DocsConfig, packages: &[&PackageConfig], options: BuildOptions) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    println!(
        "Mode: {}{}{}",
        if options.force_all { "rebuild all" } else { "missing + latest" },
        if options.execute { "" } else { ", no execution" },
        if options.dry_run { ", dry run" } else { "" }
    );

    let runner = PipelineRunner::from_config(config);
    for package in packages {
        heading(package);
        match runner.build_package(package, options) {
            Ok(run) => print_package_run(&run, &mut summary),
            Err(e) => {
                error!(package = %package.id, error = %e, "package failed");
                println!("  {} {e}", style("error:").red());
                summary.fail();
            }
        }
    }

    site_index(config, options.dry_run, &mut summary);
    Ok(summary)
}

fn print_package_run(run: &PackageRun, summary: &mut RunSummary) {
    if let Some(reason) = &run.skipped {
        println!("  skipped: {reason}");
        summary.skip();
        return;
    }
    println!("  {} tags found", run.tags_found);
    if run.plan.is_empty() {
        println!("  all versions up to date (use --all to rebuild)");
    } else {
        println!("  build:  {}", tag_list(&run.plan.to_build));
        println!("  delete: {}", tag_list(&run.plan.to_delete));
    }
    for build in &run.builds {
        print_build(build);
        summary.record(build.success());
    }
    if let Some(manifest) = &run.manifest {
        println!(
            "  manifest: latest {}, {} version(s)",
            manifest.latest_tag,
            manifest.versions.len()
        );
    }
    if let Some(message) = &run.manifest_error {
        println!("  manifest: {} {message}", style("FAILED").red().bold());
        summary.fail();
    }
}

fn print_build(build: &BuildReport) {
    if build.dry_run {
        println!("  {}  would build", build.tag);
        return;
    }
    let status = if build.success() {
        style("ok").green()
    } else {
        style("FAILED").red().bold()
    };
    let mut line = format!(
        "  {}  {status}  {} modules, {} examples",
        build.tag, build.modules, build.examples
    );
    if build.executed > 0 {
        line.push_str(&format!(
            ", {}/{} executed",
            build.executed - build.execution_failures.len(),
            build.executed
        ));
    }
    if let Some(index) = &build.index {
        line.push_str(&format!(", {} search entries", index.search_entries));
    }
    println!("{line}");
    for failure in &build.failures {
        println!("      {}: {}", failure.stage, failure.message);
    }
    for stem in &build.execution_failures {
        println!("      execution failed: {stem}");
    }
    if !build.skipped.is_empty() {
        println!("      {} entities skipped", build.skipped.len());
    }
}

fn site_index(config: &DocsConfig, dry_run: bool, summary: &mut RunSummary) {
    match build_site_index(config, dry_run) {
        Ok(stats) => println!(
            "\nSite index: {} package(s), {} search entries, {} crossref keys",
            stats.packages, stats.index.search_entries, stats.index.crossref_keys
        ),
        Err(e) => {
            error!(error = %e, "site index failed");
            println!("\nSite index: {} {e}", style("error:").red());
            summary.fail();
        }
    }
}

// ---------------------------------------------------------------------------
// indexes
// ---------------------------------------------------------------------------

pub fn cmd_indexes(config: &DocsConfig, packages: &[&PackageConfig], dry_run: bool) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    for package in packages {
        heading(package);
        let package_dir = config.package_dir(&package.id);
        let Some(tags) = package_versions(package, &package_dir, &mut summary) else {
            continue;
        };
        if tags.is_empty() {
            println!("  no versions found");
            continue;
        }
        for tag in tags.iter().rev() {
            let dir = version_dir(&package_dir, tag);
            if dry_run {
                println!("  {tag}  would regenerate");
                summary.succeed();
                continue;
            }
            match regenerate_version_indexes(&package.id, &tag.to_string(), &dir) {
                Ok(stats) => {
                    println!(
                        "  {tag}  {} search entries, {} crossref keys",
                        stats.search_entries, stats.crossref_keys
                    );
                    summary.succeed();
                }
                Err(e) => {
                    error!(package = %package.id, %tag, error = %e, "index regeneration failed");
                    println!("  {tag}  {} {e}", style("FAILED").red().bold());
                    summary.fail();
                }
            }
        }
    }
    site_index(config, dry_run, &mut summary);
    Ok(summary)
}

// ---------------------------------------------------------------------------
// embeddings
// ---------------------------------------------------------------------------

#[cfg(feature = "embedding")]
fn load_embedder(config: &DocsConfig) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(crate::embeddings::FastEmbedder::try_new(&config.embedding)?))
}

#[cfg(not(feature = "embedding"))]
fn load_embedder(_config: &DocsConfig) -> Result<Box<dyn Embedder>> {
    Err(DocError::Config(
        "docforge was built without the `embedding` feature".into(),
    ))
}

pub fn cmd_embeddings(
    config: &DocsConfig,
    packages: &[&PackageConfig],
    force: bool,
    dry_run: bool,
) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    println!("Mode: {}", if force { "force" } else { "incremental" });
    // Loaded on first use; model start-up is expensive.
    let mut embedder: Option<std::result::Result<Box<dyn Embedder>, String>> = None;

    for package in packages {
        heading(package);
        let package_dir = config.package_dir(&package.id);
        let Some(tags) = package_versions(package, &package_dir, &mut summary) else {
            continue;
        };
        if tags.is_empty() {
            println!("  no versions found");
            continue;
        }
        for tag in &tags {
            let dir = version_dir(&package_dir, tag);
            if !dir.join(SEARCH_INDEX_FILE).is_file() {
                println!("  {tag}  no search index (skipped)");
                summary.skip();
                continue;
            }
            if !force && !needs_regeneration(&dir) {
                println!("  {tag}  up to date (skipped)");
                summary.skip();
                continue;
            }
            if dry_run {
                println!("  {tag}  would generate embeddings");
                summary.succeed();
                continue;
            }

            let loaded = embedder.get_or_insert_with(|| load_embedder(config).map_err(|e| e.to_string()));
            let outcome = match loaded {
                Ok(e) => regenerate_version_embeddings(&dir, &**e, force, false),
                Err(message) => Err(DocError::Config(message.clone())),
            };
            match outcome {
                Ok(EmbeddingOutcome::Generated { count }) => {
                    println!("  {tag}  {count} embeddings");
                    summary.succeed();
                }
                Ok(_) => {
                    println!("  {tag}  skipped");
                    summary.skip();
                }
                Err(e) => {
                    error!(package = %package.id, %tag, error = %e, "embedding failed");
                    println!("  {tag}  {} {e}", style("FAILED").red().bold());
                    summary.fail();
                }
            }
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// manifests
// ---------------------------------------------------------------------------

pub fn cmd_manifests(config: &DocsConfig, packages: &[&PackageConfig], dry_run: bool) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    let aggregator = PackageManifestAggregator::new(config);
    for package in packages {
        heading(package);
        let package_dir = config.package_dir(&package.id);
        let Some(tags) = package_versions(package, &package_dir, &mut summary) else {
            continue;
        };
        for tag in tags.iter().rev() {
            match rebuild_manifest(config, &version_dir(&package_dir, tag), dry_run) {
                Ok(Some((manifest, skipped))) => {
                    println!("  {tag}  {} notebooks", manifest.notebooks.len());
                    for s in &skipped.skipped {
                        println!("      skipped {}: {}", s.entity, s.reason);
                    }
                    summary.succeed();
                }
                Ok(None) => {
                    println!("  {tag}  no notebooks (skipped)");
                    summary.skip();
                }
                Err(e) => {
                    error!(package = %package.id, %tag, error = %e, "manifest rebuild failed");
                    println!("  {tag}  {} {e}", style("FAILED").red().bold());
                    summary.fail();
                }
            }
        }
        match aggregator.write(package, dry_run) {
            Ok(Some(manifest)) => println!(
                "  manifest: latest {}, {} version(s)",
                manifest.latest_tag,
                manifest.versions.len()
            ),
            Ok(None) => println!("  no versions found"),
            Err(e) => {
                error!(package = %package.id, error = %e, "package manifest failed");
                println!("  manifest: {} {e}", style("FAILED").red().bold());
                summary.fail();
            }
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

pub fn cmd_plan(config: &DocsConfig, packages: &[&PackageConfig], force_all: bool) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    for package in packages {
        heading(package);
        let repo = GitRepo::new(&package.repo, std::time::Duration::from_secs(config.git.timeout_secs));
        if !repo.exists() {
            println!("  repository not found: {}", package.repo.display());
            summary.skip();
            continue;
        }
        let tags = repo.list_tags();
        let package_dir = config.package_dir(&package.id);
        let plan = match LifecyclePlanner::new(&package_dir).plan_package(package, &tags, force_all) {
            Ok(plan) => plan,
            Err(e) => {
                error!(package = %package.id, error = %e, "planning failed");
                println!("  {} {e}", style("error:").red());
                summary.fail();
                continue;
            }
        };
        println!("  {} tags, minimum supported {}", tags.len(), package.min_supported);
        println!("  build:  {}", tag_list(&plan.to_build));
        println!("  delete: {}", tag_list(&plan.to_delete));
        summary.succeed();
    }
    Ok(summary)
}
