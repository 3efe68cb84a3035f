//! Configuration data structures for docforge.
//!
//! Defines the YAML config format: the package table, example categories,
//! and the knobs for the external collaborators (git, extractor, notebook
//! execution, embeddings). The loaded value is immutable and handed to each
//! component at construction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocError, Result};
use crate::types::MinorVersion;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a documentation corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsConfig {
    /// Output root; version directories live at `{static_dir}/{package}/{tag}`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Documented packages, in display order.
    #[serde(default)]
    pub packages: Vec<PackageConfig>,

    /// Example categories, written verbatim into every version manifest.
    #[serde(default)]
    pub categories: Vec<CategoryDef>,

    /// Notebook stem → category and tags.
    #[serde(default)]
    pub example_categories: BTreeMap<String, ExampleCategory>,

    /// Notebook stems that are copied but never executed.
    #[serde(default)]
    pub non_executable: BTreeSet<String>,

    /// Module names containing any of these substrings are not documented.
    #[serde(default)]
    pub skip_module_patterns: Vec<String>,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl DocsConfig {
    /// Load a YAML config file. Relative paths inside it resolve against the
    /// directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: DocsConfig = serde_yaml::from_str(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Look up a package by id.
    pub fn package(&self, id: &str) -> Result<&PackageConfig> {
        self.packages
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| DocError::UnknownPackage(id.to_string()))
    }

    /// The packages a command should visit: one if `only` is given, else all.
    pub fn selected_packages(&self, only: Option<&str>) -> Result<Vec<&PackageConfig>> {
        match only {
            Some(id) => Ok(vec![self.package(id)?]),
            None => Ok(self.packages.iter().collect()),
        }
    }

    /// `{static_dir}/{package}`.
    pub fn package_dir(&self, package_id: &str) -> PathBuf {
        self.static_dir.join(package_id)
    }

    /// Display order of a category; unknown categories sort last.
    pub fn category_order(&self, category: &str) -> u32 {
        self.categories
            .iter()
            .find(|c| c.id == category)
            .map(|c| c.order)
            .unwrap_or(UNKNOWN_CATEGORY_ORDER)
    }

    /// Category and tags for a notebook stem, defaulting to `advanced`.
    pub fn example_category(&self, stem: &str) -> ExampleCategory {
        self.example_categories
            .get(stem)
            .cloned()
            .unwrap_or_else(|| ExampleCategory {
                category: DEFAULT_CATEGORY.to_string(),
                tags: Vec::new(),
            })
    }

    pub fn is_executable(&self, stem: &str) -> bool {
        !self.non_executable.contains(stem)
    }

    pub fn should_skip_module(&self, module_name: &str) -> bool {
        self.skip_module_patterns
            .iter()
            .any(|p| module_name.contains(p.as_str()))
    }

    fn resolve_paths(&mut self, base: &Path) {
        self.static_dir = resolve(base, &self.static_dir);
        for pkg in &mut self.packages {
            pkg.repo = resolve(base, &pkg.repo);
            pkg.source = resolve(base, &pkg.source);
            pkg.examples = pkg.examples.as_ref().map(|p| resolve(base, p));
            pkg.figures = pkg.figures.as_ref().map(|p| resolve(base, p));
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for pkg in &self.packages {
            if pkg.id.is_empty() || pkg.id.contains(['/', '\\']) {
                return Err(DocError::Config(format!("invalid package id '{}'", pkg.id)));
            }
            if !seen.insert(pkg.id.as_str()) {
                return Err(DocError::Config(format!("duplicate package id '{}'", pkg.id)));
            }
        }
        if self.execution.max_workers == 0 {
            return Err(DocError::Config("execution.max_workers must be at least 1".into()));
        }
        Ok(())
    }
}

/// Sort key given to categories missing from the category table.
pub const UNKNOWN_CATEGORY_ORDER: u32 = 99;

/// Category assigned to notebooks without an explicit mapping.
pub const DEFAULT_CATEGORY: &str = "advanced";

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

// ---------------------------------------------------------------------------
// PackageConfig
// ---------------------------------------------------------------------------

/// One documented package and where its sources live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Short id used in output paths (`static/{id}/...`).
    pub id: String,

    pub display_name: String,

    #[serde(default)]
    pub description: String,

    /// Git checkout whose tags define the versions.
    pub repo: PathBuf,

    /// Source root handed to the API extractor.
    pub source: PathBuf,

    /// Directory of example notebooks, if the package has any.
    #[serde(default)]
    pub examples: Option<PathBuf>,

    /// Directory of static figures referenced by the notebooks.
    #[serde(default)]
    pub figures: Option<PathBuf>,

    /// Top-level modules the extractor walks.
    #[serde(default)]
    pub root_modules: Vec<String>,

    /// Oldest minor line that is still documented.
    #[serde(default = "default_min_supported")]
    pub min_supported: MinorVersion,
}

fn default_min_supported() -> MinorVersion {
    MinorVersion::new(0, 1)
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// An example category as listed in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub id: String,
    pub title: String,
    pub order: u32,
}

/// Category and tags assigned to one notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleCategory {
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Collaborator settings
// ---------------------------------------------------------------------------

/// Bounds for git subprocesses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_git_timeout(),
        }
    }
}

fn default_git_timeout() -> u64 {
    60
}

/// External API extractor invocation.
///
/// The command receives `{package} {source} {root modules...}` as trailing
/// arguments and prints `{"modules": {...}}` on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_command")]
    pub command: Vec<String>,

    #[serde(default = "default_extractor_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            command: default_extractor_command(),
            timeout_secs: default_extractor_timeout(),
        }
    }
}

fn default_extractor_command() -> Vec<String> {
    vec!["python3".into(), "scripts/extract-api.py".into()]
}

fn default_extractor_timeout() -> u64 {
    600
}

/// Notebook execution pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worker threads, each driving one notebook subprocess at a time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-notebook kernel timeout.
    #[serde(default = "default_notebook_timeout")]
    pub timeout_secs: u64,

    /// Executor command; the notebook path and output name are appended.
    #[serde(default = "default_execution_command")]
    pub command: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            timeout_secs: default_notebook_timeout(),
            command: default_execution_command(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_notebook_timeout() -> u64 {
    300
}

fn default_execution_command() -> Vec<String> {
    [
        "jupyter",
        "nbconvert",
        "--to",
        "notebook",
        "--execute",
        "--ExecutePreprocessor.kernel_name=python3",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Embedding model identity recorded in `embeddings-index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dim: default_embedding_dim(),
        }
    }
}

fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".into()
}

fn default_embedding_dim() -> usize {
    384
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
