//! Example notebooks: copy, clean, and describe.
//!
//! Notebooks are copied into `{version}/notebooks/` with every code cell's
//! outputs cleared, and described by metadata pulled from their markdown
//! cells plus the category table in the config. The resulting list feeds
//! the version manifest.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DocsConfig;
use crate::error::Result;
use crate::storage::{read_json, read_json_opt, write_json_atomic, MANIFEST_FILE};
use crate::types::{ExampleMeta, Outcome, SkipReport, VersionManifest};

pub const NOTEBOOKS_DIR: &str = "notebooks";
pub const FIGURES_DIR: &str = "figures";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "gif"];
const DEFAULT_TITLE: &str = "Untitled";
const DEFAULT_DESCRIPTION: &str = "Example notebook";
const MAX_DESCRIPTION_CHARS: usize = 200;

/// Copies example sources into a version directory and describes them.
pub trait ExampleSource: Send + Sync {
    fn copy_and_describe(&self, source_dir: &Path, version_dir: &Path)
        -> Result<(Vec<ExampleMeta>, SkipReport)>;
}

/// Jupyter notebook implementation of [`ExampleSource`].
#[derive(Debug, Clone, Copy)]
pub struct NotebookSource<'a> {
    config: &'a DocsConfig,
}

impl<'a> NotebookSource<'a> {
    pub fn new(config: &'a DocsConfig) -> Self {
        Self { config }
    }
}

impl ExampleSource for NotebookSource<'_> {
    fn copy_and_describe(
        &self,
        source_dir: &Path,
        version_dir: &Path,
    ) -> Result<(Vec<ExampleMeta>, SkipReport)> {
        let mut report = SkipReport::default();
        if !source_dir.is_dir() {
            return Ok((Vec::new(), report));
        }

        let out_dir = version_dir.join(NOTEBOOKS_DIR);
        std::fs::create_dir_all(&out_dir)?;

        let mut examples = Vec::new();
        for path in notebook_files(source_dir)? {
            let file = file_name(&path);
            let outcome = match read_json::<Value>(&path) {
                Ok(notebook) => copy_one(self.config, &file, &notebook, &out_dir),
                Err(e) => Outcome::Skipped(format!("could not parse: {e}")),
            };
            if let Some(meta) = report.take(&file, outcome) {
                examples.push(meta);
            }
        }
        for skipped in &report.skipped {
            warn!(example = %skipped.entity, reason = %skipped.reason, "skipped notebook");
        }

        copy_style_files(source_dir, version_dir)?;
        Ok((examples, report))
    }
}

fn copy_one(config: &DocsConfig, file: &str, notebook: &Value, out_dir: &Path) -> Outcome<ExampleMeta> {
    let meta = describe(config, file, notebook);
    match write_notebook(&out_dir.join(file), &strip_outputs(notebook)) {
        Ok(()) => Outcome::Ok(meta),
        Err(e) => Outcome::Skipped(format!("could not write: {e}")),
    }
}

/// `*.ipynb` files directly in `dir`, sorted by name.
fn notebook_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "ipynb") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Matplotlib style sheets sitting next to the examples directory are
/// referenced as `../*.mplstyle` from the notebooks.
fn copy_style_files(source_dir: &Path, version_dir: &Path) -> Result<()> {
    let Some(parent) = source_dir.parent() else {
        return Ok(());
    };
    for entry in std::fs::read_dir(parent)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "mplstyle") {
            std::fs::copy(&path, version_dir.join(file_name(&path)))?;
        }
    }
    Ok(())
}

/// Copy image files from `source_dir` (and one level of subdirectories)
/// into `{version}/figures/`. Returns the number of files copied.
pub fn copy_figures(source_dir: &Path, version_dir: &Path) -> Result<usize> {
    if !source_dir.is_dir() {
        return Ok(0);
    }
    let target = version_dir.join(FIGURES_DIR);
    let mut copied = 0;
    for entry in WalkDir::new(source_dir).min_depth(1).max_depth(2) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }
        let rel = entry.path().strip_prefix(source_dir).unwrap_or(entry.path());
        let dest = target.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(entry.path(), &dest)?;
        copied += 1;
    }
    debug!(copied, "figures copied");
    Ok(copied)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

// ---------------------------------------------------------------------------
// Notebook content
// ---------------------------------------------------------------------------

/// Describe one notebook from its content and the config tables.
pub fn describe(config: &DocsConfig, file: &str, notebook: &Value) -> ExampleMeta {
    let stem = file.strip_suffix(".ipynb").unwrap_or(file);
    let mapping = config.example_category(stem);
    ExampleMeta {
        slug: slugify(stem),
        file: file.to_string(),
        title: extract_title(notebook),
        description: extract_description(notebook),
        category: mapping.category,
        tags: mapping.tags,
        executable: config.is_executable(stem),
        thumbnail: extract_thumbnail(notebook),
    }
}

/// Lowercase, with `_` and spaces turned into `-`.
pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace(['_', ' '], "-")
}

/// Clone of `notebook` with code cell outputs and execution counts cleared.
pub fn strip_outputs(notebook: &Value) -> Value {
    let mut clean = notebook.clone();
    if let Some(cells) = clean.get_mut("cells").and_then(Value::as_array_mut) {
        for cell in cells {
            if cell.get("cell_type").and_then(Value::as_str) == Some("code") {
                if let Some(obj) = cell.as_object_mut() {
                    obj.insert("outputs".into(), Value::Array(Vec::new()));
                    obj.insert("execution_count".into(), Value::Null);
                }
            }
        }
    }
    clean
}

/// Notebooks are written with one-space indentation, as Jupyter does.
fn write_notebook(path: &Path, notebook: &Value) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    notebook.serialize(&mut ser)?;
    buf.push(b'\n');
    std::fs::write(path, buf)?;
    Ok(())
}

/// Joined source text of every markdown cell, in order.
fn markdown_cells(notebook: &Value) -> impl Iterator<Item = String> + '_ {
    notebook
        .get("cells")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|c| c.get("cell_type").and_then(Value::as_str) == Some("markdown"))
        .map(|c| cell_source(c))
}

/// Cell source may be a string or a list of lines.
pub fn cell_source(cell: &Value) -> String {
    match cell.get("source") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// First level-one heading of any markdown cell.
pub fn extract_title(notebook: &Value) -> String {
    static H1: OnceLock<Regex> = OnceLock::new();
    let h1 = regex(&H1, r"(?m)^#[ \t]+(.+?)[ \t]*$");
    markdown_cells(notebook)
        .find_map(|src| h1.captures(&src).map(|c| c[1].trim().to_string()))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// First line of prose after the title, with markdown markup removed.
///
/// A cell holding only the title line marks the title as found; before
/// that, cells opening with a level-one heading are passed over.
pub fn extract_description(notebook: &Value) -> String {
    static TITLE_ONLY: OnceLock<Regex> = OnceLock::new();
    static OPENS_WITH_H1: OnceLock<Regex> = OnceLock::new();
    let title_only = regex(&TITLE_ONLY, r"^#\s+[^\n]+\s*$");
    let opens_with_h1 = regex(&OPENS_WITH_H1, r"^#\s+");

    let mut found_title = false;
    for src in markdown_cells(notebook) {
        if title_only.is_match(src.trim()) {
            found_title = true;
            continue;
        }
        if !found_title && opens_with_h1.is_match(&src) {
            continue;
        }
        if let Some(line) = strip_markdown(&src)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
        {
            return truncate_description(line);
        }
    }
    DEFAULT_DESCRIPTION.to_string()
}

fn strip_markdown(src: &str) -> String {
    static LINK: OnceLock<Regex> = OnceLock::new();
    static CODE: OnceLock<Regex> = OnceLock::new();
    static BOLD: OnceLock<Regex> = OnceLock::new();
    static ITALIC: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();
    static MATH: OnceLock<Regex> = OnceLock::new();

    let text = regex(&LINK, r"\[([^\]]+)\]\([^)]+\)").replace_all(src, "$1");
    let text = regex(&CODE, r"`[^`]+`").replace_all(&text, "");
    let text = regex(&BOLD, r"\*\*([^*]+)\*\*").replace_all(&text, "$1");
    let text = regex(&ITALIC, r"\*([^*]+)\*").replace_all(&text, "$1");
    let text = regex(&HEADING, r"(?m)^[ \t]*#+[ \t]+.+$").replace_all(&text, "");
    let text = regex(&MATH, r"\$[^$]+\$").replace_all(&text, "");
    text.into_owned()
}

fn truncate_description(line: &str) -> String {
    if line.chars().count() > MAX_DESCRIPTION_CHARS {
        let head: String = line.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
        format!("{head}...")
    } else {
        line.to_string()
    }
}

/// First image referenced from a markdown cell, relative to the figures
/// directory when the reference goes through one.
pub fn extract_thumbnail(notebook: &Value) -> Option<String> {
    static IMAGE: OnceLock<Regex> = OnceLock::new();
    let image = regex(
        &IMAGE,
        r#"!\[[^\]]*\]\(([^)\s]+)[^)]*\)|<img[^>]*\ssrc=["']([^"']+)["']"#,
    );
    let reference = markdown_cells(notebook).find_map(|src| {
        image
            .captures(&src)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
    })?;

    let normalized = reference.replace('\\', "/");
    let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
    match parts.iter().position(|p| *p == FIGURES_DIR) {
        Some(i) if i + 1 < parts.len() => Some(parts[i + 1..].join("/")),
        _ => parts.last().map(|s| s.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Build the version manifest: examples sorted by (category order, title).
pub fn generate_version_manifest(
    config: &DocsConfig,
    package_id: &str,
    tag: &str,
    mut notebooks: Vec<ExampleMeta>,
) -> VersionManifest {
    notebooks.sort_by(|a, b| {
        config
            .category_order(&a.category)
            .cmp(&config.category_order(&b.category))
            .then_with(|| a.title.cmp(&b.title))
    });
    VersionManifest {
        package: package_id.to_string(),
        tag: tag.to_string(),
        notebooks,
        categories: config.categories.clone(),
    }
}

/// Re-derive a version manifest from the notebooks already copied into
/// `version_dir`, without executing anything.
///
/// Package and tag come from the existing manifest; when it is missing or
/// unreadable they fall back to the directory names. Returns `None` when
/// the version has no copied notebooks.
pub fn rebuild_manifest(
    config: &DocsConfig,
    version_dir: &Path,
    dry_run: bool,
) -> Result<Option<(VersionManifest, SkipReport)>> {
    let notebooks_dir = version_dir.join(NOTEBOOKS_DIR);
    let manifest_path = version_dir.join(MANIFEST_FILE);
    if !notebooks_dir.is_dir() {
        return Ok(None);
    }
    let existing: Value = read_json_opt(&manifest_path).unwrap_or(Value::Null);
    let package_id = existing
        .get("package")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| dir_name(version_dir.parent()))
        .unwrap_or_default();
    let tag = existing
        .get("tag")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| dir_name(Some(version_dir)))
        .unwrap_or_default();

    let mut report = SkipReport::default();
    let mut examples = Vec::new();
    for path in notebook_files(&notebooks_dir)? {
        let file = file_name(&path);
        match read_json::<Value>(&path) {
            Ok(notebook) => examples.push(describe(config, &file, &notebook)),
            Err(e) => report.record(&file, format!("could not parse: {e}")),
        }
    }

    let manifest = generate_version_manifest(config, &package_id, &tag, examples);
    if !dry_run {
        write_json_atomic(&manifest_path, &manifest)?;
    }
    Ok(Some((manifest, report)))
}

fn dir_name(path: Option<&Path>) -> Option<String> {
    path.and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
