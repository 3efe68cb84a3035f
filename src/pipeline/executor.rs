//! Example execution stage.
//!
//! Each executable notebook runs in its own process under a timeout, on a
//! fixed-size worker pool. Captured outputs are written per example to
//! `{version}/outputs/{stem}.json`, and image outputs to
//! `{version}/figures/{stem}_{n}.{ext}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use base64::Engine;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ExecutionConfig;
use crate::error::{DocError, Result};
use crate::process::run_with_timeout;
use crate::storage::{read_json, write_json_atomic};
use crate::types::ExampleMeta;

use super::notebooks::{FIGURES_DIR, NOTEBOOKS_DIR};

pub const OUTPUTS_DIR: &str = "outputs";

/// Mime types captured as figures, in preference order, with the file
/// extension they are saved under.
const FIGURE_MIME_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/svg+xml", "svg"),
];

/// Captured output of one code cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub figures: Vec<String>,
}

impl CellOutput {
    fn is_empty(&self) -> bool {
        self.stdout.as_deref().map_or(true, str::is_empty)
            && self.stderr.as_deref().map_or(true, str::is_empty)
            && self.figures.is_empty()
    }
}

/// Result of executing one example, as persisted to `outputs/{stem}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Code-cell index → captured output. Cells without output are omitted.
    pub cells: BTreeMap<usize, CellOutput>,
    pub executed_at: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failed(error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            cells: BTreeMap::new(),
            executed_at: now(),
            duration_ms: elapsed_ms(started),
            error: Some(error.into()),
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Executes the examples copied into a version directory.
pub trait ExampleExecutor: Send + Sync {
    /// Run every executable example. The returned map is keyed by file stem;
    /// a failing example is a failed entry, never an `Err`.
    fn execute_all(
        &self,
        version_dir: &Path,
        examples: &[ExampleMeta],
    ) -> Result<BTreeMap<String, ExecutionResult>>;
}

/// Runs notebooks through an external command on a bounded thread pool.
///
/// The command is invoked as
/// `{command...} --output {stem}.executed.ipynb {notebook}` from inside the
/// notebooks directory and must leave the executed notebook at that path.
#[derive(Debug, Clone)]
pub struct NotebookExecutor {
    command: Vec<String>,
    timeout: Duration,
    max_workers: usize,
}

impl NotebookExecutor {
    pub fn new(settings: &ExecutionConfig) -> Self {
        Self {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_workers: settings.max_workers.max(1),
        }
    }

    fn execute_one(&self, notebooks_dir: &Path, figures_dir: &Path, stem: &str, file: &str) -> ExecutionResult {
        let started = Instant::now();
        let executed = notebooks_dir.join(format!("{stem}.executed.ipynb"));

        let result = self
            .run_command(notebooks_dir, file, &executed)
            .and_then(|()| read_json::<Value>(&executed))
            .and_then(|nb| collect_cell_outputs(&nb, stem, figures_dir));
        let _ = std::fs::remove_file(&executed);

        match result {
            Ok(cells) => ExecutionResult {
                success: true,
                cells,
                executed_at: now(),
                duration_ms: elapsed_ms(started),
                error: None,
            },
            Err(DocError::Timeout { .. }) => ExecutionResult::failed("Timeout", started),
            Err(e) => ExecutionResult::failed(e.to_string(), started),
        }
    }

    fn run_command(&self, notebooks_dir: &Path, file: &str, executed: &Path) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(DocError::Config("execution command is empty".into()));
        };
        let output_name = executed
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output")
            .arg(output_name)
            .arg(file)
            .current_dir(notebooks_dir);
        let output = run_with_timeout(&mut cmd, self.timeout, file)?;
        if output.success() {
            Ok(())
        } else {
            Err(DocError::stage("execute", output.stderr_summary()))
        }
    }
}

impl ExampleExecutor for NotebookExecutor {
    fn execute_all(
        &self,
        version_dir: &Path,
        examples: &[ExampleMeta],
    ) -> Result<BTreeMap<String, ExecutionResult>> {
        let runnable: Vec<&ExampleMeta> = examples.iter().filter(|e| e.executable).collect();
        if runnable.is_empty() {
            return Ok(BTreeMap::new());
        }

        let notebooks_dir = version_dir.join(NOTEBOOKS_DIR);
        let outputs_dir = version_dir.join(OUTPUTS_DIR);
        let figures_dir = version_dir.join(FIGURES_DIR);
        std::fs::create_dir_all(&outputs_dir)?;
        std::fs::create_dir_all(&figures_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| DocError::Other(format!("failed to start execution pool: {e}")))?;

        let results: Vec<(String, ExecutionResult)> = pool.install(|| {
            runnable
                .par_iter()
                .map(|example| {
                    let stem = example.stem().to_string();
                    let result = self.execute_one(&notebooks_dir, &figures_dir, &stem, &example.file);
                    if result.success {
                        info!(example = %example.file, ms = result.duration_ms, "executed");
                    } else {
                        warn!(
                            example = %example.file,
                            error = result.error.as_deref().unwrap_or_default(),
                            "execution failed"
                        );
                    }
                    (stem, result)
                })
                .collect()
        });

        let mut by_stem = BTreeMap::new();
        for (stem, result) in results {
            write_json_atomic(&outputs_dir.join(format!("{stem}.json")), &result)?;
            by_stem.insert(stem, result);
        }
        Ok(by_stem)
    }
}

/// Pull stream text and image outputs out of an executed notebook, writing
/// each image to `figures_dir` as `{stem}_{n}.{ext}`.
pub fn collect_cell_outputs(
    notebook: &Value,
    stem: &str,
    figures_dir: &Path,
) -> Result<BTreeMap<usize, CellOutput>> {
    let mut cells = BTreeMap::new();
    let mut figure_count = 0usize;

    let all_cells = notebook.get("cells").and_then(Value::as_array);
    for (index, cell) in all_cells.into_iter().flatten().enumerate() {
        if cell.get("cell_type").and_then(Value::as_str) != Some("code") {
            continue;
        }
        let mut out = CellOutput::default();
        let outputs = cell.get("outputs").and_then(Value::as_array);
        for output in outputs.into_iter().flatten() {
            match output.get("output_type").and_then(Value::as_str) {
                Some("stream") => {
                    let text = joined_text(output.get("text"));
                    let slot = if output.get("name").and_then(Value::as_str) == Some("stderr") {
                        &mut out.stderr
                    } else {
                        &mut out.stdout
                    };
                    slot.get_or_insert_with(String::new).push_str(&text);
                }
                Some("display_data" | "execute_result") => {
                    let Some(data) = output.get("data") else { continue };
                    if let Some(name) = save_figure(data, stem, figure_count, figures_dir)? {
                        out.figures.push(name);
                        figure_count += 1;
                    }
                }
                _ => {}
            }
        }
        if !out.is_empty() {
            cells.insert(index, out);
        }
    }
    Ok(cells)
}

/// Save the first supported image representation in `data`, if any.
fn save_figure(data: &Value, stem: &str, n: usize, figures_dir: &Path) -> Result<Option<String>> {
    let Some((mime, ext)) = FIGURE_MIME_TYPES.iter().find(|(m, _)| data.get(*m).is_some()) else {
        return Ok(None);
    };
    let payload = joined_text(data.get(*mime));
    let name = format!("{stem}_{n}.{ext}");
    let path: PathBuf = figures_dir.join(&name);

    if *mime == "image/svg+xml" {
        std::fs::write(&path, payload)?;
    } else {
        let compact: String = payload.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| DocError::stage("execute", format!("bad {mime} payload: {e}")))?;
        std::fs::write(&path, bytes)?;
    }
    Ok(Some(name))
}

/// Notebook text fields are either a string or a list of lines.
fn joined_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}
