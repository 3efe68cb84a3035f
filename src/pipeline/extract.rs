//! API extraction stage.
//!
//! Symbol discovery and docstring rendering live in an external tool; this
//! module only invokes it, bounds it with a timeout, and validates what it
//! prints into the typed [`ApiDocument`] at the boundary.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{DocsConfig, ExtractorConfig, PackageConfig};
use crate::error::{DocError, Result};
use crate::process::run_with_timeout;
use crate::types::{ApiDocument, SkipReport};

/// Produces the API document for the source tree currently checked out.
pub trait ApiExtractor: Send + Sync {
    fn extract(&self, package: &PackageConfig) -> Result<(ApiDocument, SkipReport)>;
}

/// Runs the configured extractor command as
/// `{command...} {package} {source} {root modules...}` and reads
/// `{"modules": {...}}` from its stdout.
#[derive(Debug, Clone, Copy)]
pub struct CommandExtractor<'a> {
    config: &'a DocsConfig,
}

impl<'a> CommandExtractor<'a> {
    pub fn new(config: &'a DocsConfig) -> Self {
        Self { config }
    }

    fn settings(&self) -> &ExtractorConfig {
        &self.config.extractor
    }
}

impl ApiExtractor for CommandExtractor<'_> {
    fn extract(&self, package: &PackageConfig) -> Result<(ApiDocument, SkipReport)> {
        if !package.source.exists() {
            warn!(package = %package.id, source = %package.source.display(), "source path not found");
            return Ok((empty_document(&package.id), SkipReport::default()));
        }
        let settings = self.settings();
        let Some((program, args)) = settings.command.split_first() else {
            return Err(DocError::Config("extractor command is empty".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&package.id)
            .arg(&package.source)
            .args(&package.root_modules)
            .current_dir(package.repo.parent().unwrap_or_else(|| Path::new(".")));
        let output = run_with_timeout(&mut cmd, Duration::from_secs(settings.timeout_secs), "api extractor")?;
        if !output.success() {
            return Err(DocError::stage("extract", output.stderr_summary()));
        }

        let raw: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(finalize(&package.id, &raw, |m| self.config.should_skip_module(m)))
    }
}

fn empty_document(package_id: &str) -> ApiDocument {
    ApiDocument {
        package: package_id.to_string(),
        modules: Vec::new(),
    }
}

/// Validate raw extractor output, then drop modules that `skip_module`
/// rejects or that document nothing.
pub fn finalize(
    package_id: &str,
    raw: &serde_json::Value,
    skip_module: impl Fn(&str) -> bool,
) -> (ApiDocument, SkipReport) {
    let (mut doc, mut report) = ApiDocument::from_value(package_id, raw);
    doc.package = package_id.to_string();
    doc.modules.retain(|m| {
        if skip_module(&m.name) {
            debug!(module = %m.name, "module matches skip pattern");
            return false;
        }
        if m.is_empty() {
            report.record(&m.name, "no classes or functions");
            return false;
        }
        true
    });
    (doc, report)
}
