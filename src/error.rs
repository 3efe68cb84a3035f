//! Error types shared across the docforge library.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocError>;

/// Every failure the build system can surface.
///
/// Collaborator and stage failures are downgraded to per-tag or per-entity
/// reports by the pipeline; only configuration problems abort a run.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("git {args} failed: {message}")]
    Git { args: String, message: String },

    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("{stage} failed: {message}")]
    Collaborator { stage: &'static str, message: String },

    #[error("unknown package: {0}")]
    UnknownPackage(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl DocError {
    /// Shorthand for a collaborator failure in a named pipeline stage.
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            stage,
            message: message.into(),
        }
    }
}
