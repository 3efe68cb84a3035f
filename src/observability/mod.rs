//! Structured logging and run-level counters.
//!
//! - [`init_logging`]: one-time `tracing` setup with `RUST_LOG` support
//! - [`RunSummary`]: succeeded/skipped/failed unit counts for a command

use std::fmt;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Initialize structured logging with `RUST_LOG` environment variable support.
///
/// Defaults to `docforge=info` (`docforge=debug` when `verbose`) if
/// `RUST_LOG` is not set. Logs go to stderr so the progress trace on stdout
/// stays readable. Subsequent calls are ignored.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "docforge=debug" } else { "docforge=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // try_init so double-init in tests doesn't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Unit counts reported at the end of every command.
///
/// A unit is whatever the command iterates over: a version for `build` and
/// `embeddings`, a version or package for `indexes` and `manifests`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    started: Instant,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            succeeded: 0,
            skipped: 0,
            failed: 0,
            started: Instant::now(),
        }
    }

    pub fn succeed(&mut self) {
        self.succeeded += 1;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn fail(&mut self) {
        self.failed += 1;
    }

    /// Count a unit as succeeded or failed.
    pub fn record(&mut self, ok: bool) {
        if ok {
            self.succeed();
        } else {
            self.fail();
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.succeeded, self.skipped, self.failed
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
