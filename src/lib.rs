//! docforge: versioned documentation builder.
//!
//! Keeps a multi-package, multi-version documentation tree in sync with the
//! release tags of each package's source repository: plans which versions
//! must exist, builds each one through a fixed pipeline (API extraction,
//! example copy and execution, manifest, indexes), and derives search,
//! crossref, manifest, and embedding artifacts from the result.

pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod git;
pub mod index;
pub mod lifecycle;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod storage;
pub mod types;
