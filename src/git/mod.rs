//! Git integration: release tags, checkouts, and tag dates.
//!
//! All commands run through [`run_git`] with the configured timeout. Tag
//! listing never fails: a missing repository or a git error yields an empty
//! tag list, which callers treat as "nothing to build".

pub mod tags;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{DocError, Result};
use crate::process::run_with_timeout;
use crate::types::Tag;

pub use tags::{latest, milestones_at_or_above, parse_tag_list};

/// Branches tried, in order, when returning a repository to its main line.
const MAIN_BRANCHES: &[&str] = &["main", "master"];

/// Run a git command in `repo` and return its stdout.
pub fn run_git(repo: &Path, args: &[&str], timeout: Duration) -> Result<String> {
    let what = format!("git {}", args.join(" "));
    let output = run_with_timeout(
        Command::new("git").args(args).current_dir(repo),
        timeout,
        &what,
    )?;
    if !output.success() {
        return Err(DocError::Git {
            args: args.join(" "),
            message: output.stderr_summary(),
        });
    }
    Ok(output.stdout_str())
}

/// A package's source repository.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// All `vX.Y.Z` tags, newest first. Empty on any failure.
    pub fn list_tags(&self) -> Vec<Tag> {
        if !self.exists() {
            debug!(repo = %self.path.display(), "repository missing, no tags");
            return Vec::new();
        }
        match run_git(&self.path, &["tag", "-l", "v*.*.*"], self.timeout) {
            Ok(out) => parse_tag_list(&out),
            Err(e) => {
                warn!(repo = %self.path.display(), error = %e, "could not list tags");
                Vec::new()
            }
        }
    }

    /// Check out a ref (tag or branch).
    pub fn checkout(&self, reference: &str) -> Result<()> {
        run_git(&self.path, &["checkout", "--quiet", reference], self.timeout).map(|_| ())
    }

    /// Return to `main`, falling back to `master`.
    pub fn checkout_main(&self) -> Result<()> {
        let mut last_err = None;
        for branch in MAIN_BRANCHES {
            match self.checkout(branch) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| DocError::Other("no main branch".into())))
    }

    /// Commit date of a tag as `YYYY-MM-DD`, or empty if unknown.
    pub fn tag_date(&self, tag: &str) -> String {
        match run_git(&self.path, &["log", "-1", "--format=%ci", tag], self.timeout) {
            Ok(out) => out.split_whitespace().next().unwrap_or_default().to_string(),
            Err(e) => {
                debug!(tag, error = %e, "no date for tag");
                String::new()
            }
        }
    }

    /// Check out `tag` for the lifetime of the returned guard.
    pub fn checkout_scoped(&self, tag: &Tag) -> Result<CheckoutGuard<'_>> {
        self.checkout(&tag.to_string())?;
        Ok(CheckoutGuard { repo: self })
    }
}

/// Holds a tag checkout; dropping it puts the repository back on its main
/// branch, whether the build that held it succeeded or not.
#[derive(Debug)]
pub struct CheckoutGuard<'a> {
    repo: &'a GitRepo,
}

impl Drop for CheckoutGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.repo.checkout_main() {
            warn!(repo = %self.repo.path.display(), error = %e, "could not restore main branch");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn create_tagged_repo(tags: &[&str]) -> (tempfile::TempDir, GitRepo) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let git = |args: &[&str]| {
            let out = std::process::Command::new("git")
                .args(args)
                .current_dir(&path)
                .env("GIT_AUTHOR_NAME", "Test Author")
                .env("GIT_AUTHOR_EMAIL", "test@example.com")
                .env("GIT_COMMITTER_NAME", "Test Author")
                .env("GIT_COMMITTER_EMAIL", "test@example.com")
                .env("GIT_COMMITTER_DATE", "2024-03-01T12:00:00+00:00")
                .env("GIT_AUTHOR_DATE", "2024-03-01T12:00:00+00:00")
                .output()
                .unwrap();
            assert!(out.status.success(), "git {:?} failed", args);
        };

        git(&["init", "--quiet", "--initial-branch=main"]);
        git(&["config", "user.email", "test@example.com"]);
        git(&["config", "user.name", "Test Author"]);

        for (i, tag) in tags.iter().enumerate() {
            std::fs::write(path.join("version.txt"), format!("{i}\n")).unwrap();
            git(&["add", "version.txt"]);
            git(&["commit", "--quiet", "-m", tag]);
            git(&["tag", tag]);
        }

        (dir, GitRepo::new(path, Duration::from_secs(30)))
    }

    #[test]
    fn list_tags_newest_first_and_filtered() {
        let (_dir, repo) = create_tagged_repo(&["v0.1.0", "v0.2.0", "nightly", "v0.10.0", "v0.2.1"]);
        let names: Vec<String> = repo.list_tags().iter().map(Tag::to_string).collect();
        assert_eq!(names, vec!["v0.10.0", "v0.2.1", "v0.2.0", "v0.1.0"]);
    }

    #[test]
    fn list_tags_missing_repo_is_empty() {
        let repo = GitRepo::new("/definitely/not/a/repo", Duration::from_secs(5));
        assert!(repo.list_tags().is_empty());
    }

    #[test]
    fn list_tags_non_repo_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepo::new(dir.path(), Duration::from_secs(5));
        assert!(repo.list_tags().is_empty());
    }

    #[test]
    fn tag_date_is_iso_day() {
        let (_dir, repo) = create_tagged_repo(&["v0.1.0"]);
        assert_eq!(repo.tag_date("v0.1.0"), "2024-03-01");
        assert_eq!(repo.tag_date("v9.9.9"), "");
    }

    #[test]
    fn scoped_checkout_restores_main() {
        let (dir, repo) = create_tagged_repo(&["v0.1.0", "v0.2.0"]);
        {
            let _guard = repo.checkout_scoped(&Tag::new(0, 1, 0)).unwrap();
            let content = std::fs::read_to_string(dir.path().join("version.txt")).unwrap();
            assert_eq!(content, "0\n");
        }
        let head = run_git(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(head.trim(), "main");
        let content = std::fs::read_to_string(dir.path().join("version.txt")).unwrap();
        assert_eq!(content, "1\n");
    }

    #[test]
    fn checkout_unknown_tag_fails() {
        let (_dir, repo) = create_tagged_repo(&["v0.1.0"]);
        let err = repo.checkout_scoped(&Tag::new(3, 0, 0)).unwrap_err();
        assert!(matches!(err, DocError::Git { .. }));
    }
}
