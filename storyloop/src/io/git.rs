//! Git adapter for change detection and auto-commits.
//!
//! Orchestration talks to version control through [`VersionControl`] so it can
//! be tested without a repository; [`Git`] shells out to `git`.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Branches auto-commit refuses to write to.
pub const PROTECTED_BRANCHES: [&str; 2] = ["main", "master"];

/// Version-control operations used by the loop.
pub trait VersionControl {
    /// Changed or untracked paths, excluding any under `ignore_prefixes`.
    fn changed_paths(&self, ignore_prefixes: &[&str]) -> Result<Vec<String>>;

    /// Tracked files, repo-relative.
    fn tracked_files(&self) -> Result<Vec<String>>;

    /// Diff of the working tree against HEAD, excluding `ignore_prefixes`.
    fn diff(&self, ignore_prefixes: &[&str]) -> Result<String>;

    /// Stage everything and commit on the current branch.
    ///
    /// Returns `Ok(false)` when there was nothing to commit.
    fn commit_all(&self, message: &str) -> Result<bool>;
}

/// One line of `git status --porcelain=v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// XY status code; `??` marks an untracked path.
    pub code: String,
    pub path: String,
}

/// `git` CLI bound to the repository root.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Repository top-level for `dir`, or `None` outside a git checkout.
    pub fn toplevel(dir: &Path) -> Option<PathBuf> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(dir)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    /// Branch HEAD points at; detached HEAD is an error.
    ///
    /// Works on an unborn branch, before the first commit.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run(&["symbolic-ref", "--short", "-q", "HEAD"])?;
        let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !out.status.success() || name.is_empty() {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to commit)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Every modified, staged or untracked path, one entry per file.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// `Ok(false)` when the index is empty.
    #[instrument(skip_all)]
    fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("index empty, nothing to commit");
            return Ok(false);
        }
        debug!(subject = message, "committing story");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn has_head(&self) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .is_ok_and(|out| out.status.success())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    fn changed_paths(&self, ignore_prefixes: &[&str]) -> Result<Vec<String>> {
        let paths = self
            .status_porcelain()?
            .into_iter()
            .map(|entry| entry.path)
            .filter(|path| !is_ignored(path, ignore_prefixes))
            .collect::<Vec<_>>();
        debug!(changed = paths.len(), "changed paths");
        Ok(paths)
    }

    fn tracked_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn diff(&self, ignore_prefixes: &[&str]) -> Result<String> {
        let excludes = ignore_prefixes
            .iter()
            .map(|prefix| format!(":(exclude){prefix}"))
            .collect::<Vec<_>>();
        let mut args = vec!["diff", "--no-color"];
        if self.has_head() {
            args.push("HEAD");
        }
        args.push("--");
        args.push(".");
        args.extend(excludes.iter().map(String::as_str));
        let mut diff = self.run_capture(&args)?;

        for entry in self.status_porcelain()? {
            if entry.code == "??" && !is_ignored(&entry.path, ignore_prefixes) {
                diff.push_str(&format!("new file: {}\n", entry.path));
            }
        }
        Ok(diff)
    }

    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<bool> {
        let branch = self.current_branch()?;
        if PROTECTED_BRANCHES.contains(&branch.as_str()) {
            return Err(anyhow!(
                "refusing to auto-commit on protected branch '{branch}'"
            ));
        }
        self.add_all()?;
        self.commit_staged(message)
    }
}

fn is_ignored(path: &str, ignore_prefixes: &[&str]) -> bool {
    ignore_prefixes
        .iter()
        .any(|prefix| !prefix.is_empty() && path.starts_with(prefix))
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
