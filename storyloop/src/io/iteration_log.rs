//! Per-attempt artifacts under `<state_dir>/iterations/<feature>/<story>/<attempt>/`.
//!
//! These are product output, separate from tracing: always written, unaffected
//! by `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::io::paths::RepoPaths;
use crate::prd::StoryStatus;

#[derive(Debug, Clone)]
pub struct AttemptLogPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub plan_path: PathBuf,
    pub planner_log_path: PathBuf,
    pub coder_log_path: PathBuf,
    pub test_log_path: PathBuf,
    pub review_path: PathBuf,
}

impl AttemptLogPaths {
    /// `feature_iterations_dir` is [`crate::io::paths::FeaturePaths::iterations_dir`].
    pub fn new(feature_iterations_dir: &Path, story_id: &str, attempt: u32) -> Self {
        let dir = feature_iterations_dir
            .join(story_id)
            .join(attempt.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            plan_path: dir.join("plan.json"),
            planner_log_path: dir.join("planner.log"),
            coder_log_path: dir.join("coder.log"),
            test_log_path: dir.join("test.log"),
            review_path: dir.join("review.txt"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create iteration dir {}", self.dir.display()))
    }
}

/// Summary of one attempt, written last.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub feature_id: String,
    pub story_id: String,
    pub attempt: u32,
    /// Iteration number within the invocation (1-based).
    pub iteration: u32,
    pub mode: String,
    pub passed: bool,
    pub error: Option<String>,
    pub status_after: StoryStatus,
    pub duration_ms: u64,
}

pub fn write_meta(paths: &AttemptLogPaths, meta: &AttemptMeta) -> Result<()> {
    write_json(&paths.meta_path, meta).context("write attempt meta")
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

/// Keep the state dir out of version control (and out of auto-commits).
pub fn ensure_state_gitignore(repo: &RepoPaths) -> Result<()> {
    if repo.gitignore_path.exists() {
        return Ok(());
    }
    write_text(&repo.gitignore_path, "*\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::LoopConfig;

    #[test]
    fn attempt_paths_are_stable() {
        let paths = AttemptLogPaths::new(Path::new("/r/.storyloop/iterations/001-a"), "US2", 3);
        assert_eq!(paths.dir, Path::new("/r/.storyloop/iterations/001-a/US2/3"));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.plan_path.ends_with("plan.json"));
        assert!(paths.planner_log_path.ends_with("planner.log"));
        assert!(paths.coder_log_path.ends_with("coder.log"));
        assert!(paths.test_log_path.ends_with("test.log"));
        assert!(paths.review_path.ends_with("review.txt"));
    }

    #[test]
    fn writes_meta_and_gitignore() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = RepoPaths::new(temp.path(), &LoopConfig::default());
        ensure_state_gitignore(&repo).expect("gitignore");
        assert_eq!(
            fs::read_to_string(&repo.gitignore_path).expect("read"),
            "*\n"
        );

        let paths = AttemptLogPaths::new(&repo.feature("001-a").iterations_dir, "US1", 1);
        paths.create().expect("create");
        write_meta(
            &paths,
            &AttemptMeta {
                feature_id: "001-a".to_string(),
                story_id: "US1".to_string(),
                attempt: 1,
                iteration: 1,
                mode: "once".to_string(),
                passed: false,
                error: Some("Tests failed".to_string()),
                status_after: StoryStatus::InProgress,
                duration_ms: 5,
            },
        )
        .expect("meta");
        let meta = fs::read_to_string(&paths.meta_path).expect("read");
        assert!(meta.contains("\"status_after\": \"in_progress\""));
    }
}
