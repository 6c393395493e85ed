//! Orchestration for a single loop iteration.
//!
//! One iteration: load the PRD, select a story, persist it as `in_progress`
//! with its attempt counted, delegate to the pipeline, then persist the
//! outcome. Pipeline errors are absorbed into the story; only infrastructure
//! errors (PRD I/O, corrupt state) escape.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::context::build;
use crate::core::selector::{SelectOptions, select_next_story};
use crate::core::state_update::{AttemptOutcome, apply_outcome, begin_attempt, record_iteration};
use crate::io::git::VersionControl;
use crate::io::iteration_log::{AttemptLogPaths, AttemptMeta, write_meta};
use crate::io::paths::FeaturePaths;
use crate::io::prd_store::{load_prd, write_prd};
use crate::pipeline::{ExecutionOutcome, ExecutionRequest, Pipeline};
use crate::prd::StoryStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    /// One iteration.
    Once,
    /// Iterate until nothing is eligible or `max_iterations` is reached.
    Loop,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Once => "once",
            RunMode::Loop => "loop",
        }
    }
}

/// Options for `storyloop run`, resolved from CLI flags and config.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// `None` defaults to the sum of every story's attempt ceiling.
    pub max_iterations: Option<u32>,
    pub max_attempts_per_story: u32,
    pub story_id: Option<String>,
    pub force: bool,
    pub auto_commit: bool,
}

impl RunOptions {
    pub fn select_options(&self) -> SelectOptions<'_> {
        SelectOptions {
            max_attempts_per_story: self.max_attempts_per_story,
            story_id: self.story_id.as_deref(),
            force: self.force,
        }
    }
}

/// Collaborators for one feature's iterations.
pub struct LoopEnv<'a, P, V> {
    pub feature: &'a FeaturePaths,
    pub pipeline: &'a P,
    pub vcs: &'a V,
    /// Conventional-commit type for auto-commits, e.g. `feat`.
    pub commit_prefix: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    NoEligibleStory,
    Attempted(AttemptSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSummary {
    pub story_id: String,
    pub attempt: u32,
    pub passed: bool,
    pub error: Option<String>,
    pub status_after: StoryStatus,
    pub test_log: Option<PathBuf>,
}

/// Auto-commit message for a passed story.
pub fn commit_message(prefix: &str, feature_id: &str, story_id: &str, title: &str) -> String {
    format!("{prefix}({feature_id}): {story_id} {title}")
}

/// Execute one iteration. Stories in `skip` are not selected.
#[instrument(skip_all, fields(feature_id = %env.feature.feature_id, iteration))]
pub fn run_step<P: Pipeline, V: VersionControl>(
    env: &LoopEnv<'_, P, V>,
    options: &RunOptions,
    iteration: u32,
    skip: &HashSet<String>,
) -> Result<StepOutcome> {
    let start = Instant::now();
    let prd = load_prd(env.feature)?;
    let Some(selected) = select_next_story(&prd, &options.select_options(), skip) else {
        info!("no eligible story");
        return Ok(StepOutcome::NoEligibleStory);
    };
    let story_id = selected.id.clone();

    let started =
        begin_attempt(&prd, &story_id).map_err(|err| anyhow!("begin attempt failed: {err}"))?;
    write_prd(&env.feature.prd_path, &started)?;
    let story = started
        .story(&story_id)
        .ok_or_else(|| anyhow!("story '{story_id}' vanished after selection"))?;
    let attempt = story.attempts;
    info!(story_id = %story_id, attempt, priority = %story.priority, "story started");

    let context = build(story, &started);
    let logs = AttemptLogPaths::new(&env.feature.iterations_dir, &story_id, attempt);
    logs.create()?;

    let mut outcome = match env.pipeline.execute(&ExecutionRequest {
        context: &context,
        logs: &logs,
    }) {
        Ok(outcome) => outcome,
        Err(err) => {
            let error = format!("{err:#}");
            warn!(story_id = %story_id, error = %error, "pipeline error");
            ExecutionOutcome {
                error: Some(error),
                ..ExecutionOutcome::default()
            }
        }
    };

    if outcome.passed && options.auto_commit {
        let message = commit_message(env.commit_prefix, &started.feature_id, &story_id, &story.title);
        match env.vcs.commit_all(&message) {
            Ok(true) => info!(commit = %message, "committed"),
            Ok(false) => info!("nothing to commit"),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "auto-commit failed");
                outcome.passed = false;
                outcome.error = Some(format!("Auto-commit failed: {err:#}"));
            }
        }
    }

    let attempt_outcome = if outcome.passed {
        AttemptOutcome::Pass
    } else {
        AttemptOutcome::Fail {
            error: outcome
                .error
                .clone()
                .unwrap_or_else(|| "Execution failed".to_string()),
        }
    };
    let finished = apply_outcome(
        &started,
        &story_id,
        &attempt_outcome,
        options.max_attempts_per_story,
    )
    .map_err(|err| anyhow!("apply outcome failed: {err}"))?;
    let finished = record_iteration(&finished, options.mode.as_str());
    write_prd(&env.feature.prd_path, &finished)?;

    let status_after = finished
        .story(&story_id)
        .map_or(StoryStatus::InProgress, |story| story.status);
    let error = match &attempt_outcome {
        AttemptOutcome::Pass => None,
        AttemptOutcome::Fail { error } => Some(error.clone()),
    };
    write_meta(
        &logs,
        &AttemptMeta {
            feature_id: finished.feature_id.clone(),
            story_id: story_id.clone(),
            attempt,
            iteration,
            mode: options.mode.as_str().to_string(),
            passed: outcome.passed,
            error: error.clone(),
            status_after,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        },
    )?;
    info!(story_id = %story_id, attempt, status = %status_after, "story attempt finished");

    Ok(StepOutcome::Attempted(AttemptSummary {
        story_id,
        attempt,
        passed: outcome.passed,
        error,
        status_after,
        test_log: outcome.test_log,
    }))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::io::config::LoopConfig;
    use crate::io::paths::RepoPaths;
    use crate::prd::Priority;
    use crate::test_support::{
        FEATURE_ID, RecordingVcs, Scripted, ScriptedPipeline, prd_with, story, story_with_state,
    };

    fn options(auto_commit: bool) -> RunOptions {
        RunOptions {
            mode: RunMode::Once,
            max_iterations: None,
            max_attempts_per_story: 3,
            story_id: None,
            force: false,
            auto_commit,
        }
    }

    fn setup(root: &std::path::Path, stories: Vec<crate::prd::Story>) -> FeaturePaths {
        let feature = RepoPaths::new(root, &LoopConfig::default()).feature(FEATURE_ID);
        write_prd(&feature.prd_path, &prd_with(stories)).expect("write prd");
        feature
    }

    #[test]
    fn failed_attempt_is_counted_and_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let feature = setup(temp.path(), vec![story("US1", Priority::P1)]);
        let pipeline = ScriptedPipeline::new(vec![Scripted::fail("Tests failed")]);
        let vcs = RecordingVcs::default();
        let env = LoopEnv {
            feature: &feature,
            pipeline: &pipeline,
            vcs: &vcs,
            commit_prefix: "feat",
        };

        let outcome = run_step(&env, &options(false), 1, &HashSet::new()).expect("step");
        let StepOutcome::Attempted(summary) = outcome else {
            panic!("expected an attempt");
        };
        assert_eq!(summary.attempt, 1);
        assert_eq!(summary.status_after, StoryStatus::InProgress);

        let prd = load_prd(&feature).expect("load");
        let us1 = prd.story("US1").expect("US1");
        assert_eq!(us1.attempts, 1);
        assert_eq!(us1.last_error.as_deref(), Some("Tests failed"));
        let metadata = prd.run_metadata.expect("run metadata");
        assert_eq!(metadata.total_iterations, 1);
        assert_eq!(metadata.last_run_mode.as_deref(), Some("once"));

        let meta = fs::read_to_string(feature.iterations_dir.join("US1/1/meta.json")).expect("meta");
        assert!(meta.contains("\"error\": \"Tests failed\""));
        assert_eq!(pipeline.calls(), vec![("US1".to_string(), 1)]);
    }

    #[test]
    fn pipeline_error_becomes_story_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let feature = setup(temp.path(), vec![story("US1", Priority::P1)]);
        let pipeline = ScriptedPipeline::new(vec![Scripted::Error("coder command 'aider' not found".into())]);
        let vcs = RecordingVcs::default();
        let env = LoopEnv {
            feature: &feature,
            pipeline: &pipeline,
            vcs: &vcs,
            commit_prefix: "feat",
        };

        run_step(&env, &options(false), 1, &HashSet::new()).expect("step absorbs error");
        let prd = load_prd(&feature).expect("load");
        assert_eq!(
            prd.story("US1").and_then(|s| s.last_error.as_deref()),
            Some("coder command 'aider' not found")
        );
    }

    #[test]
    fn pass_with_auto_commit_commits_and_clears_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut retry = story_with_state("US1", Priority::P1, StoryStatus::InProgress, 1);
        retry.last_error = Some("Tests failed".to_string());
        let feature = setup(temp.path(), vec![retry]);
        let pipeline = ScriptedPipeline::new(vec![Scripted::Pass]);
        let vcs = RecordingVcs::default();
        let env = LoopEnv {
            feature: &feature,
            pipeline: &pipeline,
            vcs: &vcs,
            commit_prefix: "feat",
        };

        run_step(&env, &options(true), 1, &HashSet::new()).expect("step");
        assert_eq!(vcs.commits(), vec!["feat(001-demo): US1 US1 title".to_string()]);
        let prd = load_prd(&feature).expect("load");
        let us1 = prd.story("US1").expect("US1");
        assert_eq!(us1.status, StoryStatus::Pass);
        assert_eq!(us1.attempts, 2);
        assert_eq!(us1.last_error, None);
    }

    #[test]
    fn failed_commit_fails_the_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let feature = setup(temp.path(), vec![story("US1", Priority::P1)]);
        let pipeline = ScriptedPipeline::new(vec![Scripted::Pass]);
        let vcs = RecordingVcs::failing_commits("refusing to auto-commit on protected branch 'main'");
        let env = LoopEnv {
            feature: &feature,
            pipeline: &pipeline,
            vcs: &vcs,
            commit_prefix: "feat",
        };

        let outcome = run_step(&env, &options(true), 1, &HashSet::new()).expect("step");
        assert!(matches!(outcome, StepOutcome::Attempted(ref s) if !s.passed));
        let prd = load_prd(&feature).expect("load");
        let us1 = prd.story("US1").expect("US1");
        assert_eq!(us1.status, StoryStatus::InProgress);
        assert!(
            us1.last_error
                .as_deref()
                .is_some_and(|e| e.starts_with("Auto-commit failed"))
        );
    }

    #[test]
    fn nothing_eligible_leaves_prd_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let feature = setup(
            temp.path(),
            vec![story_with_state("US1", Priority::P1, StoryStatus::Pass, 1)],
        );
        let before = fs::read_to_string(&feature.prd_path).expect("read");
        let pipeline = ScriptedPipeline::new(Vec::new());
        let vcs = RecordingVcs::default();
        let env = LoopEnv {
            feature: &feature,
            pipeline: &pipeline,
            vcs: &vcs,
            commit_prefix: "feat",
        };

        let outcome = run_step(&env, &options(false), 1, &HashSet::new()).expect("step");
        assert_eq!(outcome, StepOutcome::NoEligibleStory);
        assert_eq!(fs::read_to_string(&feature.prd_path).expect("read"), before);
        assert!(pipeline.calls().is_empty());
    }
}
