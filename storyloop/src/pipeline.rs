//! Execution pipeline for one story attempt.
//!
//! The loop treats the pipeline as a black box returning pass/fail plus an
//! optional error and test-log reference. [`AgentPipeline`] is the production
//! implementation: plan, edit, check the diff, test, review.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::agents::command::CommandAgent;
use crate::agents::{
    AgentRequest, CodeRequest, Coder, Decision, Plan, Planner, Review, Reviewer,
    filter_target_files,
};
use crate::core::context::LeanContext;
use crate::io::config::{AgentCommandConfig, LoopConfig};
use crate::io::git::{Git, VersionControl};
use crate::io::iteration_log::{AttemptLogPaths, write_json, write_text};
use crate::io::paths::RepoPaths;
use crate::io::prompt::PromptBuilder;
use crate::io::test_runner::{ShellTestRunner, TestOutcome, TestRequest, TestRunner};

/// Message recorded when an attempt leaves the working tree untouched.
pub const NO_CHANGES_ERROR: &str = "No changes detected";
/// Message recorded when tests fail and no other reason is known.
pub const TESTS_FAILED_ERROR: &str = "Tests failed";

/// Upper bound on repository files listed for the planner.
const MAX_REPO_FILES: usize = 300;

#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    pub context: &'a LeanContext,
    pub logs: &'a AttemptLogPaths,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub passed: bool,
    pub error: Option<String>,
    pub test_log: Option<PathBuf>,
    pub test_log_head: Option<String>,
}

impl ExecutionOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

pub trait Pipeline {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome>;
}

/// Failure message for an attempt, or `None` if it passed.
///
/// An explicit error wins, then a non-SHIP review, then failing tests.
pub fn failure_message(
    explicit: Option<&str>,
    review: Option<&Review>,
    tests_passed: bool,
) -> Option<String> {
    if let Some(error) = explicit {
        return Some(error.to_string());
    }
    if let Some(review) = review
        && review.decision != Decision::Ship
    {
        return Some(format!(
            "Agent decision: {} - {}",
            review.decision.as_str(),
            review.reason
        ));
    }
    (!tests_passed).then(|| TESTS_FAILED_ERROR.to_string())
}

/// Fixed inputs for every attempt in an invocation.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workdir: PathBuf,
    /// Feature directory relative to `workdir`, e.g. `specs/001-alerts`.
    pub spec_dir: String,
    /// Repo-relative prefixes never counted as attempt changes.
    pub ignore_prefixes: Vec<String>,
    /// `None` disables tests (`--no-tests` or nothing detected).
    pub test_command: Option<String>,
    pub test_timeout: Duration,
    pub output_limit_bytes: usize,
    /// `false` skips planner and reviewer (`--no-agents`).
    pub use_agents: bool,
}

pub struct AgentPipeline<P, C, R, T, V> {
    pub planner: P,
    pub coder: C,
    pub reviewer: R,
    pub tests: T,
    pub vcs: V,
    pub prompts: PromptBuilder,
    pub settings: PipelineSettings,
}

impl<P, C, R, T, V> AgentPipeline<P, C, R, T, V>
where
    P: Planner,
    C: Coder,
    R: Reviewer,
    T: TestRunner,
    V: VersionControl,
{
    fn ignore_prefixes(&self) -> Vec<&str> {
        self.settings
            .ignore_prefixes
            .iter()
            .map(String::as_str)
            .collect()
    }

    fn plan(&self, ctx: &LeanContext, logs: &AttemptLogPaths) -> Result<Plan> {
        let repo_files = match self.vcs.tracked_files() {
            Ok(files) => {
                let mut files = filter_target_files(&files, &self.settings.spec_dir);
                files.truncate(MAX_REPO_FILES);
                files
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not list repository files");
                Vec::new()
            }
        };
        let prompt = self.prompts.planner(ctx, &repo_files)?;
        let request = AgentRequest {
            workdir: self.settings.workdir.clone(),
            prompt,
            log_path: logs.planner_log_path.clone(),
        };
        let plan = match self.planner.plan(&request) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "planner failed, using story title");
                Plan {
                    instruction: ctx.story.title.clone(),
                    target_files: Vec::new(),
                }
            }
        };
        let plan = Plan {
            target_files: filter_target_files(&plan.target_files, &self.settings.spec_dir),
            ..plan
        };
        write_json(&logs.plan_path, &plan)?;
        Ok(plan)
    }

    fn review(
        &self,
        ctx: &LeanContext,
        logs: &AttemptLogPaths,
        test_summary: Option<&str>,
    ) -> Result<Review> {
        let diff = self.vcs.diff(&self.ignore_prefixes())?;
        let prompt = self.prompts.reviewer(ctx, &diff, test_summary)?;
        let request = AgentRequest {
            workdir: self.settings.workdir.clone(),
            prompt,
            log_path: logs.review_path.clone(),
        };
        match self.reviewer.review(&request) {
            Ok(review) => Ok(review),
            Err(err) => {
                let reason = format!("reviewer unavailable: {err:#}");
                warn!(reason = %reason, "defaulting review to SHIP");
                write_text(&logs.review_path, &format!("SHIP (default): {reason}\n"))?;
                Ok(Review {
                    decision: Decision::Ship,
                    reason,
                })
            }
        }
    }
}

impl<P, C, R, T, V> Pipeline for AgentPipeline<P, C, R, T, V>
where
    P: Planner,
    C: Coder,
    R: Reviewer,
    T: TestRunner,
    V: VersionControl,
{
    #[instrument(skip_all, fields(story_id = %request.context.story.id, attempt = request.context.story.attempt))]
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        let ctx = request.context;
        let logs = request.logs;
        logs.create()?;

        let plan = if self.settings.use_agents {
            Some(self.plan(ctx, logs)?)
        } else {
            None
        };

        let prompt = self
            .prompts
            .coder(ctx, plan.as_ref().map(|p| p.instruction.as_str()))?;
        write_text(&logs.prompt_path, &prompt)?;

        let read_only_files = ctx
            .manifest
            .iter()
            .map(|entry| PathBuf::from(format!("{}/{}", self.settings.spec_dir, entry.path)))
            .collect();
        let report = self.coder.edit(&CodeRequest {
            workdir: self.settings.workdir.clone(),
            prompt,
            target_files: plan.map(|p| p.target_files).unwrap_or_default(),
            read_only_files,
            log_path: logs.coder_log_path.clone(),
        })?;
        if report.timed_out {
            return Ok(ExecutionOutcome::fail("Coder timed out"));
        }

        let changed = self.vcs.changed_paths(&self.ignore_prefixes())?;
        if changed.is_empty() {
            info!("coder made no changes");
            return Ok(ExecutionOutcome::fail(NO_CHANGES_ERROR));
        }
        info!(changed = changed.len(), "coder changed files");

        let mut outcome = ExecutionOutcome::default();
        let mut tests_passed = true;
        if let Some(command) = &self.settings.test_command {
            let report = self.tests.run(&TestRequest {
                command: command.clone(),
                workdir: self.settings.workdir.clone(),
                log_path: logs.test_log_path.clone(),
                timeout: self.settings.test_timeout,
                output_limit_bytes: self.settings.output_limit_bytes,
            })?;
            tests_passed = report.outcome.passed();
            if report.outcome == TestOutcome::Skipped {
                warn!(command = %command, "test command not found; counting tests as passed");
            }
            outcome.test_log = Some(report.log_path);
            outcome.test_log_head = Some(report.head);
        }

        let review = if self.settings.use_agents {
            Some(self.review(ctx, logs, outcome.test_log_head.as_deref())?)
        } else {
            None
        };

        outcome.error = failure_message(None, review.as_ref(), tests_passed);
        outcome.passed = outcome.error.is_none();
        Ok(outcome)
    }
}

/// Production pipeline: configured agent commands, `sh -c` tests and git.
pub type CommandPipeline =
    AgentPipeline<CommandAgent, CommandAgent, CommandAgent, ShellTestRunner, Git>;

/// Stage switches from the command line.
#[derive(Debug, Clone, Copy)]
pub struct PipelineFlags {
    pub use_agents: bool,
    pub run_tests: bool,
}

/// Wire the production pipeline for one feature from config.
pub fn command_pipeline(
    repo: &RepoPaths,
    config: &LoopConfig,
    feature_id: &str,
    flags: PipelineFlags,
) -> Result<CommandPipeline> {
    let specs_prefix = dir_prefix(repo.relative(&repo.specs_dir));
    let state_prefix = dir_prefix(repo.relative(&repo.state_dir));
    let spec_dir = format!("{specs_prefix}{feature_id}");

    let test_command = if flags.run_tests {
        let command = config.resolve_test_command(&repo.root);
        if command.is_none() {
            warn!("no test command configured or detected; tests are skipped");
        }
        command
    } else {
        None
    };

    let agent = |name: &'static str, cfg: &AgentCommandConfig| {
        CommandAgent::new(
            name,
            cfg.clone(),
            config.agents.timeout(),
            config.output_limit_bytes,
        )
    };

    Ok(AgentPipeline {
        planner: agent("planner", &config.agents.planner),
        coder: agent("coder", &config.agents.coder),
        reviewer: agent("reviewer", &config.agents.reviewer),
        tests: ShellTestRunner,
        vcs: Git::new(repo.root.clone()),
        prompts: PromptBuilder::new(config.prompt_budget_bytes, spec_dir.clone())?,
        settings: PipelineSettings {
            workdir: repo.root.clone(),
            spec_dir,
            ignore_prefixes: vec![specs_prefix, state_prefix],
            test_command,
            test_timeout: config.tests.timeout(),
            output_limit_bytes: config.output_limit_bytes,
            use_agents: flags.use_agents,
        },
    })
}

/// `path` as a repo-relative prefix with forward slashes and a trailing `/`.
fn dir_prefix(path: &Path) -> String {
    let mut prefix = path.to_string_lossy().replace('\\', "/");
    while prefix.ends_with('/') {
        prefix.pop();
    }
    prefix.push('/');
    prefix
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::anyhow;

    use super::*;
    use crate::agents::CodeReport;
    use crate::core::context::build;
    use crate::io::test_runner::TestReport;
    use crate::prd::Priority;
    use crate::test_support::{RecordingVcs, prd_with, story};

    struct FixedPlanner(Option<Plan>);

    impl Planner for FixedPlanner {
        fn plan(&self, _request: &AgentRequest) -> Result<Plan> {
            self.0.clone().ok_or_else(|| anyhow!("planner offline"))
        }
    }

    #[derive(Default)]
    struct CapturingCoder {
        requests: RefCell<Vec<CodeRequest>>,
    }

    impl Coder for CapturingCoder {
        fn edit(&self, request: &CodeRequest) -> Result<CodeReport> {
            self.requests.borrow_mut().push(request.clone());
            Ok(CodeReport {
                timed_out: false,
                exit_code: Some(0),
            })
        }
    }

    struct FixedReviewer(Option<Review>);

    impl Reviewer for FixedReviewer {
        fn review(&self, _request: &AgentRequest) -> Result<Review> {
            self.0.clone().ok_or_else(|| anyhow!("reviewer offline"))
        }
    }

    struct FixedTests(TestOutcome);

    impl TestRunner for FixedTests {
        fn run(&self, request: &TestRequest) -> Result<TestReport> {
            Ok(TestReport {
                outcome: self.0,
                log_path: request.log_path.clone(),
                head: "test output".to_string(),
            })
        }
    }

    fn ship() -> Option<Review> {
        Some(Review {
            decision: Decision::Ship,
            reason: "good".to_string(),
        })
    }

    fn pipeline(
        root: &std::path::Path,
        planner: Option<Plan>,
        reviewer: Option<Review>,
        tests: TestOutcome,
        changed: &[&str],
        use_agents: bool,
    ) -> AgentPipeline<FixedPlanner, CapturingCoder, FixedReviewer, FixedTests, RecordingVcs> {
        AgentPipeline {
            planner: FixedPlanner(planner),
            coder: CapturingCoder::default(),
            reviewer: FixedReviewer(reviewer),
            tests: FixedTests(tests),
            vcs: RecordingVcs::with_changes(changed),
            prompts: PromptBuilder::new(40_000, "specs/001-demo").expect("prompts"),
            settings: PipelineSettings {
                workdir: root.to_path_buf(),
                spec_dir: "specs/001-demo".to_string(),
                ignore_prefixes: vec!["specs/".to_string(), ".storyloop/".to_string()],
                test_command: Some("cargo test".to_string()),
                test_timeout: Duration::from_secs(5),
                output_limit_bytes: 1_000,
                use_agents,
            },
        }
    }

    fn run(
        pipeline: &AgentPipeline<FixedPlanner, CapturingCoder, FixedReviewer, FixedTests, RecordingVcs>,
        root: &std::path::Path,
    ) -> ExecutionOutcome {
        let mut prd = prd_with(vec![story("US1", Priority::P1)]);
        prd.context
            .files
            .insert("spec.md".to_string(), "spec".to_string());
        let ctx = build(&prd.stories[0], &prd);
        let logs = AttemptLogPaths::new(&root.join(".storyloop/iterations/001-demo"), "US1", 1);
        pipeline
            .execute(&ExecutionRequest {
                context: &ctx,
                logs: &logs,
            })
            .expect("execute")
    }

    #[test]
    fn command_pipeline_ignores_specs_and_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = RepoPaths::new(temp.path(), &LoopConfig::default());
        let flags = PipelineFlags {
            use_agents: true,
            run_tests: false,
        };
        let pipeline =
            command_pipeline(&repo, &LoopConfig::default(), "001-demo", flags).expect("pipeline");
        assert_eq!(pipeline.settings.spec_dir, "specs/001-demo");
        assert_eq!(
            pipeline.settings.ignore_prefixes,
            vec!["specs/".to_string(), ".storyloop/".to_string()]
        );
        assert_eq!(pipeline.settings.test_command, None);
        assert_eq!(dir_prefix(Path::new("docs/specs/")), "docs/specs/");
    }

    #[test]
    fn failure_message_precedence() {
        let revise = Review {
            decision: Decision::Revise,
            reason: "naming".to_string(),
        };
        assert_eq!(
            failure_message(Some("boom"), Some(&revise), false).as_deref(),
            Some("boom")
        );
        assert_eq!(
            failure_message(None, Some(&revise), false).as_deref(),
            Some("Agent decision: REVISE - naming")
        );
        assert_eq!(
            failure_message(None, ship().as_ref(), false).as_deref(),
            Some("Tests failed")
        );
        assert_eq!(failure_message(None, ship().as_ref(), true), None);
    }

    #[test]
    fn ship_with_passing_tests_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plan = Plan {
            instruction: "Add alerts".to_string(),
            target_files: vec!["src/alerts.rs".to_string(), "specs/001-demo/spec.md".to_string()],
        };
        let p = pipeline(temp.path(), Some(plan), ship(), TestOutcome::Pass, &["src/alerts.rs"], true);
        let outcome = run(&p, temp.path());
        assert!(outcome.passed, "{outcome:?}");
        assert_eq!(outcome.test_log_head.as_deref(), Some("test output"));

        let requests = p.coder.requests.borrow();
        assert_eq!(requests[0].target_files, vec!["src/alerts.rs".to_string()]);
        assert_eq!(
            requests[0].read_only_files,
            vec![PathBuf::from("specs/001-demo/spec.md")]
        );
        assert!(requests[0].prompt.contains("Add alerts"));
        let logs = AttemptLogPaths::new(&temp.path().join(".storyloop/iterations/001-demo"), "US1", 1);
        assert!(logs.plan_path.is_file());
        assert!(logs.prompt_path.is_file());
    }

    #[test]
    fn untouched_tree_fails_with_no_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let p = pipeline(temp.path(), None, ship(), TestOutcome::Pass, &[], true);
        let outcome = run(&p, temp.path());
        assert_eq!(outcome, ExecutionOutcome::fail(NO_CHANGES_ERROR));
    }

    #[test]
    fn failing_tests_fail_the_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let p = pipeline(temp.path(), None, ship(), TestOutcome::Fail, &["a.rs"], true);
        let outcome = run(&p, temp.path());
        assert!(!outcome.passed);
        assert_eq!(outcome.error.as_deref(), Some("Tests failed"));
        assert!(outcome.test_log.is_some());
    }

    #[test]
    fn missing_test_tool_counts_as_pass() {
        let temp = tempfile::tempdir().expect("tempdir");
        let p = pipeline(temp.path(), None, ship(), TestOutcome::Skipped, &["a.rs"], true);
        assert!(run(&p, temp.path()).passed);
    }

    #[test]
    fn revise_decision_fails_even_with_passing_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let review = Review {
            decision: Decision::Revise,
            reason: "missing docs".to_string(),
        };
        let p = pipeline(temp.path(), None, Some(review), TestOutcome::Pass, &["a.rs"], true);
        let outcome = run(&p, temp.path());
        assert_eq!(
            outcome.error.as_deref(),
            Some("Agent decision: REVISE - missing docs")
        );
    }

    #[test]
    fn offline_agents_fall_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let p = pipeline(temp.path(), None, None, TestOutcome::Pass, &["a.rs"], true);
        let outcome = run(&p, temp.path());
        assert!(outcome.passed, "reviewer errors default to SHIP");
        let requests = p.coder.requests.borrow();
        assert!(requests[0].prompt.contains("### Instruction\nUS1 title"));
    }

    #[test]
    fn no_agents_skips_planner_and_reviewer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let review = Review {
            decision: Decision::Revise,
            reason: "never asked".to_string(),
        };
        let p = pipeline(temp.path(), None, Some(review), TestOutcome::Pass, &["a.rs"], false);
        let outcome = run(&p, temp.path());
        assert!(outcome.passed);
        let requests = p.coder.requests.borrow();
        assert!(!requests[0].prompt.contains("### Instruction"));
        assert!(requests[0].target_files.is_empty());
    }
}
