//! Test-only builders and scripted collaborators.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::git::VersionControl;
use crate::pipeline::{ExecutionOutcome, ExecutionRequest, Pipeline};
use crate::prd::{Prd, PrdContext, Priority, SCHEMA_VERSION, Story, StoryStatus};

pub const FEATURE_ID: &str = "001-demo";

/// `spec.md` with three stories: US1 (P2), US2 (P1) and US3 (no priority).
pub const SPEC_MD: &str = "\
# Feature Specification: Demo Feature

Operators want to be told when something breaks.

## User Scenarios & Testing

### User Story 1 - Send alerts (Priority: P2)

An operator receives an alert when a check fails.

**Independent Test**: Fail a check and observe one alert.

**Acceptance Scenarios**:

1. **Given** a failing check, **When** it runs, **Then** an alert is sent
2. **Given** a passing check, **When** it runs, **Then** no alert is sent

---

### User Story 2 - Configure channels (Priority: P1)

An operator chooses where alerts go.

**Acceptance Scenarios**:

1. Alerts go to every configured channel

---

### User Story 3 - Mute alerts

An operator silences a noisy check.
";

pub const TASKS_MD: &str = "\
# Tasks: Demo Feature

## Phase 1: Setup

- [x] T001 Create project skeleton

## Phase 2: Stories

- [ ] T002 [P] [US1] Add alert model in src/alert.rs
- [ ] T003 [US2] Add channel config
- [ ] T004 [US1] [US2] Wire alerts to channels
";

/// Create a deterministic `todo` story.
pub fn story(id: &str, priority: Priority) -> Story {
    Story {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        priority,
        acceptance_criteria: Vec::new(),
        independent_test: None,
        tasks: Vec::new(),
        status: StoryStatus::Todo,
        attempts: 0,
        max_attempts: None,
        last_error: None,
    }
}

/// Create a story with explicit loop state.
pub fn story_with_state(id: &str, priority: Priority, status: StoryStatus, attempts: u32) -> Story {
    Story {
        status,
        attempts,
        ..story(id, priority)
    }
}

/// Create a valid PRD for [`FEATURE_ID`] holding `stories`.
pub fn prd_with(stories: Vec<Story>) -> Prd {
    Prd {
        schema_version: SCHEMA_VERSION,
        feature_id: FEATURE_ID.to_string(),
        title: "Demo Feature".to_string(),
        description: "Demo feature description".to_string(),
        context: PrdContext {
            files: BTreeMap::new(),
        },
        stories,
        run_metadata: None,
    }
}

/// Write `specs/<feature_id>/{spec,plan,tasks}.md` under `root`; returns the feature dir.
pub fn write_spec_fixture(root: &Path, feature_id: &str, spec_md: &str, tasks_md: &str) -> Result<PathBuf> {
    let dir = root.join("specs").join(feature_id);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    for (name, contents) in [
        ("spec.md", spec_md),
        ("plan.md", "# Implementation Plan\n\nRust, single crate.\n"),
        ("tasks.md", tasks_md),
    ] {
        fs::write(dir.join(name), contents).with_context(|| format!("write {name}"))?;
    }
    Ok(dir)
}

/// One scripted pipeline result.
#[derive(Debug, Clone)]
pub enum Scripted {
    Pass,
    Fail(String),
    /// The pipeline itself errors (e.g. an agent could not be spawned).
    Error(String),
}

impl Scripted {
    pub fn fail(error: &str) -> Self {
        Scripted::Fail(error.to_string())
    }
}

/// Pipeline returning queued results and recording `(story_id, attempt)` per call.
///
/// With an empty queue it repeats `fallback`, or errors if there is none.
pub struct ScriptedPipeline {
    script: RefCell<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    calls: RefCell<Vec<(String, u32)>>,
}

impl ScriptedPipeline {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            fallback: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn always(result: Scripted) -> Self {
        Self {
            fallback: Some(result),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.borrow().clone()
    }
}

impl Pipeline for ScriptedPipeline {
    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        let story = &request.context.story;
        self.calls.borrow_mut().push((story.id.clone(), story.attempt));
        let next = self
            .script
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted pipeline exhausted"))?;
        match next {
            Scripted::Pass => Ok(ExecutionOutcome::pass()),
            Scripted::Fail(error) => Ok(ExecutionOutcome::fail(error)),
            Scripted::Error(error) => Err(anyhow!(error)),
        }
    }
}

/// Version control fake with fixed changes that records commit messages.
#[derive(Default)]
pub struct RecordingVcs {
    changes: Vec<String>,
    commit_error: Option<String>,
    commits: RefCell<Vec<String>>,
}

impl RecordingVcs {
    pub fn with_changes(paths: &[&str]) -> Self {
        Self {
            changes: paths.iter().map(|path| path.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_commits(error: &str) -> Self {
        Self {
            commit_error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }
}

impl VersionControl for RecordingVcs {
    fn changed_paths(&self, ignore_prefixes: &[&str]) -> Result<Vec<String>> {
        Ok(self
            .changes
            .iter()
            .filter(|path| !ignore_prefixes.iter().any(|prefix| path.starts_with(prefix)))
            .cloned()
            .collect())
    }

    fn tracked_files(&self) -> Result<Vec<String>> {
        Ok(self.changes.clone())
    }

    fn diff(&self, ignore_prefixes: &[&str]) -> Result<String> {
        Ok(self
            .changed_paths(ignore_prefixes)?
            .iter()
            .map(|path| format!("+++ b/{path}\n"))
            .collect())
    }

    fn commit_all(&self, message: &str) -> Result<bool> {
        if let Some(error) = &self.commit_error {
            return Err(anyhow!("{error}"));
        }
        self.commits.borrow_mut().push(message.to_string());
        Ok(true)
    }
}
