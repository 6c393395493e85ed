//! Loop-owned state transitions for stories.
//!
//! Every transition takes the current PRD by reference and returns the next PRD
//! value; callers persist the result wholesale.
//!
//! ```text
//! todo ──(selected)──► in_progress
//! in_progress ──(pass)──► pass
//! in_progress ──(fail, attempts < max)──► in_progress
//! in_progress ──(fail, attempts >= max)──► fail
//! ```

use crate::prd::{Prd, RunMetadata, StoryStatus};

/// Result of one pipeline execution, as far as the state machine cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pass,
    Fail { error: String },
}

/// Mark `story_id` as `in_progress` and count the attempt.
pub fn begin_attempt(prd: &Prd, story_id: &str) -> Result<Prd, String> {
    let mut next = prd.clone();
    let story = next
        .story_mut(story_id)
        .ok_or_else(|| format!("story '{story_id}' not found"))?;
    story.status = StoryStatus::InProgress;
    story.attempts += 1;
    Ok(next)
}

/// Apply the outcome of the attempt started by [`begin_attempt`].
pub fn apply_outcome(
    prd: &Prd,
    story_id: &str,
    outcome: &AttemptOutcome,
    max_attempts_per_story: u32,
) -> Result<Prd, String> {
    let mut next = prd.clone();
    let story = next
        .story_mut(story_id)
        .ok_or_else(|| format!("story '{story_id}' not found"))?;
    if story.status != StoryStatus::InProgress {
        return Err(format!(
            "story '{story_id}' is {} (expected in_progress)",
            story.status
        ));
    }

    match outcome {
        AttemptOutcome::Pass => {
            story.status = StoryStatus::Pass;
            story.last_error = None;
        }
        AttemptOutcome::Fail { error } => {
            story.last_error = Some(error.clone());
            story.status = if story.attempts >= story.effective_max_attempts(max_attempts_per_story)
            {
                StoryStatus::Fail
            } else {
                StoryStatus::InProgress
            };
        }
    }
    Ok(next)
}

/// Re-open a `fail` or `in_progress` story with `extra_attempts` more tries.
///
/// `attempts` is kept; the per-story ceiling is raised instead.
pub fn reset_story(prd: &Prd, story_id: &str, extra_attempts: u32) -> Result<Prd, String> {
    if extra_attempts == 0 {
        return Err("extra attempts must be > 0".to_string());
    }
    let mut next = prd.clone();
    let story = next
        .story_mut(story_id)
        .ok_or_else(|| format!("story '{story_id}' not found"))?;
    match story.status {
        StoryStatus::Fail | StoryStatus::InProgress => {}
        other => {
            return Err(format!(
                "story '{story_id}' is {other}; only fail or in_progress stories can be reset"
            ));
        }
    }
    story.status = StoryStatus::Todo;
    story.last_error = None;
    story.max_attempts = Some(story.attempts + extra_attempts);
    Ok(next)
}

/// Bump run bookkeeping after an iteration.
pub fn record_iteration(prd: &Prd, mode: &str) -> Prd {
    let mut next = prd.clone();
    let metadata = next.run_metadata.get_or_insert_with(RunMetadata::default);
    metadata.last_run_mode = Some(mode.to_string());
    metadata.total_iterations += 1;
    next
}
