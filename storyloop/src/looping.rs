//! Multi-iteration driver for `storyloop run`.

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::selector::{is_exhausted, select_next_story};
use crate::io::git::VersionControl;
use crate::io::prd_store::load_prd;
use crate::pipeline::Pipeline;
use crate::prd::{Prd, StatusCounts, StoryStatus};
use crate::step::{AttemptSummary, LoopEnv, RunMode, RunOptions, StepOutcome, run_step};

/// Reason why [`run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// `once` mode finished its single iteration.
    Once,
    /// No story is eligible (all terminal, exhausted, or the requested story
    /// is not eligible). Not an error.
    NoEligibleStory,
    /// The invocation used up `max_iterations`.
    MaxIterations { limit: u32 },
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStop::Once => f.write_str("single iteration complete"),
            LoopStop::NoEligibleStory => f.write_str("no eligible story"),
            LoopStop::MaxIterations { limit } => write!(f, "max iterations ({limit}) reached"),
        }
    }
}

/// Summary printed at the end of every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub feature_id: String,
    pub mode: RunMode,
    pub iterations: u32,
    pub stop: LoopStop,
    pub counts: StatusCounts,
    pub attempts: Vec<AttemptSummary>,
    /// Story ids in `fail` at the end of the run.
    pub failed: Vec<String>,
    /// Story ids out of attempts but not `fail`, e.g. after an interrupted
    /// last attempt. They need `storyloop reset` to run again.
    pub exhausted: Vec<String>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.counts.fail > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({}): {} iteration(s), stopped: {}",
            self.feature_id,
            self.mode.as_str(),
            self.iterations,
            self.stop
        )?;
        for attempt in &self.attempts {
            write!(
                f,
                "  {} attempt {}: {}",
                attempt.story_id, attempt.attempt, attempt.status_after
            )?;
            if let Some(error) = &attempt.error {
                write!(f, " ({})", first_line(error))?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "stories: {} total, {} pass, {} fail, {} in_progress, {} todo",
            self.counts.total,
            self.counts.pass,
            self.counts.fail,
            self.counts.in_progress,
            self.counts.todo
        )?;
        if !self.failed.is_empty() {
            write!(f, "\nfailed: {}", self.failed.join(", "))?;
        }
        if !self.exhausted.is_empty() {
            write!(f, "\nexhausted: {}", self.exhausted.join(", "))?;
        }
        Ok(())
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Iteration ceiling when none is given: every story's attempt ceiling summed.
pub fn default_max_iterations(prd: &Prd, max_attempts_per_story: u32) -> u32 {
    prd.stories
        .iter()
        .map(|story| story.effective_max_attempts(max_attempts_per_story))
        .sum::<u32>()
        .max(1)
}

/// Run iterations until the mode, eligibility or `max_iterations` stops the loop.
///
/// `max_iterations` only bounds `loop` mode; `once` always attempts one story.
/// A missing or corrupt PRD is fatal before any iteration. A story that reaches
/// `pass` or `fail` during this invocation is not selected again by it, so
/// `--force` revisits each story at most once per run.
pub fn run<P: Pipeline, V: VersionControl>(
    env: &LoopEnv<'_, P, V>,
    options: &RunOptions,
) -> Result<RunSummary> {
    let prd = load_prd(env.feature)?;
    let limit = options
        .max_iterations
        .unwrap_or_else(|| default_max_iterations(&prd, options.max_attempts_per_story));
    debug!(limit, mode = options.mode.as_str(), "starting run");

    let mut skip = HashSet::new();
    let mut attempts = Vec::new();
    let mut iterations = 0u32;
    let stop = loop {
        if options.mode == RunMode::Loop && iterations >= limit {
            let prd = load_prd(env.feature)?;
            if select_next_story(&prd, &options.select_options(), &skip).is_none() {
                break LoopStop::NoEligibleStory;
            }
            break LoopStop::MaxIterations { limit };
        }
        match run_step(env, options, iterations + 1, &skip)? {
            StepOutcome::NoEligibleStory => break LoopStop::NoEligibleStory,
            StepOutcome::Attempted(summary) => {
                iterations += 1;
                if summary.status_after.is_terminal() {
                    skip.insert(summary.story_id.clone());
                }
                attempts.push(summary);
                if options.mode == RunMode::Once {
                    break LoopStop::Once;
                }
            }
        }
    };

    let prd = load_prd(env.feature)?;
    let summary = RunSummary {
        feature_id: prd.feature_id.clone(),
        mode: options.mode,
        iterations,
        stop,
        counts: prd.status_counts(),
        attempts,
        failed: prd
            .stories
            .iter()
            .filter(|story| story.status == StoryStatus::Fail)
            .map(|story| story.id.clone())
            .collect(),
        exhausted: prd
            .stories
            .iter()
            .filter(|story| {
                story.status != StoryStatus::Fail
                    && is_exhausted(story, options.max_attempts_per_story)
            })
            .map(|story| story.id.clone())
            .collect(),
    };
    info!(
        iterations = summary.iterations,
        stop = %summary.stop,
        pass = summary.counts.pass,
        fail = summary.counts.fail,
        exhausted = summary.exhausted.len(),
        "run finished"
    );
    if !summary.exhausted.is_empty() {
        warn!(stories = ?summary.exhausted, "stories out of attempts but not failed");
    }
    Ok(summary)
}
