//! Merge freshly parsed specifications with the persisted PRD.
//!
//! Structural fields (title, description, priority, acceptance criteria, tasks)
//! always come from the specs. Loop-managed fields (`status`, `attempts`,
//! `max_attempts`, `last_error`) carry forward by story id.

use std::collections::BTreeMap;

use crate::core::spec_parse::{ParsedStory, ParsedTask, SpecDocument};
use crate::prd::{Prd, PrdContext, SCHEMA_VERSION, Story, StoryStatus, TaskRef};

/// What a merge did, for the generator to report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: Vec<String>,
    pub carried: Vec<String>,
    /// Persisted stories no longer present in `spec.md`.
    pub dropped: Vec<String>,
    /// Stories that fell back to the default priority.
    pub defaulted_priority: Vec<String>,
    /// Task ids that reference a story id missing from `spec.md`.
    pub orphan_tasks: Vec<String>,
}

/// Inputs for one merge.
pub struct MergeInput<'a> {
    pub feature_id: &'a str,
    pub spec: &'a SpecDocument,
    pub tasks: &'a [ParsedTask],
    pub files: BTreeMap<String, String>,
    pub previous: Option<&'a Prd>,
}

/// Build the next PRD from parsed specs and the previous PRD (if any).
///
/// Story order follows first appearance in `spec.md`. A task referencing several
/// stories is attached to each of them; untagged tasks never create stories.
pub fn merge_prd(input: MergeInput<'_>) -> (Prd, MergeReport) {
    let mut report = MergeReport::default();

    let stories: Vec<Story> = input
        .spec
        .stories
        .iter()
        .map(|parsed| {
            let previous = input.previous.and_then(|prd| prd.story(&parsed.id));
            if previous.is_some() {
                report.carried.push(parsed.id.clone());
            } else {
                report.added.push(parsed.id.clone());
            }
            if parsed.priority.is_none() {
                report.defaulted_priority.push(parsed.id.clone());
            }
            merge_story(parsed, previous, input.tasks)
        })
        .collect();

    if let Some(previous) = input.previous {
        report.dropped = previous
            .stories
            .iter()
            .filter(|old| !stories.iter().any(|story| story.id == old.id))
            .map(|old| old.id.clone())
            .collect();
    }

    for task in input.tasks {
        let orphaned = task
            .stories
            .iter()
            .any(|id| !stories.iter().any(|story| &story.id == id));
        if orphaned {
            report.orphan_tasks.push(task.id.clone());
        }
    }

    let title = input
        .spec
        .title
        .clone()
        .unwrap_or_else(|| format!("Feature {}", input.feature_id));

    let prd = Prd {
        schema_version: SCHEMA_VERSION,
        feature_id: input.feature_id.to_string(),
        title,
        description: input.spec.description.clone(),
        context: PrdContext { files: input.files },
        stories,
        run_metadata: input.previous.and_then(|prd| prd.run_metadata.clone()),
    };

    (prd, report)
}

fn merge_story(parsed: &ParsedStory, previous: Option<&Story>, tasks: &[ParsedTask]) -> Story {
    let linked = tasks
        .iter()
        .filter(|task| task.stories.contains(&parsed.id))
        .map(|task| TaskRef {
            id: task.id.clone(),
            description: task.description.clone(),
            done: task.done,
        })
        .collect();

    let mut story = Story {
        id: parsed.id.clone(),
        title: parsed.title.clone(),
        description: parsed.description.clone(),
        priority: parsed.priority.unwrap_or_default(),
        acceptance_criteria: parsed.acceptance_criteria.clone(),
        independent_test: parsed.independent_test.clone(),
        tasks: linked,
        status: StoryStatus::Todo,
        attempts: 0,
        max_attempts: None,
        last_error: None,
    };

    if let Some(previous) = previous {
        story.status = previous.status;
        story.attempts = previous.attempts;
        story.max_attempts = previous.max_attempts;
        story.last_error = previous.last_error.clone();
    }

    story
}
