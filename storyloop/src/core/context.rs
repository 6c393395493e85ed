//! Lean per-story context.
//!
//! The context carries the selected story, the raw `tasks.md` text and a manifest
//! of the other specification files. File bodies other than `tasks.md` are never
//! inlined; agents read them from disk.

use serde::Serialize;

use crate::prd::{Prd, Story, TaskRef};

/// Key of `tasks.md` inside `context.files`.
pub const TASKS_FILE: &str = "tasks.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeanContext {
    pub feature_id: String,
    pub feature_title: String,
    pub story: StoryBrief,
    pub tasks_md: Option<String>,
    pub manifest: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryBrief {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub acceptance_criteria: Vec<String>,
    pub independent_test: Option<String>,
    pub tasks: Vec<TaskRef>,
    /// Attempt number currently running (1-based).
    pub attempt: u32,
    /// Error from the previous attempt, if any.
    pub last_error: Option<String>,
}

/// A specification file available on disk, relative to the feature directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub path: String,
    pub bytes: usize,
}

pub fn build(story: &Story, prd: &Prd) -> LeanContext {
    let manifest = prd
        .context
        .files
        .iter()
        .filter(|(path, _)| path.as_str() != TASKS_FILE)
        .map(|(path, body)| ManifestEntry {
            path: path.clone(),
            bytes: body.len(),
        })
        .collect();

    LeanContext {
        feature_id: prd.feature_id.clone(),
        feature_title: prd.title.clone(),
        story: StoryBrief {
            id: story.id.clone(),
            title: story.title.clone(),
            description: story.description.clone(),
            priority: story.priority.to_string(),
            acceptance_criteria: story.acceptance_criteria.clone(),
            independent_test: story.independent_test.clone(),
            tasks: story.tasks.clone(),
            attempt: story.attempts,
            last_error: story.last_error.clone(),
        },
        tasks_md: prd.context.files.get(TASKS_FILE).cloned(),
        manifest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::Priority;
    use crate::test_support::{prd_with, story};

    #[test]
    fn context_lists_files_without_inlining_them() {
        let mut prd = prd_with(vec![story("US1", Priority::P1)]);
        prd.context.files.insert("spec.md".to_string(), "x".repeat(5000));
        prd.context.files.insert("plan.md".to_string(), "plan".to_string());
        prd.context.files.insert(TASKS_FILE.to_string(), "- [ ] T001 [US1] go".to_string());

        let ctx = build(&prd.stories[0], &prd);
        assert_eq!(ctx.tasks_md.as_deref(), Some("- [ ] T001 [US1] go"));
        let paths: Vec<_> = ctx.manifest.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["plan.md", "spec.md"]);
        assert_eq!(ctx.manifest[1].bytes, 5000);

        let json = serde_json::to_string(&ctx).expect("serialize");
        assert!(!json.contains(&"x".repeat(100)), "spec body must not be inlined");
    }

    #[test]
    fn context_carries_attempt_and_previous_error() {
        let mut retry = story("US1", Priority::P2);
        retry.attempts = 2;
        retry.last_error = Some("Tests failed".to_string());
        let prd = prd_with(vec![retry]);

        let ctx = build(&prd.stories[0], &prd);
        assert_eq!(ctx.story.attempt, 2);
        assert_eq!(ctx.story.priority, "P2");
        assert_eq!(ctx.story.last_error.as_deref(), Some("Tests failed"));
        assert_eq!(ctx.tasks_md, None);
    }
}
