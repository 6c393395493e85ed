//! Deterministic story selection.

use std::collections::HashSet;

use crate::prd::{Prd, Story, StoryStatus};

/// Selection knobs resolved from CLI flags and config.
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions<'a> {
    pub max_attempts_per_story: u32,
    pub story_id: Option<&'a str>,
    pub force: bool,
}

/// True if `story` may be picked under `options`.
///
/// `todo` is always eligible; `in_progress` while attempts remain; with `force`
/// every status is eligible, including `pass` and `fail`.
pub fn is_eligible(story: &Story, options: &SelectOptions<'_>) -> bool {
    if options.force {
        return true;
    }
    match story.status {
        StoryStatus::Todo => true,
        StoryStatus::InProgress => {
            story.attempts < story.effective_max_attempts(options.max_attempts_per_story)
        }
        StoryStatus::Pass | StoryStatus::Fail => false,
    }
}

/// Pick the next story to run.
///
/// Ranked by priority (`P1` first), then position in the PRD. An explicit
/// `story_id` is returned only if it is eligible; it is never substituted.
/// Stories in `skip` are never returned.
pub fn select_next_story<'p>(
    prd: &'p Prd,
    options: &SelectOptions<'_>,
    skip: &HashSet<String>,
) -> Option<&'p Story> {
    if let Some(id) = options.story_id {
        return prd
            .story(id)
            .filter(|story| !skip.contains(&story.id) && is_eligible(story, options));
    }

    prd.stories
        .iter()
        .enumerate()
        .filter(|(_, story)| !skip.contains(&story.id) && is_eligible(story, options))
        .min_by_key(|(position, story)| (story.priority, *position))
        .map(|(_, story)| story)
}

/// True if `story` ran out of attempts without passing.
pub fn is_exhausted(story: &Story, max_attempts_per_story: u32) -> bool {
    story.status != StoryStatus::Pass
        && story.attempts >= story.effective_max_attempts(max_attempts_per_story)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prd::Priority;
    use crate::test_support::{prd_with, story};

    fn options() -> SelectOptions<'static> {
        SelectOptions {
            max_attempts_per_story: 3,
            story_id: None,
            force: false,
        }
    }

    #[test]
    fn higher_priority_wins_over_position() {
        let prd = prd_with(vec![story("US1", Priority::P2), story("US2", Priority::P1)]);
        let picked = select_next_story(&prd, &options(), &HashSet::new()).expect("story");
        assert_eq!(picked.id, "US2");
    }

    #[test]
    fn ties_break_by_prd_position() {
        let prd = prd_with(vec![story("US3", Priority::P1), story("US1", Priority::P1)]);
        let picked = select_next_story(&prd, &options(), &HashSet::new()).expect("story");
        assert_eq!(picked.id, "US3");
    }

    #[test]
    fn terminal_and_exhausted_stories_are_skipped() {
        let mut passed = story("US1", Priority::P1);
        passed.status = StoryStatus::Pass;
        let mut failed = story("US2", Priority::P1);
        failed.status = StoryStatus::Fail;
        let mut exhausted = story("US3", Priority::P1);
        exhausted.status = StoryStatus::InProgress;
        exhausted.attempts = 3;
        let mut retrying = story("US4", Priority::P3);
        retrying.status = StoryStatus::InProgress;
        retrying.attempts = 1;

        let prd = prd_with(vec![passed, failed, exhausted, retrying]);
        let picked = select_next_story(&prd, &options(), &HashSet::new()).expect("story");
        assert_eq!(picked.id, "US4");
    }

    #[test]
    fn per_story_override_extends_attempts() {
        let mut retrying = story("US1", Priority::P1);
        retrying.status = StoryStatus::InProgress;
        retrying.attempts = 3;
        retrying.max_attempts = Some(5);
        let prd = prd_with(vec![retrying]);
        assert!(select_next_story(&prd, &options(), &HashSet::new()).is_some());
    }

    #[test]
    fn explicit_story_id_is_never_substituted() {
        let mut passed = story("US2", Priority::P1);
        passed.status = StoryStatus::Pass;
        let prd = prd_with(vec![story("US1", Priority::P1), passed]);

        let targeted = SelectOptions {
            story_id: Some("US2"),
            ..options()
        };
        assert!(select_next_story(&prd, &targeted, &HashSet::new()).is_none());

        let unknown = SelectOptions {
            story_id: Some("US9"),
            ..options()
        };
        assert!(select_next_story(&prd, &unknown, &HashSet::new()).is_none());

        let forced = SelectOptions {
            force: true,
            ..targeted
        };
        let picked = select_next_story(&prd, &forced, &HashSet::new()).expect("forced");
        assert_eq!(picked.id, "US2");
    }

    #[test]
    fn skip_set_excludes_even_forced_stories() {
        let prd = prd_with(vec![story("US1", Priority::P1), story("US2", Priority::P2)]);
        let forced = SelectOptions {
            force: true,
            ..options()
        };
        let skip = HashSet::from(["US1".to_string()]);
        let picked = select_next_story(&prd, &forced, &skip).expect("story");
        assert_eq!(picked.id, "US2");
    }

    #[test]
    fn exhausted_requires_attempts_maxed_and_not_passed() {
        let mut node = story("US1", Priority::P1);
        node.attempts = 3;
        assert!(is_exhausted(&node, 3));
        node.status = StoryStatus::Pass;
        assert!(!is_exhausted(&node, 3));
    }
}
