//! Orchestration for `storyloop reset`: re-open a failed story.

use anyhow::{Result, anyhow};
use tracing::info;

use crate::core::state_update::reset_story;
use crate::io::paths::FeaturePaths;
use crate::io::prd_store::{load_prd, write_prd};
use crate::prd::Story;

/// Set `story_id` back to `todo` with `extra_attempts` more tries and persist.
///
/// Only `fail` and `in_progress` stories can be reset; attempts are kept.
pub fn reset(feature: &FeaturePaths, story_id: &str, extra_attempts: u32) -> Result<Story> {
    let prd = load_prd(feature)?;
    let next = reset_story(&prd, story_id, extra_attempts).map_err(|err| anyhow!(err))?;
    write_prd(&feature.prd_path, &next)?;
    let story = next
        .story(story_id)
        .cloned()
        .ok_or_else(|| anyhow!("story '{story_id}' not found"))?;
    info!(
        story_id,
        attempts = story.attempts,
        max_attempts = ?story.max_attempts,
        "story reset"
    );
    Ok(story)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::LoopConfig;
    use crate::io::paths::RepoPaths;
    use crate::prd::{Priority, StoryStatus};
    use crate::test_support::{FEATURE_ID, prd_with, story_with_state};

    #[test]
    fn reset_reopens_failed_story() {
        let temp = tempfile::tempdir().expect("tempdir");
        let feature = RepoPaths::new(temp.path(), &LoopConfig::default()).feature(FEATURE_ID);
        let mut failed = story_with_state("US1", Priority::P1, StoryStatus::Fail, 3);
        failed.last_error = Some("Tests failed".to_string());
        write_prd(&feature.prd_path, &prd_with(vec![failed])).expect("write");

        let story = reset(&feature, "US1", 2).expect("reset");
        assert_eq!(story.status, StoryStatus::Todo);
        assert_eq!(story.attempts, 3);
        assert_eq!(story.max_attempts, Some(5));
        assert_eq!(story.last_error, None);
        assert_eq!(load_prd(&feature).expect("load").stories[0], story);
    }

    #[test]
    fn reset_refuses_passed_story() {
        let temp = tempfile::tempdir().expect("tempdir");
        let feature = RepoPaths::new(temp.path(), &LoopConfig::default()).feature(FEATURE_ID);
        let passed = story_with_state("US1", Priority::P1, StoryStatus::Pass, 1);
        write_prd(&feature.prd_path, &prd_with(vec![passed])).expect("write");

        assert!(reset(&feature, "US1", 3).is_err());
        assert!(reset(&feature, "US9", 3).is_err());
    }
}
