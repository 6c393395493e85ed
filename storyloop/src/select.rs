//! Selection for `storyloop select` and each loop iteration.

use std::collections::HashSet;

use anyhow::Result;

use crate::core::selector::{SelectOptions, select_next_story};
use crate::io::paths::FeaturePaths;
use crate::io::prd_store::load_prd;
use crate::prd::{Prd, Priority, StoryStatus};

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Nothing eligible: every story is terminal or out of attempts, or the
    /// requested story is not eligible.
    NoEligibleStory,
    Selected(SelectedStory),
}

/// Minimal selected story metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedStory {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub status: StoryStatus,
    pub attempts: u32,
}

/// Select the next story from an in-memory PRD.
pub fn select_story(prd: &Prd, options: &SelectOptions<'_>) -> SelectOutcome {
    match select_next_story(prd, options, &HashSet::new()) {
        Some(story) => SelectOutcome::Selected(SelectedStory {
            id: story.id.clone(),
            title: story.title.clone(),
            priority: story.priority,
            status: story.status,
            attempts: story.attempts,
        }),
        None => SelectOutcome::NoEligibleStory,
    }
}

/// Load the feature's PRD and select the next story.
pub fn select_from_disk(feature: &FeaturePaths, options: &SelectOptions<'_>) -> Result<SelectOutcome> {
    let prd = load_prd(feature)?;
    Ok(select_story(&prd, options))
}
