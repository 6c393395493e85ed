//! PRD document model (`specs/<feature-id>/prd.json`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Current on-disk PRD layout version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prd {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub feature_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub context: PrdContext,
    pub stories: Vec<Story>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_metadata: Option<RunMetadata>,
}

/// Raw specification files keyed by path relative to the feature directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrdContext {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Bookkeeping written by the loop and carried across regeneration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunMetadata {
    pub last_run_mode: Option<String>,
    pub total_iterations: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub independent_test: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskRef>,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Story {
    /// Per-story override, else the global ceiling.
    pub fn effective_max_attempts(&self, default_max: u32) -> u32 {
        self.max_attempts.unwrap_or(default_max)
    }
}

/// A `tasks.md` entry linked to a story.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRef {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

/// Story priority tier; `P1` sorts first.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    P1,
    P2,
    #[default]
    P3,
}

impl Priority {
    /// Parse `P1`..`P3` (case-insensitive). Other tiers are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P1" => Some(Priority::P1),
            "P2" => Some(Priority::P2),
            "P3" => Some(Priority::P3),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Todo,
    InProgress,
    Pass,
    Fail,
}

impl StoryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StoryStatus::Pass | StoryStatus::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Todo => "todo",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Pass => "pass",
            StoryStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-status story counts for run summaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub pass: usize,
    pub fail: usize,
}

impl Prd {
    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|story| story.id == id)
    }

    pub fn story_mut(&mut self, id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find(|story| story.id == id)
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.stories.len(),
            ..StatusCounts::default()
        };
        for story in &self.stories {
            match story.status {
                StoryStatus::Todo => counts.todo += 1,
                StoryStatus::InProgress => counts.in_progress += 1,
                StoryStatus::Pass => counts.pass += 1,
                StoryStatus::Fail => counts.fail += 1,
            }
        }
        counts
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_p1_first() {
        let mut tiers = vec![Priority::P3, Priority::P1, Priority::P2];
        tiers.sort();
        assert_eq!(tiers, vec![Priority::P1, Priority::P2, Priority::P3]);
        assert_eq!(Priority::default(), Priority::P3);
    }

    #[test]
    fn story_deserializes_with_loop_defaults() {
        let story: Story =
            serde_json::from_str(r#"{"id":"US1","title":"Alerts"}"#).expect("parse story");
        assert_eq!(story.status, StoryStatus::Todo);
        assert_eq!(story.attempts, 0);
        assert_eq!(story.priority, Priority::P3);
        assert_eq!(story.last_error, None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&StoryStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in_progress\"");
    }
}
