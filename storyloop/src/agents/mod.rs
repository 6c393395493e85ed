//! Agent capability interfaces for the plan → edit → review pipeline.
//!
//! Planner, coder and reviewer are distinct capabilities invoked in sequence.
//! [`command::CommandAgent`] backs all three with configurable child processes;
//! tests substitute scripted implementations.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod command;

/// Input for a planner or reviewer call.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    /// Where the raw agent output is recorded.
    pub log_path: PathBuf,
}

/// Input for a coder call.
#[derive(Debug, Clone)]
pub struct CodeRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    /// Files the coder may edit (repo-relative).
    pub target_files: Vec<String>,
    /// Specification files passed for reference only.
    pub read_only_files: Vec<PathBuf>,
    pub log_path: PathBuf,
}

/// What the coder process did, independent of whether the code is right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReport {
    pub timed_out: bool,
    pub exit_code: Option<i32>,
}

/// Planner answer: what to tell the coder and which files to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(alias = "aider_prompt")]
    pub instruction: String,
    #[serde(default)]
    pub target_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Ship,
    Revise,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Ship => "SHIP",
            Decision::Revise => "REVISE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Review {
    pub decision: Decision,
    pub reason: String,
}

pub trait Planner {
    fn plan(&self, request: &AgentRequest) -> anyhow::Result<Plan>;
}

pub trait Coder {
    fn edit(&self, request: &CodeRequest) -> anyhow::Result<CodeReport>;
}

pub trait Reviewer {
    fn review(&self, request: &AgentRequest) -> anyhow::Result<Review>;
}

static DECISION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s*#>`_-]*(SHIP|REVISE)\b[\s*`_]*[:\-]?\s*(.*)$").expect("decision regex")
});

/// Extract a plan from free-form planner output.
///
/// Accepts bare JSON or JSON inside a code fence or surrounding prose. Output
/// without a usable plan falls back to `fallback_instruction` with no targets.
pub fn parse_plan(raw: &str, fallback_instruction: &str) -> Plan {
    let fallback = || Plan {
        instruction: fallback_instruction.to_string(),
        target_files: Vec::new(),
    };
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return fallback();
    };
    if end < start {
        return fallback();
    }
    match serde_json::from_str::<Plan>(&raw[start..=end]) {
        Ok(plan) if !plan.instruction.trim().is_empty() => plan,
        _ => fallback(),
    }
}

/// Extract a SHIP/REVISE decision from free-form reviewer output.
///
/// A line starting with the decision wins; otherwise any `REVISE` mention
/// revises, any `SHIP` mention ships, and anything else revises.
pub fn parse_review(raw: &str) -> Review {
    for line in raw.lines() {
        if let Some(caps) = DECISION_LINE_RE.captures(line) {
            let decision = if caps[1].eq_ignore_ascii_case("ship") {
                Decision::Ship
            } else {
                Decision::Revise
            };
            let reason = caps[2].trim();
            let reason = if reason.is_empty() {
                first_other_line(raw, line)
            } else {
                reason.to_string()
            };
            return Review { decision, reason };
        }
    }

    let decision = if raw.contains("REVISE") {
        Decision::Revise
    } else if raw.contains("SHIP") {
        Decision::Ship
    } else {
        Decision::Revise
    };
    Review {
        decision,
        reason: first_other_line(raw, ""),
    }
}

fn first_other_line(raw: &str, skip: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != skip.trim())
        .unwrap_or_default()
        .to_string()
}

/// Keep planner targets that are code files outside the specification tree.
pub fn filter_target_files(targets: &[String], specs_prefix: &str) -> Vec<String> {
    const CODE_EXTENSIONS: [&str; 24] = [
        "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "rb", "php", "c", "h", "cc",
        "cpp", "hpp", "cs", "swift", "scala", "sh", "toml", "json", "yaml", "yml",
    ];
    let mut kept: Vec<String> = Vec::new();
    for target in targets {
        let path = target.trim().trim_start_matches("./");
        if path.is_empty() || path.starts_with('/') || path.split('/').any(|part| part == "..") {
            continue;
        }
        if !specs_prefix.is_empty() && path.starts_with(specs_prefix) {
            continue;
        }
        let is_code = std::path::Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext));
        if is_code && !kept.iter().any(|k| k == path) {
            kept.push(path.to_string());
        }
    }
    kept
}
