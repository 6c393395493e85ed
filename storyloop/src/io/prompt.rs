//! Prompt rendering for planner, coder and reviewer agents.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are removed
//! in a fixed order and then the last remaining section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::context::LeanContext;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 5] = ["repo_files", "manifest", "tasks", "tests", "failure"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output at section markers. Empty droppable sections are skipped.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let overflow = total_len(sections).saturating_sub(budget);
    if overflow == 0 {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let before_len = last.content.len();
    let allowed = before_len.saturating_sub(overflow);
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders agent prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
    /// Feature directory as shown to agents (repo-relative).
    spec_dir: String,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize, spec_dir: impl Into<String>) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        env.add_template("coder", CODER_TEMPLATE)
            .context("load coder template")?;
        env.add_template("reviewer", REVIEWER_TEMPLATE)
            .context("load reviewer template")?;
        Ok(Self {
            env,
            budget_bytes,
            spec_dir: spec_dir.into(),
        })
    }

    /// Prompt asking the planner for `{instruction, target_files}`.
    pub fn planner(&self, ctx: &LeanContext, repo_files: &[String]) -> Result<String> {
        self.render(
            "planner",
            context! {
                feature_id => &ctx.feature_id,
                feature_title => &ctx.feature_title,
                story => &ctx.story,
                tasks_md => ctx.tasks_md.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                manifest => &ctx.manifest,
                spec_dir => &self.spec_dir,
                repo_files => repo_files,
            },
        )
    }

    /// Prompt for the coding agent. Without an instruction the story context itself
    /// is the instruction.
    pub fn coder(&self, ctx: &LeanContext, instruction: Option<&str>) -> Result<String> {
        self.render(
            "coder",
            context! {
                feature_id => &ctx.feature_id,
                feature_title => &ctx.feature_title,
                story => &ctx.story,
                tasks_md => ctx.tasks_md.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                manifest => &ctx.manifest,
                spec_dir => &self.spec_dir,
                instruction => instruction.map(str::trim).filter(|s| !s.is_empty()),
            },
        )
    }

    /// Prompt asking the reviewer for a `SHIP`/`REVISE` decision on `diff`.
    pub fn reviewer(
        &self,
        ctx: &LeanContext,
        diff: &str,
        test_summary: Option<&str>,
    ) -> Result<String> {
        self.render(
            "reviewer",
            context! {
                feature_id => &ctx.feature_id,
                feature_title => &ctx.feature_title,
                story => &ctx.story,
                diff => diff.trim_end(),
                test_summary => test_summary.map(str::trim).filter(|s| !s.is_empty()),
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .map_err(|err| anyhow!("missing template {name}: {err}"))?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::build;
    use crate::prd::Priority;
    use crate::test_support::{prd_with, story};

    fn sample_context() -> LeanContext {
        let mut retry = story("US1", Priority::P1);
        retry.acceptance_criteria = vec!["alerts are delivered".to_string()];
        retry.attempts = 2;
        retry.last_error = Some("Tests failed".to_string());
        let mut prd = prd_with(vec![retry]);
        prd.context
            .files
            .insert("tasks.md".to_string(), "- [ ] T001 [US1] build".repeat(40));
        prd.context
            .files
            .insert("spec.md".to_string(), "spec".to_string());
        build(&prd.stories[0], &prd)
    }

    /// Verifies coder prompt sections appear in a stable order.
    #[test]
    fn coder_prompt_ordering_is_stable() {
        let builder = PromptBuilder::new(100_000, "specs/001-demo").expect("builder");
        let prompt = builder
            .coder(&sample_context(), Some("Add the alert model"))
            .expect("render");

        let contract = prompt.find("### Coding Contract").expect("contract");
        let instruction = prompt.find("### Instruction").expect("instruction");
        let story = prompt.find("### Story US1").expect("story");
        let failure = prompt.find("### Previous Attempt Failed").expect("failure");
        let tasks = prompt.find("### tasks.md").expect("tasks");
        let manifest = prompt.find("### Specification Files").expect("manifest");
        assert!(contract < instruction);
        assert!(instruction < story);
        assert!(story < failure);
        assert!(failure < tasks);
        assert!(tasks < manifest);
        assert!(prompt.contains("- alerts are delivered"));
        assert!(prompt.contains("specs/001-demo"));
        assert!(!prompt.contains("<!--"), "markers are stripped");
    }

    #[test]
    fn coder_prompt_without_instruction_omits_section() {
        let builder = PromptBuilder::new(100_000, "specs/001-demo").expect("builder");
        let prompt = builder.coder(&sample_context(), None).expect("render");
        assert!(!prompt.contains("### Instruction"));
        assert!(prompt.contains("### Story US1"));
    }

    /// With a tight budget the manifest and tasks go first; required sections stay.
    #[test]
    fn budget_drops_less_critical_sections_first() {
        let builder = PromptBuilder::new(700, "specs/001-demo").expect("builder");
        let prompt = builder.coder(&sample_context(), None).expect("render");
        assert!(prompt.len() <= 700, "prompt is {} bytes", prompt.len());
        assert!(!prompt.contains("### Specification Files"));
        assert!(!prompt.contains("### tasks.md"));
        assert!(prompt.contains("### Coding Contract"));
        assert!(prompt.contains("### Story US1"));
    }

    #[test]
    fn reviewer_diff_is_truncated_last() {
        let builder = PromptBuilder::new(800, "specs/001-demo").expect("builder");
        let diff = "+line\n".repeat(1_000);
        let prompt = builder
            .reviewer(&sample_context(), &diff, Some("ok"))
            .expect("render");
        assert!(prompt.len() <= 800, "prompt is {} bytes", prompt.len());
        assert!(prompt.contains("### Review Contract"));
        assert!(prompt.ends_with("[truncated]"));
        assert!(!prompt.contains("### Test Output"));
    }
}
