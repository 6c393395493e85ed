//! Markdown parsing for `spec.md` and `tasks.md`.
//!
//! Recognized story forms in `spec.md`:
//! - headings: `### User Story 1 - Title (Priority: P1)` or `## US1: Title`
//! - plain lines: `US1: Title` (optionally bulleted or bold)
//!
//! A story block runs until the next story, a heading at the same or a higher
//! level, or a `---` rule. Inside a block, `Priority:`, `Independent Test:` and
//! `Acceptance Scenarios:`/`Acceptance Criteria:` annotations are picked up;
//! remaining prose becomes the description.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::prd::Priority;

static STORY_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,6})\s+(?:\*\*)?(?i:user\s+story\s+(\d+)|US(\d+))\b(?:\*\*)?\s*[:.\-–—]?\s*(.*)$")
        .expect("story heading regex")
});
static STORY_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s+)?(?:\*\*)?US(\d+)(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.+)$")
        .expect("story line regex")
});
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+").expect("heading regex"));
static TITLE_PRIORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*priority\s*:\s*(P\d+)\s*\)").expect("title priority regex")
});
static PRIORITY_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^priority\s*:\s*(P\d+)\b").expect("priority regex"));
static INDEPENDENT_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^independent\s+test\s*:\s*(.*)$").expect("independent test regex")
});
static WHY_PRIORITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^why\s+this\s+priority\s*:").expect("why regex"));
static ACCEPTANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^acceptance\s+(?:scenarios|criteria)\b").expect("acceptance regex")
});
static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*+])\s+(?:\[[ xX]\]\s*)?(.+)$").expect("list item regex")
});
static TASK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s*\[([ xX])\]\s*(T\d+)\b\s*:?\s*(.*)$").expect("task regex")
});
static TASK_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[-*]\s*description\s*:\s*(.+)$").expect("task description regex")
});
static STORY_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bUS(\d+)\b").expect("story ref regex"));
static TASK_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:P|US\d+)\]\s*").expect("task tag regex"));

/// Number of leading prose lines used for the feature description.
const DESCRIPTION_LINES: usize = 6;

/// Parsed contents of `spec.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDocument {
    pub title: Option<String>,
    pub description: String,
    pub stories: Vec<ParsedStory>,
}

/// A story block from `spec.md`, before merge with loop-managed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStory {
    pub id: String,
    pub title: String,
    pub description: String,
    /// `None` when the block carries no recognizable priority tag.
    pub priority: Option<Priority>,
    pub acceptance_criteria: Vec<String>,
    pub independent_test: Option<String>,
}

/// A task line from `tasks.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTask {
    pub id: String,
    pub description: String,
    pub done: bool,
    /// Normalized story ids referenced by the task (may be empty or several).
    pub stories: Vec<String>,
}

/// Normalize a story number to its canonical id (`US01` and `US1` are the same story).
pub fn story_id(number: &str) -> String {
    match number.parse::<u32>() {
        Ok(n) => format!("US{n}"),
        Err(_) => format!("US{number}"),
    }
}

struct StoryBuilder {
    story: ParsedStory,
    /// Heading level that opened the block; `None` for plain `USx:` lines.
    level: Option<usize>,
    paragraphs: Vec<Vec<String>>,
    in_acceptance: bool,
}

impl StoryBuilder {
    fn new(id: String, raw_title: &str, level: Option<usize>) -> Self {
        let priority = TITLE_PRIORITY_RE
            .captures(raw_title)
            .and_then(|caps| Priority::parse(&caps[1]));
        let without_priority = TITLE_PRIORITY_RE.replace_all(raw_title, "");
        let title = strip_emphasis(
            &without_priority
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        );
        Self {
            story: ParsedStory {
                id,
                title,
                description: String::new(),
                priority,
                acceptance_criteria: Vec::new(),
                independent_test: None,
            },
            level,
            paragraphs: vec![Vec::new()],
            in_acceptance: false,
        }
    }

    fn push_line(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            if self.paragraphs.last().is_some_and(|p| !p.is_empty()) {
                self.paragraphs.push(Vec::new());
            }
            return;
        }

        let annotation = annotation_text(trimmed);
        if let Some(caps) = PRIORITY_LINE_RE.captures(&annotation) {
            if self.story.priority.is_none() {
                self.story.priority = Priority::parse(&caps[1]);
            }
            return;
        }
        if let Some(caps) = INDEPENDENT_TEST_RE.captures(&annotation) {
            let text = caps[1].trim();
            if !text.is_empty() {
                self.story.independent_test = Some(text.to_string());
            }
            self.in_acceptance = false;
            return;
        }
        if WHY_PRIORITY_RE.is_match(&annotation) {
            self.in_acceptance = false;
            return;
        }
        if ACCEPTANCE_RE.is_match(&annotation) {
            self.in_acceptance = true;
            return;
        }

        if self.in_acceptance {
            if let Some(caps) = LIST_ITEM_RE.captures(raw) {
                self.story
                    .acceptance_criteria
                    .push(strip_emphasis(caps[1].trim()));
                return;
            }
            let indented = raw.starts_with(char::is_whitespace);
            if indented && let Some(last) = self.story.acceptance_criteria.last_mut() {
                last.push(' ');
                last.push_str(&strip_emphasis(trimmed));
                return;
            }
            self.in_acceptance = false;
        }

        if let Some(paragraph) = self.paragraphs.last_mut() {
            paragraph.push(trimmed.to_string());
        }
    }

    /// Sub-heading inside the block: annotations like `### Acceptance Criteria`
    /// apply; any other heading ends an acceptance list.
    fn push_heading(&mut self, text: &str) {
        let annotation = annotation_text(text.trim());
        let is_annotation = [
            &*PRIORITY_LINE_RE,
            &*INDEPENDENT_TEST_RE,
            &*WHY_PRIORITY_RE,
            &*ACCEPTANCE_RE,
        ]
        .iter()
        .any(|re| re.is_match(&annotation));
        if is_annotation {
            self.push_line(text.trim());
        } else {
            self.in_acceptance = false;
        }
    }

    fn finish(mut self) -> ParsedStory {
        self.story.description = self
            .paragraphs
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.join(" "))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.story
    }
}

/// Parse `spec.md` into feature metadata and story blocks.
///
/// Only the first block for a given story id is kept; later duplicates are ignored.
pub fn parse_spec(contents: &str) -> SpecDocument {
    let mut stories = Vec::new();
    let mut seen = HashSet::new();
    let mut current: Option<StoryBuilder> = None;

    let mut finish = |builder: Option<StoryBuilder>, stories: &mut Vec<ParsedStory>| {
        if let Some(builder) = builder {
            let story = builder.finish();
            if seen.insert(story.id.clone()) {
                stories.push(story);
            }
        }
    };

    for line in contents.lines() {
        if let Some(caps) = STORY_HEADING_RE.captures(line) {
            finish(current.take(), &mut stories);
            let number = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            let level = caps[1].len();
            current = Some(StoryBuilder::new(story_id(number), &caps[4], Some(level)));
            continue;
        }
        if let Some(caps) = HEADING_RE.captures(line) {
            let level = caps[1].len();
            let closes = match current.as_ref().map(|c| c.level) {
                Some(Some(open_level)) => level <= open_level,
                Some(None) => true,
                None => false,
            };
            if closes {
                finish(current.take(), &mut stories);
            } else if let Some(builder) = current.as_mut() {
                builder.push_heading(&line[caps[0].len()..]);
            }
            continue;
        }
        if line.trim() == "---" {
            finish(current.take(), &mut stories);
            continue;
        }
        if let Some(caps) = STORY_LINE_RE.captures(line) {
            finish(current.take(), &mut stories);
            current = Some(StoryBuilder::new(story_id(&caps[1]), &caps[2], None));
            continue;
        }
        if let Some(builder) = current.as_mut() {
            builder.push_line(line);
        }
    }
    finish(current.take(), &mut stories);

    SpecDocument {
        title: parse_title(contents),
        description: parse_description(contents),
        stories,
    }
}

/// Parse task lines from `tasks.md`.
pub fn parse_tasks(contents: &str) -> Vec<ParsedTask> {
    let mut tasks: Vec<ParsedTask> = Vec::new();
    let mut in_task = false;

    for line in contents.lines() {
        if let Some(caps) = TASK_RE.captures(line) {
            let text = caps[3].trim();
            tasks.push(ParsedTask {
                id: caps[2].to_string(),
                description: clean_task_text(text),
                done: !caps[1].trim().is_empty(),
                stories: story_refs(text),
            });
            in_task = true;
            continue;
        }
        if !in_task {
            continue;
        }
        if let Some(caps) = TASK_DESCRIPTION_RE.captures(line)
            && let Some(task) = tasks.last_mut()
        {
            let extra = caps[1].trim();
            if task.description.is_empty() {
                task.description = clean_task_text(extra);
            } else {
                task.description = format!("{}: {}", task.description, clean_task_text(extra));
            }
            for id in story_refs(extra) {
                if !task.stories.contains(&id) {
                    task.stories.push(id);
                }
            }
            continue;
        }
        if HEADING_RE.is_match(line) {
            in_task = false;
        }
    }

    tasks
}

fn parse_title(contents: &str) -> Option<String> {
    let line = contents.lines().find(|line| line.starts_with("# "))?;
    let mut title = line[2..].trim();
    let prefix = "feature specification:";
    if let Some(head) = title.get(..prefix.len())
        && head.eq_ignore_ascii_case(prefix)
    {
        title = title[prefix.len()..].trim();
    }
    (!title.is_empty()).then(|| title.to_string())
}

fn parse_description(contents: &str) -> String {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && *line != "---")
        .take(DESCRIPTION_LINES)
        .collect::<Vec<_>>()
        .join(" ")
}

fn story_refs(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in STORY_REF_RE.captures_iter(text) {
        let id = story_id(&caps[1]);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn clean_task_text(text: &str) -> String {
    TASK_TAG_RE.replace_all(text, "").trim().to_string()
}

/// Line text with list markers and emphasis removed, for annotation matching.
fn annotation_text(line: &str) -> String {
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    strip_emphasis(line)
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "").replace("__", "").trim().to_string()
}
