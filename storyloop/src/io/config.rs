//! Loop configuration stored at `<repo>/storyloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File name of the config at the repository root.
pub const CONFIG_FILE: &str = "storyloop.toml";

/// Placeholder in agent argv replaced by the configured model.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Loop configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults and a
/// missing file yields the default config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Directory holding one sub-directory per feature, relative to the repo root.
    pub specs_dir: PathBuf,

    /// Scratch directory for iteration logs, relative to the repo root.
    pub state_dir: PathBuf,

    /// Global attempt ceiling for stories without a `max_attempts` override.
    pub max_attempts_per_story: u32,

    /// Upper bound for rendered agent prompts.
    pub prompt_budget_bytes: usize,

    /// Truncate captured child stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub tests: TestsConfig,
    pub agents: AgentsConfig,
    pub commit: CommitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Shell command; empty means detect from repository markers.
    pub command: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentsConfig {
    pub timeout_secs: u64,
    pub planner: AgentCommandConfig,
    pub coder: AgentCommandConfig,
    pub reviewer: AgentCommandConfig,
}

/// How to launch one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCommandConfig {
    /// Program and arguments; `{model}` is substituted.
    pub command: Vec<String>,
    #[serde(default)]
    pub model: String,
    /// When set, the prompt is passed as `<prompt_arg> <prompt>` instead of stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_arg: Option<String>,
    /// When set, each specification file is passed as `<read_only_arg> <path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_arg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    pub message_prefix: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            specs_dir: PathBuf::from("specs"),
            state_dir: PathBuf::from(".storyloop"),
            max_attempts_per_story: 3,
            prompt_budget_bytes: 40_000,
            output_limit_bytes: 100_000,
            tests: TestsConfig::default(),
            agents: AgentsConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        let chat = |model: &str| AgentCommandConfig {
            command: vec![
                "ollama".to_string(),
                "run".to_string(),
                MODEL_PLACEHOLDER.to_string(),
            ],
            model: model.to_string(),
            prompt_arg: None,
            read_only_arg: None,
        };
        Self {
            timeout_secs: 30 * 60,
            planner: chat("llama3.1:8b"),
            coder: AgentCommandConfig {
                command: vec![
                    "aider".to_string(),
                    "--model".to_string(),
                    MODEL_PLACEHOLDER.to_string(),
                    "--yes-always".to_string(),
                    "--no-auto-commits".to_string(),
                ],
                model: "ollama/qwen2.5-coder:14b".to_string(),
                prompt_arg: Some("--message".to_string()),
                read_only_arg: Some("--read".to_string()),
            },
            reviewer: chat("llama3.1:8b"),
        }
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            message_prefix: "feat".to_string(),
        }
    }
}

impl AgentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TestsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_per_story == 0 {
            return Err(anyhow!("max_attempts_per_story must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tests.timeout_secs == 0 {
            return Err(anyhow!("tests.timeout_secs must be > 0"));
        }
        if self.agents.timeout_secs == 0 {
            return Err(anyhow!("agents.timeout_secs must be > 0"));
        }
        for (name, agent) in [
            ("planner", &self.agents.planner),
            ("coder", &self.agents.coder),
            ("reviewer", &self.agents.reviewer),
        ] {
            if agent.command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(anyhow!("agents.{name}.command must be a non-empty array"));
            }
        }
        if self.specs_dir.as_os_str().is_empty() || self.state_dir.as_os_str().is_empty() {
            return Err(anyhow!("specs_dir and state_dir must be non-empty"));
        }
        Ok(())
    }

    /// Test command to run, falling back to detection when unset.
    pub fn resolve_test_command(&self, root: &Path) -> Option<String> {
        let configured = self.tests.command.trim();
        if configured.is_empty() {
            detect_test_command(root)
        } else {
            Some(configured.to_string())
        }
    }
}

/// Guess the project's test command from repository markers.
pub fn detect_test_command(root: &Path) -> Option<String> {
    let has = |name: &str| root.join(name).exists();
    let command = if has("Cargo.toml") {
        "cargo test"
    } else if has("package.json") {
        "npm test"
    } else if has("pyproject.toml") || has("pytest.ini") {
        "pytest"
    } else if has("setup.py") || has_python_sources(root) {
        "python -m unittest"
    } else {
        return None;
    };
    debug!(command, "detected test command");
    Some(command.to_string())
}

fn has_python_sources(root: &Path) -> bool {
    fs::read_dir(root).is_ok_and(|entries| {
        entries
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.path().extension().is_some_and(|ext| ext == "py"))
    })
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
