//! Child-process backed agents configured from `[agents.*]`.

use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use super::{AgentRequest, CodeReport, CodeRequest, Coder, Plan, Planner, Review, Reviewer};
use crate::io::config::{AgentCommandConfig, MODEL_PLACEHOLDER};
use crate::io::iteration_log::write_text;
use crate::io::process::{CommandOutput, run_command_with_stream, run_command_with_timeout};

/// An agent launched as `command...` with the prompt on stdin or behind `prompt_arg`.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: &'static str,
    config: AgentCommandConfig,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(
        name: &'static str,
        config: AgentCommandConfig,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            name,
            config,
            timeout,
            output_limit_bytes,
        }
    }

    /// Argv with `{model}` substituted, followed by read-only references, the
    /// prompt argument (if configured) and finally the target files.
    pub fn argv(&self, prompt: &str, read_only: &[String], targets: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = self
            .config
            .command
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, &self.config.model))
            .collect();
        if let Some(flag) = &self.config.read_only_arg {
            for path in read_only {
                argv.push(flag.clone());
                argv.push(path.clone());
            }
        }
        if let Some(flag) = &self.config.prompt_arg {
            argv.push(flag.clone());
            argv.push(prompt.to_string());
        }
        argv.extend(targets.iter().cloned());
        argv
    }

    fn command(&self, workdir: &std::path::Path, argv: &[String]) -> Result<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("{} command is empty", self.name))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);
        Ok(cmd)
    }

    fn stdin<'a>(&self, prompt: &'a str) -> Option<&'a [u8]> {
        self.config.prompt_arg.is_none().then_some(prompt.as_bytes())
    }

    /// Run a prompt-in/text-out agent and return stdout.
    fn ask(&self, request: &AgentRequest) -> Result<String> {
        let argv = self.argv(&request.prompt, &[], &[]);
        let cmd = self.command(&request.workdir, &argv)?;
        let output = run_command_with_timeout(
            cmd,
            self.stdin(&request.prompt),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| self.spawn_error(err))?;
        write_text(&request.log_path, &output.combined_log(self.name))?;
        if !output.success() {
            return Err(anyhow!("{}", output.failure_summary(self.name)));
        }
        Ok(output.stdout_text())
    }

    fn spawn_error(&self, err: anyhow::Error) -> anyhow::Error {
        let not_found = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
            .any(|io| io.kind() == ErrorKind::NotFound);
        if not_found {
            let program = self.config.command.first().map_or("", String::as_str);
            anyhow!("{} command '{}' not found", self.name, program)
        } else {
            err.context(format!("run {}", self.name))
        }
    }
}

impl Planner for CommandAgent {
    #[instrument(skip_all, fields(agent = self.name))]
    fn plan(&self, request: &AgentRequest) -> Result<Plan> {
        let raw = self.ask(request)?;
        let plan = super::parse_plan(&raw, "");
        if plan.instruction.is_empty() {
            return Err(anyhow!("planner returned no usable plan"));
        }
        info!(targets = plan.target_files.len(), "plan received");
        Ok(plan)
    }
}

impl Reviewer for CommandAgent {
    #[instrument(skip_all, fields(agent = self.name))]
    fn review(&self, request: &AgentRequest) -> Result<Review> {
        let raw = self.ask(request)?;
        let review = super::parse_review(&raw);
        info!(decision = review.decision.as_str(), "review received");
        Ok(review)
    }
}

impl Coder for CommandAgent {
    #[instrument(skip_all, fields(agent = self.name, targets = request.target_files.len()))]
    fn edit(&self, request: &CodeRequest) -> Result<CodeReport> {
        let read_only = request
            .read_only_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>();
        let argv = self.argv(&request.prompt, &read_only, &request.target_files);
        let cmd = self.command(&request.workdir, &argv)?;
        let output: CommandOutput = run_command_with_stream(
            cmd,
            self.stdin(&request.prompt),
            self.timeout,
            self.output_limit_bytes,
            &request.log_path,
        )
        .map_err(|err| self.spawn_error(err))?;

        if !output.stderr.is_empty() || output.timed_out {
            let mut log = output.combined_log(self.name);
            log.insert_str(0, "\n--- combined output ---\n");
            append_text(&request.log_path, &log)?;
        }
        if !output.success() {
            warn!(summary = %output.failure_summary(self.name), "coder exited unsuccessfully");
        }
        Ok(CodeReport {
            timed_out: output.timed_out,
            exit_code: output.status.code(),
        })
    }
}

fn append_text(path: &std::path::Path, contents: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}
