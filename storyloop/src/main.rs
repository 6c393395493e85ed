//! Specification-driven story loop CLI.
//!
//! `generate` compiles `specs/<feature-id>/` into `prd.json`; `run` works the
//! PRD's stories through the agent pipeline; `select` previews the next story;
//! `reset` re-opens a failed one.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use storyloop::core::feature::validate_feature_id;
use storyloop::core::selector::SelectOptions;
use storyloop::exit_codes;
use storyloop::generate::generate;
use storyloop::io::config::{CONFIG_FILE, LoopConfig, load_config};
use storyloop::io::git::Git;
use storyloop::io::iteration_log::ensure_state_gitignore;
use storyloop::io::paths::RepoPaths;
use storyloop::looping::run;
use storyloop::pipeline::{PipelineFlags, command_pipeline};
use storyloop::reset::reset;
use storyloop::select::{SelectOutcome, select_from_disk};
use storyloop::step::{LoopEnv, RunMode, RunOptions};

#[derive(Parser)]
#[command(
    name = "storyloop",
    version,
    about = "Turn feature specs into a story queue and work it with coding agents"
)]
struct Cli {
    /// Repository root (defaults to the enclosing git checkout, else the cwd).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Debug logging for storyloop (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse `specs/<feature-id>/` and write (or refresh) its `prd.json`.
    Generate { feature_id: String },
    /// Work eligible stories through plan, edit, test and review.
    Run(RunArgs),
    /// Print the id of the next eligible story.
    Select {
        feature_id: String,
        #[arg(long)]
        story_id: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        max_attempts_per_story: Option<u32>,
    },
    /// Re-open a failed or in-progress story with more attempts.
    Reset {
        feature_id: String,
        story_id: String,
        /// Extra attempts to allow (defaults to `max_attempts_per_story`).
        #[arg(long)]
        attempts: Option<u32>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    feature_id: String,
    #[arg(long, value_enum, default_value = "once")]
    mode: RunMode,
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long)]
    max_attempts_per_story: Option<u32>,
    /// Run this story only (never substituted when ineligible).
    #[arg(long)]
    story_id: Option<String>,
    /// Make `pass` and `fail` stories eligible again.
    #[arg(long)]
    force: bool,
    /// Commit on the current branch after each passing story.
    #[arg(long)]
    auto_commit: bool,
    /// Skip the test command.
    #[arg(long)]
    no_tests: bool,
    /// Skip the planner and reviewer; the coder works from the story alone.
    #[arg(long)]
    no_agents: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    storyloop::logging::init(cli.verbose);
    match dispatch(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let root = resolve_root(cli.root.as_deref())?;
    let config = load_config(&root.join(CONFIG_FILE))?;
    let repo = RepoPaths::new(&root, &config);

    match cli.command {
        Command::Generate { feature_id } => {
            let outcome = generate(&repo.feature(&feature_id))?;
            println!(
                "{}: {} stories written to {}",
                feature_id,
                outcome.prd.stories.len(),
                repo.relative(&repo.feature(&feature_id).prd_path).display()
            );
            Ok(exit_codes::OK)
        }
        Command::Run(args) => cmd_run(&repo, &config, args),
        Command::Select {
            feature_id,
            story_id,
            force,
            max_attempts_per_story,
        } => {
            validate_feature_id(&feature_id)?;
            let options = SelectOptions {
                max_attempts_per_story: max_attempts_per_story
                    .unwrap_or(config.max_attempts_per_story),
                story_id: story_id.as_deref(),
                force,
            };
            match select_from_disk(&repo.feature(&feature_id), &options)? {
                SelectOutcome::Selected(story) => {
                    println!("{}", story.id);
                    Ok(exit_codes::OK)
                }
                SelectOutcome::NoEligibleStory => {
                    println!("COMPLETE");
                    Ok(exit_codes::COMPLETE)
                }
            }
        }
        Command::Reset {
            feature_id,
            story_id,
            attempts,
        } => {
            validate_feature_id(&feature_id)?;
            let extra = attempts.unwrap_or(config.max_attempts_per_story);
            let story = reset(&repo.feature(&feature_id), &story_id, extra)?;
            println!(
                "{}: {} reset to {} ({} attempts used, max {})",
                feature_id,
                story.id,
                story.status,
                story.attempts,
                story.max_attempts.unwrap_or(config.max_attempts_per_story)
            );
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(repo: &RepoPaths, config: &LoopConfig, args: RunArgs) -> Result<i32> {
    validate_feature_id(&args.feature_id)?;
    if args.max_attempts_per_story == Some(0) {
        bail!("--max-attempts-per-story must be > 0");
    }
    let feature = repo.feature(&args.feature_id);
    ensure_state_gitignore(repo)?;

    let pipeline = command_pipeline(
        repo,
        config,
        &args.feature_id,
        PipelineFlags {
            use_agents: !args.no_agents,
            run_tests: !args.no_tests,
        },
    )?;
    let vcs = Git::new(repo.root.clone());
    let env = LoopEnv {
        feature: &feature,
        pipeline: &pipeline,
        vcs: &vcs,
        commit_prefix: &config.commit.message_prefix,
    };
    let options = RunOptions {
        mode: args.mode,
        max_iterations: args.max_iterations,
        max_attempts_per_story: args
            .max_attempts_per_story
            .unwrap_or(config.max_attempts_per_story),
        story_id: args.story_id,
        force: args.force,
        auto_commit: args.auto_commit,
    };

    let summary = run(&env, &options)?;
    println!("{summary}");
    Ok(if summary.has_failures() {
        exit_codes::STORIES_FAILED
    } else {
        exit_codes::OK
    })
}

fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    Ok(Git::toplevel(&cwd).unwrap_or(cwd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults_to_once() {
        let cli = Cli::parse_from(["storyloop", "run", "001-alerts"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, RunMode::Once);
        assert!(!args.force && !args.auto_commit && !args.no_tests && !args.no_agents);
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from([
            "storyloop",
            "--verbose",
            "run",
            "001-alerts",
            "--mode",
            "loop",
            "--max-iterations",
            "4",
            "--story-id",
            "US2",
            "--force",
            "--no-tests",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, RunMode::Loop);
        assert_eq!(args.max_iterations, Some(4));
        assert_eq!(args.story_id.as_deref(), Some("US2"));
        assert!(args.force && args.no_tests);
    }

    #[test]
    fn parse_reset_attempts() {
        let cli = Cli::parse_from(["storyloop", "reset", "001-alerts", "US1", "--attempts", "2"]);
        assert!(matches!(
            cli.command,
            Command::Reset { attempts: Some(2), .. }
        ));
    }
}
