//! `coder`: run planned code-change tasks step by step.
//!
//! Task definitions live in `.coder/tasks/<id>.json`; execution state lives in
//! `.coder/state/<id>.json`. `run` and `resume` are safe to repeat: settled
//! steps are never re-executed.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};

use coder::core::types::TaskState;
use coder::execute::{ExecuteOptions, ExecutionOutcome, execute_task};
use coder::exit_codes;
use coder::io::config::load_config;
use coder::io::generator::OllamaGenerator;
use coder::io::git::Git;
use coder::io::init::{CoderPaths, ensure_workspace};
use coder::io::patch::GitPatchApplier;
use coder::io::state_store::StateStore;
use coder::io::task_store::{import_task_file, load_task};
use coder::logging;
use coder::start::initialize_run;
use coder::task::TaskDefinition;

#[derive(Parser)]
#[command(
    name = "coder",
    version,
    about = "Resumable execution engine for multi-step code-change tasks"
)]
struct Cli {
    /// Repository root containing `.coder/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log progress to stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.coder/` directories and a default `config.toml` if missing.
    Init,
    /// Initialize a task (branch + state) and execute it.
    #[command(group(ArgGroup::new("source").required(true).args(["task", "file"])))]
    Run {
        /// Id of a task already stored in `.coder/tasks/`.
        #[arg(long)]
        task: Option<String>,
        /// Task definition file to import into `.coder/tasks/` first.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Run without pausing for approvals.
        #[arg(long)]
        autonomous: bool,
    },
    /// Continue a task from its persisted state.
    Resume {
        task_id: String,
        #[arg(long)]
        autonomous: bool,
    },
    /// Print a task definition summary.
    Show { task_id: String },
    /// Print per-step status from the task state.
    Status { task_id: String },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let paths = CoderPaths::new(cli.root);
    match cli.command {
        Command::Init => {
            ensure_workspace(&paths.root, true)?;
            println!("initialized {}", paths.coder_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Run {
            task,
            file,
            autonomous,
        } => {
            let task_id = match (task, file) {
                (Some(task_id), _) => task_id,
                (None, Some(file)) => import_task_file(&paths, &file)?,
                (None, None) => unreachable!("clap requires --task or --file"),
            };
            cmd_execute(&paths, &task_id, autonomous)
        }
        Command::Resume {
            task_id,
            autonomous,
        } => cmd_execute(&paths, &task_id, autonomous),
        Command::Show { task_id } => {
            let task = load_task(&paths, &task_id)?;
            print!("{}", render_task(&task));
            Ok(exit_codes::OK)
        }
        Command::Status { task_id } => {
            let state = StateStore::new(&paths.state_dir).require(&task_id)?;
            let task = load_task(&paths, &task_id).ok();
            print!("{}", render_status(&state, task.as_ref()));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_execute(paths: &CoderPaths, task_id: &str, autonomous: bool) -> Result<i32> {
    let config = load_config(&paths.config_path)?;
    let init = initialize_run(paths, task_id)?;
    if init.already_initialized {
        println!("resuming {task_id} on {}", init.state.branch);
    } else {
        println!("initialized {task_id} on {}", init.state.branch);
    }

    let patcher = GitPatchApplier::new(Git::new(&paths.root), config.apply_timeout());
    let generator = OllamaGenerator::from_config(&config);
    let options = ExecuteOptions { autonomous };
    let outcome = execute_task(paths, &config, task_id, &options, &patcher, &generator)?;

    let state = StateStore::new(&paths.state_dir).require(task_id)?;
    let task = load_task(paths, task_id).ok();
    print!("{}", render_status(&state, task.as_ref()));
    match outcome {
        ExecutionOutcome::Completed => {
            println!("{task_id}: complete");
            Ok(exit_codes::OK)
        }
        ExecutionOutcome::Halted { step_id } => {
            println!("{task_id}: halted at step {step_id}");
            Ok(exit_codes::HALTED)
        }
    }
}

fn render_task(task: &TaskDefinition) -> String {
    let mut out = format!(
        "{}: {}\nbranch: {} (base {})\n",
        task.id, task.title, task.branch, task.base
    );
    if let Some(model) = &task.model {
        out.push_str(&format!("model: {model}\n"));
    }
    out.push_str("steps:\n");
    for (idx, step) in task.steps.iter().enumerate() {
        out.push_str(&format!(
            "  {}. [{}] {}: {}",
            idx + 1,
            step.kind.as_str(),
            step.id,
            step.goal
        ));
        if let Some(strategy) = step.strategy() {
            out.push_str(&format!(" (on_fail={})", strategy.as_str()));
        }
        out.push('\n');
    }
    out
}

/// One line per step, in task order when the definition is available.
fn render_status(state: &TaskState, task: Option<&TaskDefinition>) -> String {
    let order: Vec<&str> = match task {
        Some(task) => task.step_ids().collect(),
        None => state.steps.keys().map(String::as_str).collect(),
    };
    let mut out = format!(
        "{} on {} (updated {})\n",
        state.id,
        state.branch,
        state.updated_at.to_rfc3339()
    );
    for step_id in order {
        let Some(record) = state.steps.get(step_id) else {
            continue;
        };
        out.push_str(&format!("  {:<8} {}", record.status.as_str(), step_id));
        if record.retries > 0 {
            out.push_str(&format!(" (retries {})", record.retries));
        }
        if let Some(error) = &record.error {
            out.push_str(&format!(" error: {error}"));
        } else if let Some(note) = &record.note {
            out.push_str(&format!(" - {note}"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coder::core::types::StepStatus;
    use coder::test_support::{step, task};
    use coder::task::StepKind;

    #[test]
    fn parse_run_requires_task_or_file() {
        assert!(Cli::try_parse_from(["coder", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["coder", "run", "--task", "T-1", "--file", "t.json"]).is_err()
        );

        let cli = Cli::parse_from(["coder", "run", "--task", "T-1", "--autonomous"]);
        assert!(matches!(
            cli.command,
            Command::Run { task: Some(ref id), file: None, autonomous: true } if id == "T-1"
        ));
    }

    #[test]
    fn parse_resume_with_root() {
        let cli = Cli::parse_from(["coder", "resume", "T-2", "--root", "/repo"]);
        assert_eq!(cli.root, PathBuf::from("/repo"));
        assert!(matches!(cli.command, Command::Resume { ref task_id, autonomous: false } if task_id == "T-2"));
    }

    #[test]
    fn status_lists_steps_in_task_order() {
        let definition = task(
            "T-1",
            vec![step("zeta", StepKind::Analyze), step("alpha", StepKind::Shell)],
        );
        let mut state = TaskState::new("T-1", "agent/T-1", None, definition.step_ids(), Utc::now());
        if let Some(record) = state.steps.get_mut("alpha") {
            record.status = StepStatus::Failed;
            record.retries = 2;
            record.error = Some("boom".to_string());
        }

        let rendered = render_status(&state, Some(&definition));
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[1].contains("pending") && lines[1].contains("zeta"));
        assert!(lines[2].contains("failed") && lines[2].contains("(retries 2) error: boom"));
    }
}
