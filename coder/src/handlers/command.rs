//! `shell` and `test` handlers.

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use crate::core::commands::{is_allowed, leading_executable, test_command};
use crate::core::types::StepResult;
use crate::error::EngineError;
use crate::handlers::StepContext;
use crate::io::process::{ShellRun, run_shell as run_command};

pub(super) fn run_shell<P, D>(ctx: &StepContext<'_, P, D>) -> Result<StepResult> {
    let Some(command) = ctx
        .step
        .cmd
        .as_deref()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
    else {
        return Ok(StepResult::skipped("No shell command specified."));
    };

    let allow = &ctx.config.shell.allow;
    if !is_allowed(command, allow) {
        let err = EngineError::CommandNotAllowed {
            binary: leading_executable(command).to_string(),
            allow: allow.clone(),
        };
        warn!(step_id = %ctx.step.id, error = %err, "command rejected");
        return Ok(StepResult::failed(err.to_string()));
    }

    let cwd = ctx.working_dir();
    let timeout = ctx.config.shell_timeout();
    ctx.events.record(
        "shell-execute",
        Some(&ctx.step.id),
        json!({
            "command": command,
            "cwd": cwd.display().to_string(),
            "timeout_secs": timeout.as_secs(),
        }),
    );
    info!(step_id = %ctx.step.id, command, "running shell command");
    let run = run_command(command, &cwd, timeout, ctx.config.output_limit_bytes);
    let artifacts = capture_output(ctx, &run, "stdout", "stderr")?;

    Ok(match run.failure {
        Some(err) => StepResult::failed(err.to_string()),
        None => StepResult::success(format!(
            "Command exited with code {}.",
            run.exit_code.unwrap_or(0)
        )),
    }
    .with_artifacts(artifacts))
}

pub(super) fn run_tests<P, D>(ctx: &StepContext<'_, P, D>) -> Result<StepResult> {
    let framework = ctx
        .step
        .framework
        .as_deref()
        .or(ctx.config.tests.default_framework.as_deref());
    let command = match ctx.step.cmd.as_deref().map(str::trim) {
        Some(cmd) if !cmd.is_empty() => cmd.to_string(),
        _ => test_command(framework, &ctx.step.args),
    };

    let cwd = ctx.working_dir();
    let timeout = ctx.config.tests_timeout();
    ctx.events.record(
        "tests-execute",
        Some(&ctx.step.id),
        json!({
            "framework": framework,
            "command": command,
            "args": ctx.step.args,
            "cwd": cwd.display().to_string(),
        }),
    );
    info!(step_id = %ctx.step.id, command = %command, "running tests");
    let run = run_command(&command, &cwd, timeout, ctx.config.output_limit_bytes);
    let artifacts = capture_output(ctx, &run, "test-stdout", "test-stderr")?;

    Ok(match run.failure {
        Some(err) => StepResult::failed(err.to_string()),
        None => StepResult::success(format!(
            "Tests passed (exit code {}).",
            run.exit_code.unwrap_or(0)
        )),
    }
    .with_artifacts(artifacts))
}

fn capture_output<P, D>(
    ctx: &StepContext<'_, P, D>,
    run: &ShellRun,
    stdout_label: &str,
    stderr_label: &str,
) -> Result<Vec<String>> {
    let mut artifacts = Vec::new();
    if !run.stdout.is_empty() {
        artifacts.push(ctx.write_artifact(stdout_label, &run.stdout)?);
    }
    if !run.stderr.is_empty() {
        artifacts.push(ctx.write_artifact(stderr_label, &run.stderr)?);
    }
    Ok(artifacts)
}
