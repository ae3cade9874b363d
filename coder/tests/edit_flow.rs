//! End-to-end edit flows against a real git repository and `git apply`.
//!
//! Only diff generation is scripted.

use std::fs;
use std::time::Duration;

use coder::core::types::StepStatus;
use coder::execute::{ExecuteOptions, ExecutionOutcome, execute_task};
use coder::io::config::EngineConfig;
use coder::io::git::Git;
use coder::io::init::CoderPaths;
use coder::io::patch::GitPatchApplier;
use coder::io::state_store::StateStore;
use coder::io::task_store::write_task;
use coder::start::initialize_run;
use coder::task::{FileChange, StepKind, TaskDefinition};
use coder::test_support::{ScriptedGenerator, TestRepo, generated, step, task};

const README_DIFF: &str = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-hi\n+hello\n";

fn analyze_edit_test() -> TaskDefinition {
    let mut edit = step("edit", StepKind::Edit);
    edit.changes = vec![FileChange {
        path: "README.md".to_string(),
        mode: None,
    }];
    let mut test = step("test", StepKind::Test);
    test.cmd = Some("grep -q hello README.md".to_string());
    task(
        "T-1",
        vec![step("look", StepKind::Analyze), edit, test],
    )
}

fn prepare(repo: &TestRepo, definition: &TaskDefinition) -> CoderPaths {
    let paths = CoderPaths::new(repo.path());
    write_task(&paths.task_path(&definition.id), definition).expect("write task");
    initialize_run(&paths, &definition.id).expect("initialize");
    paths
}

fn applier(repo: &TestRepo) -> GitPatchApplier {
    GitPatchApplier::new(Git::new(repo.path()), Duration::from_secs(30))
}

#[test]
fn analyze_edit_test_commits_on_task_branch() {
    let repo = TestRepo::new().expect("repo");
    let definition = analyze_edit_test();
    let paths = prepare(&repo, &definition);
    let base = repo.git(&["rev-parse", "main"]).expect("base");

    let generator = ScriptedGenerator::new(vec![Ok(generated(
        README_DIFF,
        Some("docs: greet readers\n\nlonger body"),
    ))]);
    let outcome = execute_task(
        &paths,
        &EngineConfig::default(),
        "T-1",
        &ExecuteOptions { autonomous: true },
        &applier(&repo),
        &generator,
    )
    .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(
        fs::read_to_string(repo.path().join("README.md")).expect("read"),
        "hello\n"
    );
    assert_eq!(repo.git(&["branch", "--show-current"]).expect("branch"), "agent/T-1");
    assert_eq!(
        repo.git(&["log", "-1", "--format=%s"]).expect("log"),
        "docs: greet readers"
    );
    let head = repo.git(&["rev-parse", "HEAD"]).expect("head");
    assert_ne!(head, base);
    assert_eq!(repo.git(&["rev-parse", "main"]).expect("main"), base);
    // Runtime files stay out of the commit.
    let committed = repo
        .git(&["show", "--name-only", "--format=", "HEAD"])
        .expect("show");
    assert_eq!(committed, "README.md");

    let state = StateStore::new(&paths.state_dir).require("T-1").expect("state");
    assert_eq!(state.base_commit.as_deref(), Some(base.as_str()));
    let edit = &state.steps["edit"];
    assert_eq!(edit.status, StepStatus::Success);
    assert_eq!(edit.commit_sha.as_deref(), Some(head.as_str()));
    assert!(edit.artifacts.iter().any(|a| a.contains("generator-diff")));
    assert_eq!(state.steps["test"].status, StepStatus::Success);
    assert!(
        state.steps["test"]
            .note
            .as_deref()
            .is_some_and(|n| n.contains("Tests passed"))
    );

    let request = &generator.requests()[0];
    assert_eq!(request.change_hints, vec!["README.md"]);
    assert_eq!(request.files[0].content, "hi\n");
}

#[test]
fn malformed_diff_is_regenerated_once() {
    let repo = TestRepo::new().expect("repo");
    let definition = task("T-1", vec![step("edit", StepKind::Edit)]);
    let paths = prepare(&repo, &definition);

    let generator = ScriptedGenerator::new(vec![
        Ok(generated("Sure! Replace hi with hello.", None)),
        Ok(generated(README_DIFF, None)),
    ]);
    let outcome = execute_task(
        &paths,
        &EngineConfig::default(),
        "T-1",
        &ExecuteOptions::default(),
        &applier(&repo),
        &generator,
    )
    .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Completed);
    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].goal.contains("Previous attempt failed because"));
    assert_eq!(
        repo.git(&["log", "-1", "--format=%s"]).expect("log"),
        "task(edit): apply edits"
    );

    let state = StateStore::new(&paths.state_dir).require("T-1").expect("state");
    let record = &state.steps["edit"];
    assert_eq!(record.status, StepStatus::Success);
    assert!(record.artifacts.iter().any(|a| a.contains("invalid-diff")));
}

#[test]
fn malformed_regeneration_fails_step() {
    let repo = TestRepo::new().expect("repo");
    let definition = task("T-1", vec![step("edit", StepKind::Edit)]);
    let paths = prepare(&repo, &definition);

    let generator = ScriptedGenerator::new(vec![
        Ok(generated("not a diff", None)),
        Ok(generated("--- a/README.md\n+++ b/README.md\n-hi\n+hello\n", None)),
    ]);
    let outcome = execute_task(
        &paths,
        &EngineConfig::default(),
        "T-1",
        &ExecuteOptions::default(),
        &applier(&repo),
        &generator,
    )
    .expect("execute");

    assert!(matches!(outcome, ExecutionOutcome::Halted { .. }));
    assert_eq!(generator.calls(), 2);
    let state = StateStore::new(&paths.state_dir).require("T-1").expect("state");
    assert!(
        state.steps["edit"]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("not a valid unified diff"))
    );
    assert_eq!(
        fs::read_to_string(repo.path().join("README.md")).expect("read"),
        "hi\n"
    );
}

#[test]
fn inline_diff_that_does_not_apply_fails_with_stderr_artifact() {
    let repo = TestRepo::new().expect("repo");
    let mut edit = step("edit", StepKind::Doc);
    edit.diff = Some(
        "--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-something else\n+hello\n".to_string(),
    );
    let definition = task("T-1", vec![edit]);
    let paths = prepare(&repo, &definition);
    let generator = ScriptedGenerator::default();

    let outcome = execute_task(
        &paths,
        &EngineConfig::default(),
        "T-1",
        &ExecuteOptions::default(),
        &applier(&repo),
        &generator,
    )
    .expect("execute");

    assert!(matches!(outcome, ExecutionOutcome::Halted { .. }));
    assert_eq!(generator.calls(), 0);
    let state = StateStore::new(&paths.state_dir).require("T-1").expect("state");
    let record = &state.steps["edit"];
    assert_eq!(record.status, StepStatus::Failed);
    assert!(
        record
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("patch apply failed"))
    );
    assert!(record.artifacts.iter().any(|a| a.contains("patch-stderr")));
}

#[test]
fn fallback_patch_file_is_used_before_generation() {
    let repo = TestRepo::new().expect("repo");
    let definition = task("T-1", vec![step("docs", StepKind::Doc)]);
    let paths = prepare(&repo, &definition);
    let fallback = paths.fallback_patch_path("T-1", "docs");
    fs::create_dir_all(fallback.parent().expect("parent")).expect("mkdir");
    fs::write(&fallback, README_DIFF).expect("write patch");
    let generator = ScriptedGenerator::default();

    let outcome = execute_task(
        &paths,
        &EngineConfig::default(),
        "T-1",
        &ExecuteOptions::default(),
        &applier(&repo),
        &generator,
    )
    .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(generator.calls(), 0);
    assert_eq!(
        repo.git(&["log", "-1", "--format=%s"]).expect("log"),
        "task(docs): update docs"
    );
}

#[test]
fn commit_rejected_by_hook_keeps_artifacts_and_restores_tree() {
    use std::os::unix::fs::PermissionsExt;

    let repo = TestRepo::new().expect("repo");
    let definition = task("T-1", vec![step("edit", StepKind::Edit)]);
    let paths = prepare(&repo, &definition);
    let hook = repo.path().join(".git/hooks/pre-commit");
    fs::create_dir_all(hook.parent().expect("parent")).expect("mkdir hooks");
    fs::write(&hook, "#!/bin/sh\necho rejected by hook >&2\nexit 1\n").expect("write hook");
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).expect("chmod hook");
    let head = repo.git(&["rev-parse", "HEAD"]).expect("head");

    let generator = ScriptedGenerator::new(vec![Ok(generated(README_DIFF, None))]);
    let outcome = execute_task(
        &paths,
        &EngineConfig::default(),
        "T-1",
        &ExecuteOptions::default(),
        &applier(&repo),
        &generator,
    )
    .expect("execute");

    assert!(matches!(outcome, ExecutionOutcome::Halted { .. }));
    let state = StateStore::new(&paths.state_dir).require("T-1").expect("state");
    let record = &state.steps["edit"];
    assert_eq!(record.status, StepStatus::Failed);
    assert!(
        record
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("commit failed"))
    );
    for label in ["generator-prompt", "generator-response", "generator-diff"] {
        assert!(record.artifacts.iter().any(|a| a.contains(label)), "{label}");
    }
    assert_eq!(repo.git(&["rev-parse", "HEAD"]).expect("head"), head);
    assert_eq!(
        fs::read_to_string(repo.path().join("README.md")).expect("read"),
        "hi\n"
    );
    assert_eq!(repo.git(&["diff", "--cached", "--name-only"]).expect("staged"), "");
}
