//! Task definition load/save helpers with schema + invariant validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::invariants::{forward_dependencies, validate_invariants};
use crate::io::init::CoderPaths;
use crate::task::TaskDefinition;

const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/task/v1.schema.json"
));

static TASK_VALIDATOR: LazyLock<std::result::Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(TASK_SCHEMA).map_err(|err| err.to_string())?;
    jsonschema::validator_for(&schema).map_err(|err| err.to_string())
});

/// Load and validate the definition of `task_id` from `.coder/tasks/`.
#[instrument(skip_all, fields(task_id = %task_id))]
pub fn load_task(paths: &CoderPaths, task_id: &str) -> Result<TaskDefinition> {
    let task = load_task_file(&paths.task_path(task_id))?;
    if task.id != task_id {
        return Err(anyhow!(
            "task file for '{task_id}' declares id '{}'",
            task.id
        ));
    }
    Ok(task)
}

/// Load and validate a task definition from an arbitrary path.
pub fn load_task_file(path: &Path) -> Result<TaskDefinition> {
    debug!(path = %path.display(), "loading task definition");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read task {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse task {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate task {}", path.display()))?;
    let task: TaskDefinition = serde_json::from_value(value)
        .with_context(|| format!("deserialize task {}", path.display()))?;
    validate_task_invariants(&task)?;
    for (step_id, dep) in forward_dependencies(&task) {
        warn!(
            task_id = %task.id,
            step_id = %step_id,
            depends_on = %dep,
            "dependency declared on a later step; steps still run in declared order"
        );
    }
    Ok(task)
}

/// Write a task definition as pretty JSON.
pub fn write_task(path: &Path, task: &TaskDefinition) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("task path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(task)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write task {}", path.display()))
}

/// Validate `source` and copy it to `.coder/tasks/<id>.json` unless a
/// definition with that id already exists. Returns the task id.
pub fn import_task_file(paths: &CoderPaths, source: &Path) -> Result<String> {
    let task = load_task_file(source)?;
    let target = paths.task_path(&task.id);
    if target.exists() {
        debug!(task_id = %task.id, "task already imported; keeping existing definition");
    } else {
        debug!(task_id = %task.id, target = %target.display(), "importing task definition");
        write_task(&target, &task)?;
    }
    Ok(task.id)
}

fn validate_schema(value: &Value) -> Result<()> {
    let validator = TASK_VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("invalid task schema: {err}"))?;
    if !validator.is_valid(value) {
        let messages = validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "task schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_task_invariants(task: &TaskDefinition) -> Result<()> {
    let errors = validate_invariants(task);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("task invariants failed: {}", errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StepKind;
    use crate::test_support::{step, task};

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = CoderPaths::new(temp.path());
        let mut shell = step("run", StepKind::Shell);
        shell.cmd = Some("npm test".to_string());
        let original = task("T-1", vec![step("look", StepKind::Analyze), shell]);

        write_task(&paths.task_path("T-1"), &original).expect("write");
        let loaded = load_task(&paths, "T-1").expect("load");
        assert_eq!(loaded, original);
    }

    #[test]
    fn missing_required_field_fails_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.json");
        fs::write(&path, r#"{"id":"T-1","title":"t","base":"main","steps":[]}"#).expect("write");

        let err = load_task_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn duplicate_step_ids_fail_invariants() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("dup.json");
        let dup = task(
            "T-1",
            vec![step("a", StepKind::Analyze), step("a", StepKind::Doc)],
        );
        write_task(&path, &dup).expect("write");

        let err = load_task_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate step id 'a'"));
    }

    #[test]
    fn unknown_kind_is_accepted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("future.json");
        fs::write(
            &path,
            r#"{"id":"T-2","title":"t","branch":"agent/t","base":"main",
                "steps":[{"id":"s","kind":"deploy","goal":"ship"}]}"#,
        )
        .expect("write");

        let loaded = load_task_file(&path).expect("load");
        assert_eq!(loaded.steps[0].kind, StepKind::Unknown);
    }

    #[test]
    fn camel_case_diff_path_is_accepted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("camel.json");
        fs::write(
            &path,
            r#"{"id":"T-2","title":"t","branch":"agent/t","base":"main",
                "steps":[{"id":"s","kind":"doc","goal":"g","diffPath":"patches/s.diff"}]}"#,
        )
        .expect("write");

        let loaded = load_task_file(&path).expect("load");
        assert_eq!(loaded.steps[0].diff_path.as_deref(), Some("patches/s.diff"));
    }

    #[test]
    fn import_keeps_existing_definition() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = CoderPaths::new(temp.path());
        let source = temp.path().join("incoming.json");
        write_task(&source, &task("T-3", vec![step("a", StepKind::Analyze)])).expect("write");

        assert_eq!(import_task_file(&paths, &source).expect("import"), "T-3");
        write_task(&source, &task("T-3", vec![step("b", StepKind::Doc)])).expect("rewrite");
        import_task_file(&paths, &source).expect("reimport");

        let stored = load_task(&paths, "T-3").expect("load");
        assert_eq!(stored.steps[0].id, "a");
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = CoderPaths::new(temp.path());
        write_task(&paths.task_path("T-4"), &task("T-5", vec![step("a", StepKind::Analyze)]))
            .expect("write");

        assert!(load_task(&paths, "T-4").is_err());
    }
}
