//! Engine configuration stored under `.coder/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values below; the whole struct is validated after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Model used for diff generation when a task does not name one.
    pub model: String,

    /// Truncate captured command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub shell: ShellConfig,
    pub tests: TestsConfig,
    pub generator: GeneratorConfig,
    pub context: ContextConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Executables shell steps may invoke. Empty allows everything.
    pub allow: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Framework used by test steps that name none.
    pub default_framework: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Ollama `/api/generate` endpoint.
    pub endpoint: String,
    pub timeout_secs: u64,
    pub num_ctx: u32,
    /// Specification text beyond this many characters is cut from the prompt.
    pub max_spec_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Hinted file contents beyond this many characters are cut from the prompt.
    pub max_snippet_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub apply_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5-coder:14b".to_string(),
            output_limit_bytes: 1_000_000,
            shell: ShellConfig::default(),
            tests: TestsConfig::default(),
            generator: GeneratorConfig::default(),
            context: ContextConfig::default(),
            git: GitConfig::default(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allow: ["pnpm", "npm", "pytest", "go", "git"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            timeout_secs: 300,
        }
    }
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            default_framework: Some("vitest".to_string()),
            timeout_secs: 30 * 60,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/api/generate".to_string(),
            timeout_secs: 180,
            num_ctx: 64_000,
            max_spec_chars: 8_000,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_snippet_chars: 4_000,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            apply_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.shell.timeout_secs == 0 {
            return Err(anyhow!("shell.timeout_secs must be > 0"));
        }
        if self.shell.allow.iter().any(|entry| entry.trim().is_empty()) {
            return Err(anyhow!("shell.allow entries must be non-empty"));
        }
        if self.tests.timeout_secs == 0 {
            return Err(anyhow!("tests.timeout_secs must be > 0"));
        }
        if self.generator.endpoint.trim().is_empty() {
            return Err(anyhow!("generator.endpoint must be non-empty"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.max_spec_chars == 0 {
            return Err(anyhow!("generator.max_spec_chars must be > 0"));
        }
        if self.context.max_snippet_chars == 0 {
            return Err(anyhow!("context.max_snippet_chars must be > 0"));
        }
        if self.git.apply_timeout_secs == 0 {
            return Err(anyhow!("git.apply_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell.timeout_secs)
    }

    pub fn tests_timeout(&self) -> Duration {
        Duration::from_secs(self.tests.timeout_secs)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.git.apply_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = EngineConfig::default();
        cfg.shell.allow = vec!["cargo".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "model = \"llama3\"\n[shell]\nallow = []\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.model, "llama3");
        assert!(cfg.shell.allow.is_empty());
        assert_eq!(cfg.shell.timeout_secs, 300);
        assert_eq!(cfg.generator, GeneratorConfig::default());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[generator]\ntimeout_secs = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("generator.timeout_secs"));
    }
}
