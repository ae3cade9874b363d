//! Diff generation through a local model server.
//!
//! Edit and doc steps without a ready-made diff ask a [`DiffGenerator`] for one.
//! [`OllamaGenerator`] talks to Ollama's `/api/generate`; tests substitute a
//! scripted generator.

use std::sync::LazyLock;
use std::time::Duration;

use minijinja::{Environment, context};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::EngineConfig;
use crate::io::file_context::FileSnippet;

const DIFF_TEMPLATE: &str = include_str!("prompts/diff.md");
const SPEC_TRUNCATED_MARKER: &str = "\n[spec truncated]";

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("json object regex"));

/// Everything a generator needs to produce one diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    pub model: String,
    pub task_id: String,
    pub step_id: String,
    pub goal: String,
    pub spec_text: Option<String>,
    pub change_hints: Vec<String>,
    pub files: Vec<FileSnippet>,
}

/// A diff returned by a generator, with the exchange that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDiff {
    pub diff: String,
    pub commit_message: Option<String>,
    pub raw_response: String,
    pub prompt: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("could not render prompt: {0}")]
    Prompt(String),

    #[error("model request failed: {0}")]
    Transport(String),

    #[error("unable to parse model response as JSON: {message}. Raw response:\n{raw}")]
    Parse { message: String, raw: String },

    #[error("model response missing \"diff\" field")]
    MissingDiff { raw: String },
}

impl GeneratorError {
    /// Model output received before the failure, if any.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            GeneratorError::Parse { raw, .. } | GeneratorError::MissingDiff { raw } => Some(raw),
            GeneratorError::Prompt(_) | GeneratorError::Transport(_) => None,
        }
    }
}

/// Produces a unified diff for a step goal.
pub trait DiffGenerator {
    fn generate(&self, request: &DiffRequest) -> Result<GeneratedDiff, GeneratorError>;
}

/// Generator backed by an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    endpoint: String,
    timeout: Duration,
    num_ctx: u32,
    max_spec_chars: usize,
}

impl OllamaGenerator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            endpoint: config.generator.endpoint.clone(),
            timeout: config.generator_timeout(),
            num_ctx: config.generator.num_ctx,
            max_spec_chars: config.generator.max_spec_chars,
        }
    }

    fn post(&self, body: &Value) -> Result<String, GeneratorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| GeneratorError::Transport(err.to_string()))?;
        let response = client
            .post(&self.endpoint)
            .json(body)
            .send()
            .map_err(|err| GeneratorError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| GeneratorError::Transport(err.to_string()))?;
        if !status.is_success() {
            let detail = text.trim();
            return Err(GeneratorError::Transport(format!(
                "Ollama HTTP {}: {}",
                status.as_u16(),
                if detail.is_empty() { "no body" } else { detail }
            )));
        }
        Ok(text)
    }
}

impl DiffGenerator for OllamaGenerator {
    #[instrument(skip_all, fields(task_id = %request.task_id, step_id = %request.step_id, model = %request.model))]
    fn generate(&self, request: &DiffRequest) -> Result<GeneratedDiff, GeneratorError> {
        let prompt = render_diff_prompt(request, self.max_spec_chars)?;
        let body = json!({
            "model": request.model,
            "prompt": prompt,
            "stream": false,
            "options": { "num_ctx": self.num_ctx },
        });
        debug!(endpoint = %self.endpoint, prompt_chars = prompt.len(), "requesting diff");
        let body = self.post(&body)?;
        let (raw, text) = collect_response(&body);
        let reply = if text.trim().is_empty() { raw.trim() } else { text.trim() };
        if reply.is_empty() {
            warn!("model returned an empty response");
            return Err(GeneratorError::Transport(
                "Ollama returned an empty response.".to_string(),
            ));
        }
        let parsed = parse_reply(reply)?;
        Ok(GeneratedDiff {
            diff: parsed.diff,
            commit_message: parsed.commit_message,
            raw_response: if raw.is_empty() { reply.to_string() } else { raw },
            prompt,
        })
    }
}

/// Render the generation prompt, truncating the spec text to `max_spec_chars`.
pub fn render_diff_prompt(
    request: &DiffRequest,
    max_spec_chars: usize,
) -> Result<String, GeneratorError> {
    let spec_text = request
        .spec_text
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .map(|text| truncate_spec(text, max_spec_chars));
    let mut env = Environment::new();
    env.add_template("diff", DIFF_TEMPLATE)
        .map_err(|err| GeneratorError::Prompt(err.to_string()))?;
    let template = env
        .get_template("diff")
        .map_err(|err| GeneratorError::Prompt(err.to_string()))?;
    template
        .render(context! {
            task_id => request.task_id,
            step_id => request.step_id,
            goal => request.goal.trim(),
            change_hints => request.change_hints,
            spec_text => spec_text,
            files => request.files,
        })
        .map_err(|err| GeneratorError::Prompt(err.to_string()))
}

fn truncate_spec(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => format!("{}{SPEC_TRUNCATED_MARKER}", &text[..byte_idx]),
    }
}

/// Split an `/api/generate` body into raw lines and the concatenated
/// `response` text. Lines that are not JSON are kept in the raw copy only.
fn collect_response(body: &str) -> (String, String) {
    let mut lines = Vec::new();
    let mut text = String::new();
    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        lines.push(line);
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if let Some(chunk) = value.get("response").and_then(Value::as_str) {
            text.push_str(chunk);
        }
    }
    (lines.join("\n"), text)
}

#[derive(Debug, Deserialize)]
struct DiffReply {
    #[serde(default)]
    diff: Option<String>,
    #[serde(default)]
    commit_msg: Option<String>,
    #[serde(default, rename = "commitMessage")]
    commit_message: Option<String>,
}

struct ParsedReply {
    diff: String,
    commit_message: Option<String>,
}

fn parse_reply(reply: &str) -> Result<ParsedReply, GeneratorError> {
    let candidate = JSON_OBJECT_RE
        .find(reply)
        .map(|m| m.as_str())
        .unwrap_or(reply);
    let parsed: DiffReply =
        serde_json::from_str(candidate).map_err(|err| GeneratorError::Parse {
            message: err.to_string(),
            raw: reply.to_string(),
        })?;
    let diff = parsed
        .diff
        .filter(|diff| !diff.is_empty())
        .ok_or_else(|| GeneratorError::MissingDiff {
            raw: reply.to_string(),
        })?;
    Ok(ParsedReply {
        diff,
        commit_message: parsed.commit_msg.or(parsed.commit_message),
    })
}
