//! Structured critiques produced by an external text generator.
//!
//! The generator is asked for JSON but nothing guarantees it complies.
//! Parsing therefore never fails: a malformed payload degrades to a
//! [`Critique::Fallback`] carrying the raw text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::GeneratorConfig;

/// Critique of an executed submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub analysis: String,
    #[serde(default)]
    pub improved_code: String,
}

/// Static-analysis result for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, deserialize_with = "lenient_issues")]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub improved_code: String,
}

/// One finding of a static analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub line: Option<u32>,
    pub severity: Severity,
    pub issue: String,
    #[serde(default)]
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// Decode issues one at a time, dropping the ones that do not fit.
fn lenient_issues<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Issue>, D::Error> {
    let entries = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    let total = entries.len();
    let issues: Vec<Issue> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(issue) => Some(issue),
            Err(e) => {
                debug!(error = %e, "Dropping malformed issue");
                None
            }
        })
        .collect();

    if issues.len() < total {
        warn!(dropped = total - issues.len(), kept = issues.len(), "Dropped malformed issues");
    }
    Ok(issues)
}

/// A generator payload, either parsed or degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Critique<T> {
    /// The payload was well-formed.
    Parsed(T),
    /// The payload did not parse; `value` is the degraded stand-in.
    Fallback { value: T, raw: String },
}

impl<T> Critique<T> {
    pub const fn value(&self) -> &T {
        match self {
            Self::Parsed(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Parsed(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Serializes as the inner value, so clients see one shape either way.
impl<T: Serialize> Serialize for Critique<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

/// Parse a feedback payload. Falls back to the raw text as the analysis.
pub fn parse_feedback(raw: &str) -> Critique<Feedback> {
    parse_or(raw, || Feedback {
        analysis: raw.to_string(),
        improved_code: String::new(),
    })
}

/// Parse an annotation payload. Falls back to no issues and the original code.
pub fn parse_annotation(raw: &str, code: &str) -> Critique<Annotation> {
    parse_or(raw, || Annotation {
        issues: Vec::new(),
        improved_code: code.to_string(),
    })
}

fn parse_or<T: for<'de> Deserialize<'de>>(raw: &str, fallback: impl FnOnce() -> T) -> Critique<T> {
    match serde_json::from_str(strip_fence(raw)) {
        Ok(value) => Critique::Parsed(value),
        Err(e) => {
            warn!(error = %e, raw_len = raw.len(), "Generator payload is not valid JSON, degrading");
            Critique::Fallback {
                value: fallback(),
                raw: raw.to_string(),
            }
        }
    }
}

/// Strip a surrounding markdown code fence (```json ... ```), if any.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = body.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`), which may share a line with the body
    let body = match body.split_once('\n') {
        Some((_, rest)) => rest,
        None => body.trim_start().strip_prefix("json").unwrap_or(body),
    };
    body.trim()
}

/// Prompt asking for a critique of an executed submission.
pub fn feedback_prompt(code: &str, output: &str, error: &str) -> String {
    format!(
        r#"You are a senior software engineer analyzing code.

Code:
{code}

Execution stdout:
{output}

Execution stderr:
{error}

Now return JSON ONLY with keys:
{{
  "analysis": "summary of bugs",
  "improved_code": "rewritten optimized version"
}}
"#
    )
}

/// Prompt asking for a static analysis of a submission.
pub fn annotation_prompt(code: &str) -> String {
    format!(
        r#"You are a static analyzer.

Return STRICT JSON with:
{{
  "issues": [
    {{
      "line": number,
      "severity": "critical | warning | info",
      "issue": "short description",
      "suggestion": "short fix"
    }}
  ],
  "improved_code": "fixed version of code"
}}

Analyze this code:
{code}
"#
    )
}

/// Something that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Build a client, or `None` when no API key is configured.
    pub fn from_config(config: &GeneratorConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting completion");

        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response: ChatResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?
            .error_for_status()
            .context("Generator returned an error status")?
            .json()
            .await
            .context("Failed to decode generator response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("Generator response has no content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_feedback() {
        let raw = r#"{"analysis": "off by one", "improved_code": "print(1)"}"#;
        let critique = parse_feedback(raw);

        assert!(!critique.is_fallback());
        assert_eq!(
            critique.into_value(),
            Feedback {
                analysis: "off by one".into(),
                improved_code: "print(1)".into(),
            }
        );
    }

    #[test]
    fn fenced_payload_is_accepted() {
        let raw = "```json\n{\"analysis\": \"ok\", \"improved_code\": \"\"}\n```";
        let critique = parse_feedback(raw);
        assert!(!critique.is_fallback());
        assert_eq!(critique.value().analysis, "ok");

        let raw = "```{\"issues\": []}```";
        assert!(!parse_annotation(raw, "x").is_fallback());
    }

    #[test]
    fn one_line_fence_with_info_string_is_accepted() {
        let critique = parse_feedback("```json {\"analysis\":\"ok\"}```");
        assert!(!critique.is_fallback());
        assert_eq!(critique.value().analysis, "ok");
    }

    #[test]
    fn malformed_feedback_degrades_to_raw_text() {
        let raw = "Your code looks fine, but consider using a loop.";
        let critique = parse_feedback(raw);

        assert!(critique.is_fallback());
        assert_eq!(critique.value().analysis, raw);
        assert_eq!(critique.value().improved_code, "");
        assert!(matches!(critique, Critique::Fallback { raw: ref r, .. } if r == raw));
    }

    #[test]
    fn feedback_missing_analysis_degrades() {
        let critique = parse_feedback(r#"{"improved_code": "x"}"#);
        assert!(critique.is_fallback());
    }

    #[test]
    fn parses_annotation_issues() {
        let raw = r#"{
            "issues": [
                {"line": 3, "severity": "critical", "issue": "division by zero", "suggestion": "check b"},
                {"line": 7, "severity": "info", "issue": "unused import"}
            ],
            "improved_code": "fixed"
        }"#;
        let annotation = parse_annotation(raw, "original").into_value();

        assert_eq!(annotation.issues.len(), 2);
        assert_eq!(annotation.issues[0].severity, Severity::Critical);
        assert_eq!(annotation.issues[0].line, Some(3));
        assert_eq!(annotation.issues[1].suggestion, "");
        assert_eq!(annotation.improved_code, "fixed");
    }

    #[test]
    fn malformed_annotation_keeps_original_code() {
        let critique = parse_annotation("no json here", "print(1)");

        assert!(critique.is_fallback());
        assert!(critique.value().issues.is_empty());
        assert_eq!(critique.value().improved_code, "print(1)");
    }

    #[test]
    fn malformed_issue_drops_only_itself() {
        let raw = r#"{"issues": [
            {"line": 1, "severity": "fatal", "issue": "x"},
            {"line": 2, "severity": "warning", "issue": "shadowed builtin"},
            "not an issue"
        ], "improved_code": "y"}"#;
        let critique = parse_annotation(raw, "code");

        assert!(!critique.is_fallback());
        let annotation = critique.into_value();
        assert_eq!(annotation.issues.len(), 1);
        assert_eq!(annotation.issues[0].line, Some(2));
        assert_eq!(annotation.improved_code, "y");
    }

    #[test]
    fn issue_without_line_is_kept() {
        let raw = r#"{"issues": [
            {"line": null, "severity": "info", "issue": "file-level note"},
            {"severity": "critical", "issue": "no line either"},
            {"line": 4, "severity": "warning", "issue": "unused"}
        ]}"#;
        let annotation = parse_annotation(raw, "code").into_value();

        assert_eq!(annotation.issues.len(), 3);
        assert_eq!(annotation.issues[0].line, None);
        assert_eq!(annotation.issues[1].line, None);
        assert_eq!(annotation.issues[2].line, Some(4));
    }

    #[test]
    fn null_issue_list_is_empty() {
        let critique = parse_annotation(r#"{"issues": null, "improved_code": "z"}"#, "code");
        assert!(!critique.is_fallback());
        assert!(critique.value().issues.is_empty());
    }

    #[test]
    fn critique_serializes_as_inner_value() {
        let parsed = serde_json::to_value(parse_feedback(r#"{"analysis": "a"}"#)).unwrap();
        assert_eq!(parsed, json!({"analysis": "a", "improved_code": ""}));

        let degraded = serde_json::to_value(parse_feedback("plain text")).unwrap();
        assert_eq!(degraded, json!({"analysis": "plain text", "improved_code": ""}));
    }

    #[test]
    fn prompts_embed_inputs() {
        let prompt = feedback_prompt("print(x)", "", "NameError: name 'x' is not defined");
        assert!(prompt.contains("print(x)"));
        assert!(prompt.contains("NameError"));
        assert!(prompt.contains("\"improved_code\""));

        let prompt = annotation_prompt("int main() {}");
        assert!(prompt.contains("int main() {}"));
        assert!(prompt.contains("critical | warning | info"));
    }

    #[test]
    fn client_requires_api_key() {
        let mut config = GeneratorConfig::default();
        assert!(ChatCompletionsClient::from_config(&config).is_none());

        config.api_key = Some("key".into());
        config.base_url = "https://api.example/v1/".into();
        let client = ChatCompletionsClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint, "https://api.example/v1/chat/completions");
    }
}
