//! Content synthesis collaborator.
//!
//! The content stage hands a prompt to a [`Synthesizer`] and expects a JSON
//! object back. [`HttpSynthesizer`] talks to an OpenAI-compatible chat
//! completions endpoint in JSON response mode. A reply that does not parse
//! as a JSON object is retried up to `max_retries` times; when the model
//! stopped for length, the next attempt doubles the token budget.
//!
//! Transport and API errors are returned as-is. They are transient from the
//! pipeline's point of view: the page is left untouched and can be retried.

use crate::config::ContentConfig;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response is not a JSON object: {0}")]
    Malformed(String),
    #[error("API key not set: environment variable {0} is empty or missing")]
    MissingKey(String),
}

/// Produces page content from a prompt.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, prompt: &str) -> Result<Map<String, Value>, SynthError>;
}

pub const SYSTEM_PROMPT: &str =
    "You are a content writer. Always respond with valid JSON only, no markdown formatting.";

/// Hard ceiling on the per-call token budget after doubling.
const MAX_TOKENS_CAP: u32 = 16384;

/// Parse model output as a JSON object.
///
/// Tolerates a surrounding ```json fence, which some models emit even in
/// JSON mode. Arrays, scalars and unparsable text are rejected.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, SynthError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SynthError::Malformed(format!(
            "expected an object, got {}",
            match other {
                Value::Array(_) => "an array",
                Value::String(_) => "a string",
                Value::Number(_) => "a number",
                Value::Bool(_) => "a boolean",
                _ => "null",
            }
        ))),
        Err(e) => Err(SynthError::Malformed(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client.
pub struct HttpSynthesizer {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
    max_tokens: u32,
    temperature: f32,
}

impl HttpSynthesizer {
    /// Build a client from config, reading the API key from the environment.
    pub fn from_config(config: &ContentConfig) -> Result<Self, SynthError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SynthError::MissingKey(config.api_key_env.clone()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
            max_tokens: config.max_tokens.min(MAX_TOKENS_CAP),
            temperature: config.temperature,
        })
    }

    fn call(&self, prompt: &str, max_tokens: u32) -> Result<(String, Option<String>), SynthError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "response_format": {"type": "json_object"},
            "temperature": self.temperature,
            "max_tokens": max_tokens,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SynthError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        let parsed: ChatResponse = response.json()?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SynthError::Malformed("response has no choices".into()))?;
        Ok((
            choice.message.content.unwrap_or_default(),
            choice.finish_reason,
        ))
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, prompt: &str) -> Result<Map<String, Value>, SynthError> {
        let mut max_tokens = self.max_tokens;
        let attempts = self.max_retries + 1;
        let mut attempt = 1;
        loop {
            info!(model = %self.model, attempt, max_tokens, "calling synthesis endpoint");
            let (text, finish_reason) = self.call(prompt, max_tokens)?;
            match parse_object(&text) {
                Ok(map) => {
                    debug!(keys = map.len(), "synthesis returned object");
                    return Ok(map);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        attempts,
                        finish_reason = finish_reason.as_deref().unwrap_or("unknown"),
                        error = %e,
                        "synthesis output rejected"
                    );
                    if attempt >= attempts {
                        return Err(e);
                    }
                    if finish_reason.as_deref() == Some("length") {
                        max_tokens = (max_tokens * 2).min(MAX_TOKENS_CAP);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_object_plain() {
        let map = parse_object(r#"{"hero_title": "Hi"}"#).unwrap();
        assert_eq!(map["hero_title"], "Hi");
    }

    #[test]
    fn parse_object_strips_fence() {
        let map = parse_object("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn parse_object_rejects_array() {
        let err = parse_object("[1, 2]").unwrap_err();
        assert!(matches!(err, SynthError::Malformed(msg) if msg.contains("array")));
    }

    #[test]
    fn parse_object_rejects_text() {
        assert!(matches!(
            parse_object("Sure! Here is your JSON"),
            Err(SynthError::Malformed(_))
        ));
    }

    #[test]
    fn parse_object_rejects_truncated() {
        assert!(parse_object(r#"{"hero_title": "Hi"#).is_err());
    }

    #[test]
    fn missing_key_reported_by_name() {
        let config = ContentConfig {
            api_key_env: "SITE_FACTORY_TEST_KEY_THAT_IS_NOT_SET".into(),
            ..ContentConfig::default()
        };
        match HttpSynthesizer::from_config(&config) {
            Err(SynthError::MissingKey(name)) => {
                assert_eq!(name, "SITE_FACTORY_TEST_KEY_THAT_IS_NOT_SET")
            }
            Err(other) => panic!("expected MissingKey, got {other:?}"),
            Ok(_) => panic!("expected MissingKey"),
        }
    }
}
