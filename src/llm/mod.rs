//! Structured-output LLM client.
//!
//! The [`ModelClient`] trait decouples the pipeline from the provider wire
//! formats; [`generate`] layers the typed-output contract on top: the reply
//! must parse as JSON and validate against the declared schema before the
//! caller ever sees it. Validation failure is recoverable (one retry), and
//! each agent documents its own fallback when the call still fails.

pub mod anthropic;
pub mod openai;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::{Config, Provider};

/// One structured-output invocation. Prompts are plain text; no chat history
/// is maintained between calls.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Name the schema is registered under at the provider.
    pub schema_name: String,
    /// JSON Schema the reply must validate against.
    pub schema: Value,
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Abstraction over structured-output LLM providers.
pub trait ModelClient {
    /// Run one completion and return the raw reply text.
    fn complete(&self, request: &ModelRequest) -> Result<String>;
}

/// Total attempts per structured call: the first try plus one retry on a
/// malformed or schema-invalid reply.
pub const GENERATE_ATTEMPTS: u32 = 2;

/// Build the provider client selected by configuration.
pub fn client_from_config(cfg: &Config) -> Result<Box<dyn ModelClient>> {
    match cfg.provider {
        Provider::OpenAi => Ok(Box::new(openai::OpenAiClient::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.high_effort,
            cfg.llm_timeout_secs,
        )?)),
        Provider::Anthropic => Ok(Box::new(anthropic::AnthropicClient::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.llm_timeout_secs,
        )?)),
    }
}

/// Run a structured call and return the schema-validated, deserialized object.
#[instrument(skip_all, fields(schema = schema_name))]
pub fn generate<T: DeserializeOwned>(
    client: &dyn ModelClient,
    schema_name: &str,
    schema_text: &str,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<T> {
    let schema: Value = serde_json::from_str(schema_text)
        .with_context(|| format!("parse schema '{schema_name}'"))?;
    let request = ModelRequest {
        schema_name: schema_name.to_string(),
        schema: schema.clone(),
        system_prompt: system_prompt.to_string(),
        user_prompt: user_prompt.to_string(),
    };

    let mut last_error: Option<anyhow::Error> = None;
    for attempt in 1..=GENERATE_ATTEMPTS {
        match try_generate(client, &request, &schema) {
            Ok(value) => {
                debug!(attempt, "structured call validated");
                return Ok(value);
            }
            Err(err) => {
                warn!(attempt, error = %err, "structured call failed");
                last_error = Some(err);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| anyhow!("structured call failed"))
        .context(format!(
            "structured call '{schema_name}' failed after {GENERATE_ATTEMPTS} attempts"
        )))
}

fn try_generate<T: DeserializeOwned>(
    client: &dyn ModelClient,
    request: &ModelRequest,
    schema: &Value,
) -> Result<T> {
    let reply = client.complete(request)?;
    let stripped = strip_code_fences(&reply);
    let instance: Value = serde_json::from_str(stripped)
        .with_context(|| format!("parse reply as JSON: {}", truncate_text(stripped, 240)))?;
    validate_schema(&instance, schema)?;
    let value = serde_json::from_value(instance).context("deserialize validated reply")?;
    Ok(value)
}

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Strip a wrapping markdown code fence, if present.
fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_header = match without_open.find('\n') {
        Some(idx) => &without_open[idx + 1..],
        None => without_open,
    };
    match after_header.rfind("```") {
        Some(end) => after_header[..end].trim(),
        None => trimmed,
    }
}

pub(crate) fn truncate_text(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModelClient;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Greeting {
        message: String,
    }

    const GREETING_SCHEMA: &str = r#"{
        "type": "object",
        "properties": {"message": {"type": "string"}},
        "required": ["message"],
        "additionalProperties": false
    }"#;

    #[test]
    fn valid_reply_round_trips() {
        let client = ScriptedModelClient::with_json(vec![r#"{"message":"hi"}"#]);
        let got: Greeting =
            generate(&client, "greeting", GREETING_SCHEMA, "system", "user").expect("generate");
        assert_eq!(got.message, "hi");
    }

    #[test]
    fn fenced_reply_is_unwrapped() {
        let client = ScriptedModelClient::with_json(vec!["```json\n{\"message\":\"hi\"}\n```"]);
        let got: Greeting =
            generate(&client, "greeting", GREETING_SCHEMA, "system", "user").expect("generate");
        assert_eq!(got.message, "hi");
    }

    #[test]
    fn malformed_reply_retries_once_then_succeeds() {
        let client = ScriptedModelClient::with_json(vec!["not json", r#"{"message":"ok"}"#]);
        let got: Greeting =
            generate(&client, "greeting", GREETING_SCHEMA, "system", "user").expect("generate");
        assert_eq!(got.message, "ok");
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn malformed_reply_twice_surfaces_error() {
        let client = ScriptedModelClient::with_json(vec!["not json", "still not json"]);
        let err = generate::<Greeting>(&client, "greeting", GREETING_SCHEMA, "system", "user")
            .unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
    }

    #[test]
    fn schema_invalid_reply_is_rejected() {
        let client =
            ScriptedModelClient::with_json(vec![r#"{"message":42}"#, r#"{"message":42}"#]);
        assert!(
            generate::<Greeting>(&client, "greeting", GREETING_SCHEMA, "system", "user").is_err()
        );
    }

    #[test]
    fn strip_code_fences_handles_plain_and_fenced() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
