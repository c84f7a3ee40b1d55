//! Anthropic messages-API provider.
//!
//! Anthropic has no server-side schema enforcement for plain messages, so the
//! schema travels in the system prompt and the shared validation layer in
//! `llm::generate` holds the contract. The high-effort reasoning flag has no
//! equivalent knob here and is ignored.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{ModelClient, ModelRequest, truncate_text};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

pub struct AnthropicClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system_with_schema(request),
            "messages": [
                {"role": "user", "content": request.user_prompt}
            ]
        })
    }
}

fn system_with_schema(request: &ModelRequest) -> String {
    format!(
        "{}\n\nRespond with a single JSON object (no prose, no code fences) that \
         validates against this JSON Schema named '{}':\n{}",
        request.system_prompt, request.schema_name, request.schema
    )
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ModelClient for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.model, schema = %request.schema_name))]
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).context("invalid anthropic api key header")?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let response = self
            .client
            .post(ANTHROPIC_URL)
            .headers(headers)
            .json(&self.request_body(request))
            .send()
            .context("call Anthropic messages API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!(
                "Anthropic request failed: HTTP {} {}",
                status,
                truncate_text(&body, 300)
            );
        }

        let parsed: MessagesResponse = response.json().context("decode messages response")?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            bail!("Anthropic returned no text content");
        }
        debug!(bytes = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_carries_the_schema() {
        let request = ModelRequest {
            schema_name: "gating_decision".to_string(),
            schema: json!({"type": "object"}),
            system_prompt: "You gate tests.".to_string(),
            user_prompt: "diff".to_string(),
        };
        let system = system_with_schema(&request);
        assert!(system.starts_with("You gate tests."));
        assert!(system.contains("gating_decision"));
        assert!(system.contains("{\"type\":\"object\"}"));
    }

    #[test]
    fn joins_text_blocks_only() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[
                {"type":"thinking","text":"hmm"},
                {"type":"text","text":"{\"a\":"},
                {"type":"text","text":"1}"}
            ]}"#,
        )
        .expect("parse");
        let text = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(text, "{\"a\":\n1}");
    }
}
