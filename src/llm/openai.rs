//! OpenAI chat-completions provider with strict structured outputs.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{ModelClient, ModelRequest, truncate_text};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4.1";

pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    high_effort: bool,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        high_effort: bool,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            high_effort,
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt}
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema
                }
            }
        });
        if self.high_effort {
            body["reasoning_effort"] = json!("high");
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl ModelClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, schema = %request.schema_name))]
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        let response = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .context("call OpenAI chat completions")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!(
                "OpenAI request failed: HTTP {} {}",
                status,
                truncate_text(&body, 300)
            );
        }

        let parsed: ChatResponse = response
            .json()
            .context("decode chat completions response")?;
        let choice = parsed.choices.into_iter().next();
        if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.as_deref()) {
            bail!("OpenAI refused the request: {}", truncate_text(refusal, 200));
        }
        let content = choice.and_then(|c| c.message.content).unwrap_or_default();
        if content.trim().is_empty() {
            bail!("OpenAI returned empty content");
        }
        debug!(bytes = content.len(), "completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            schema_name: "plan_output".to_string(),
            schema: json!({"type": "object"}),
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
        }
    }

    #[test]
    fn body_carries_strict_schema_format() {
        let client = OpenAiClient::new("sk-test".to_string(), None, false, 30).expect("client");
        let body = client.request_body(&request());
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "plan_output");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn high_effort_sets_reasoning_flag() {
        let client = OpenAiClient::new("sk-test".to_string(), None, true, 30).expect("client");
        let body = client.request_body(&request());
        assert_eq!(body["reasoning_effort"], "high");
    }

    #[test]
    fn parses_refusal_and_content_shapes() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"{\"steps\":[]}"}}]}"#,
        )
        .expect("parse");
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"steps\":[]}")
        );

        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":null,"refusal":"no"}}]}"#,
        )
        .expect("parse");
        assert_eq!(parsed.choices[0].message.refusal.as_deref(), Some("no"));
    }
}
