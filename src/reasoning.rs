//! Reasoning Gateway
//!
//! Wraps a chat-completion call with a system/user prompt pair. Responses are
//! untrusted: callers parse them into typed decisions and re-check every
//! safety-critical number themselves.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::ReasoningError;

/// Opaque reasoning capability: prompt in, free-form text out
#[async_trait::async_trait]
pub trait ReasoningGateway: Send + Sync {
    /// Single attempt, no retries
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError>;

    /// Provider/model label for logs
    fn name(&self) -> &str;
}

/// A parsed decision together with the raw text it came from
#[derive(Debug, Clone)]
pub struct Decision<T> {
    pub value: T,
    pub raw: String,
}

/// Ask the gateway and parse the first JSON object in its answer
pub async fn decide<T: DeserializeOwned>(
    gateway: &dyn ReasoningGateway,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<Decision<T>, ReasoningError> {
    let raw = gateway.complete(system_prompt, user_prompt).await?;
    debug!("{} answered with {} chars", gateway.name(), raw.len());
    let value = extract_json(&raw)?;
    Ok(Decision { value, raw })
}

/// Parse the outermost `{...}` span of `content`, or the whole text if none
pub fn extract_json<T: DeserializeOwned>(content: &str) -> Result<T, ReasoningError> {
    let candidate = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content.trim(),
    };

    serde_json::from_str(candidate).map_err(|e| {
        warn!("Unparsable reasoning output: {}", e);
        ReasoningError::Parse(e.to_string())
    })
}

/// OpenAI-compatible chat completions client
pub struct OpenAiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()?;

        info!(
            "Reasoning client initialized: url={}, model={}, timeout={:?}",
            base_url, model, timeout
        );

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ReasoningGateway for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ReasoningError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        debug!("Requesting completion from {} ({})", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Request(format!("completion request timed out: {}", e))
                } else if e.is_connect() {
                    ReasoningError::Request(format!("failed to connect to {}: {}", url, e))
                } else {
                    ReasoningError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Reasoning provider returned error: status={}, body={}", status, body);
            return Err(ReasoningError::Request(format!(
                "completion failed with status {}: {}",
                status, body
            )));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReasoningError::Parse(format!("completion envelope: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ReasoningError::Parse("completion has no choices".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        approved: bool,
    }

    #[test]
    fn test_extract_json_from_prose() {
        let content = "Here is my answer:\n```json\n{\"approved\": true}\n```\nGood luck.";
        let sample: Sample = extract_json(content).unwrap();
        assert!(sample.approved);
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        let result: Result<Sample, _> = extract_json("I cannot decide today.");
        assert!(matches!(result, Err(ReasoningError::Parse(_))));

        let wrong_type: Result<Sample, _> = extract_json("{\"approved\": \"maybe\"}");
        assert!(wrong_type.is_err());
    }

    #[test]
    fn test_client_creation() {
        let client = OpenAiClient::new("https://api.openai.com/v1/", "sk-test", "gpt-4", Duration::from_secs(30))
            .unwrap();
        assert_eq!(client.base_url, "https://api.openai.com/v1");
        assert_eq!(client.name(), "gpt-4");
    }
}
