//! LLM service for stat commentary
//!
//! Turns a short prompt about one statistic into a playful one-liner.
//! Completions are cached by prompt hash so repeated page views of the
//! same record never call out twice.

use crate::error::{Result, WrapError};
use crate::storage::StatsStorage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are a witty, playful assistant that enhances statistics with short, fun commentary. Keep responses under 15 words. Be clever and conversational. Do not wrap your response in quotes.";

/// Configuration for LLM service
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI API key, taken from the environment only
    #[serde(skip)]
    pub api_key: String,

    /// Model to use (default: gpt-4o-mini)
    pub model: String,

    /// Max output tokens for responses
    pub max_tokens: u32,

    /// Responses API endpoint
    pub endpoint: String,

    /// Request timeout (in seconds)
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 100,
            endpoint: "https://api.openai.com/v1/responses".to_string(),
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<set>" })
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Responses API request format
#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    max_output_tokens: u32,
}

/// A completion and whether it came from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub completion: String,
    pub cached: bool,
}

/// LLM service for stat commentary
pub struct LlmService {
    config: LlmConfig,
    client: reqwest::Client,
    storage: Arc<dyn StatsStorage>,
}

impl LlmService {
    /// Create a new LLM service with custom config
    pub fn new(config: LlmConfig, storage: Arc<dyn StatsStorage>) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(WrapError::Config("OPENAI_API_KEY not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            storage,
        })
    }

    /// Complete `prompt`, serving from the cache when possible
    pub async fn complete(&self, prompt: &str) -> Result<Completion> {
        let hash = prompt_hash(prompt);

        if let Some(completion) = self.storage.cached_completion(&hash).await? {
            debug!("LLM cache hit for {}", &hash[..12]);
            return Ok(Completion {
                completion,
                cached: true,
            });
        }

        let completion = self.call_api(prompt).await?;
        self.storage
            .cache_completion(&hash, prompt, &completion)
            .await?;
        info!("Cached new completion for {}", &hash[..12]);

        Ok(Completion {
            completion,
            cached: false,
        })
    }

    /// Make an API call to the responses endpoint
    async fn call_api(&self, prompt: &str) -> Result<String> {
        debug!("Calling LLM API");

        let request = ResponsesRequest {
            model: &self.config.model,
            instructions: SYSTEM_PROMPT,
            input: prompt,
            max_output_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WrapError::LlmApi(format!(
                "API request failed with status {}: {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| WrapError::LlmApi(format!("Failed to parse response: {}", e)))?;

        extract_completion_text(&body)
            .map(strip_wrapping_quotes)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| WrapError::LlmApi("Empty response from API".to_string()))
    }
}

/// SHA-256 of the prompt, lowercase hex
pub fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

/// Text of a responses-API body, falling back to the chat-completions shape
pub fn extract_completion_text(body: &Value) -> Option<&str> {
    body.pointer("/output/0/content/0/text")
        .and_then(Value::as_str)
        .or_else(|| {
            body.pointer("/choices/0/message/content")
                .and_then(Value::as_str)
        })
}

/// Trim whitespace and one pair of surrounding quotes
pub fn strip_wrapping_quotes(text: &str) -> String {
    let trimmed = text.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}')] {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_responses_shape() {
        let body = json!({"output": [{"content": [{"type": "output_text", "text": "Nice!"}]}]});
        assert_eq!(extract_completion_text(&body), Some("Nice!"));
    }

    #[test]
    fn test_extract_chat_fallback() {
        let body = json!({"choices": [{"message": {"content": "Wow"}}]});
        assert_eq!(extract_completion_text(&body), Some("Wow"));
        assert_eq!(extract_completion_text(&json!({"output": []})), None);
    }

    #[test]
    fn test_strip_wrapping_quotes() {
        assert_eq!(strip_wrapping_quotes("  \"Texting machine\" "), "Texting machine");
        assert_eq!(strip_wrapping_quotes("'Night owl'"), "Night owl");
        assert_eq!(strip_wrapping_quotes("\u{201c}Busy\u{201d}"), "Busy");
        assert_eq!(strip_wrapping_quotes("say \"hi\""), "say \"hi\"");
    }

    #[test]
    fn test_prompt_hash_is_stable() {
        assert_eq!(prompt_hash("abc").len(), 64);
        assert_eq!(prompt_hash("abc"), prompt_hash("abc"));
        assert!(prompt_hash("abc").starts_with("ba7816bf"));
    }

    #[test]
    fn test_debug_hides_key() {
        let config = LlmConfig {
            api_key: "sk-secret".to_string(),
            ..LlmConfig::default()
        };
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
