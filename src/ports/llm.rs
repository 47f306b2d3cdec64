//! LLM Port: generates reply text and reports rate-limit status.
//!
//! The rate-limit latch is a pull-based value, not a timer: `status()`
//! recomputes and clears expiry on every read, mirroring
//! `openai_client.py`'s `is_rate_limited`/`get_rate_limit_status`.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::error;

/// Failure calling the external LLM.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request itself failed (network, timeout, TLS).
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The LLM responded with a non-success, non-429 status.
    #[error("LLM returned status {0}")]
    Status(u16),

    /// The response body did not contain a usable completion.
    #[error("malformed LLM response")]
    Malformed,

    /// The LLM is currently rate-limited.
    #[error("rate limited")]
    RateLimited,
}

/// Current rate-limit state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlmStatus {
    /// Whether the port is currently refusing calls.
    pub rate_limited: bool,
    /// Seconds remaining in the cooldown, if rate-limited.
    pub seconds_remaining: Option<i64>,
}

/// Abstract contract for the external reply-generation service.
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Generates reply text for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, including while rate-limited.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Reports whether the port is currently rate-limited.
    fn status(&self) -> LlmStatus;
}

const RATE_LIMIT_COOLDOWN_SECS: i64 = 30 * 60;

struct RateLimitLatch {
    hit_at: Option<std::time::Instant>,
}

impl RateLimitLatch {
    fn status(&mut self) -> LlmStatus {
        let Some(hit_at) = self.hit_at else {
            return LlmStatus {
                rate_limited: false,
                seconds_remaining: None,
            };
        };

        let elapsed = hit_at.elapsed().as_secs_f64();
        let remaining = RATE_LIMIT_COOLDOWN_SECS as f64 - elapsed;
        if remaining <= 0.0 {
            self.hit_at = None;
            return LlmStatus {
                rate_limited: false,
                seconds_remaining: None,
            };
        }

        LlmStatus {
            rate_limited: true,
            seconds_remaining: Some(remaining.ceil() as i64),
        }
    }

    fn trip(&mut self) {
        self.hit_at = Some(std::time::Instant::now());
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// `reqwest`-backed client for an OpenAI-compatible chat completion API.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
    max_tokens: u32,
    temperature: f32,
    latch: Mutex<RateLimitLatch>,
}

impl OpenAiClient {
    /// Builds a client for the configured model and endpoint.
    #[must_use]
    pub fn new(api_key: String, model: String, api_base: String, max_tokens: u32, temperature: f32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            api_base,
            max_tokens,
            temperature,
            latch: Mutex::new(RateLimitLatch { hit_at: None }),
        }
    }
}

#[async_trait]
impl LlmPort for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if self.status().rate_limited {
            return Err(LlmError::RateLimited);
        }

        let url = format!("{}/chat/completions", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a helpful AI assistant."},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            self.latch.lock().expect("latch mutex poisoned").trip();
            error!("LLM rate limit exceeded");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            error!(status = status.as_u16(), "LLM request failed");
            return Err(LlmError::Status(status.as_u16()));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or(LlmError::Malformed)
    }

    fn status(&self) -> LlmStatus {
        self.latch.lock().expect("latch mutex poisoned").status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_latch_reports_not_rate_limited() {
        let mut latch = RateLimitLatch { hit_at: None };
        assert_eq!(
            latch.status(),
            LlmStatus {
                rate_limited: false,
                seconds_remaining: None
            }
        );
    }

    #[test]
    fn tripped_latch_reports_remaining_seconds() {
        let mut latch = RateLimitLatch { hit_at: None };
        latch.trip();
        let status = latch.status();
        assert!(status.rate_limited);
        assert!(status.seconds_remaining.unwrap() > 0);
        assert!(status.seconds_remaining.unwrap() <= RATE_LIMIT_COOLDOWN_SECS);
    }
}
