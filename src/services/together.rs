//! Together AI backend speaking the OpenAI-compatible chat completions API.

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::GenerationConfig;

use super::generation::{GenerationError, GenerationService, flatten_output};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

/// Generation client for the Together AI API, retrying failed calls.
#[derive(Clone)]
pub struct TogetherClient {
    client: Client,
    endpoint: Arc<str>,
    api_key: Arc<str>,
    config: Arc<GenerationConfig>,
}

impl TogetherClient {
    /// Build a client for `config`, authenticating with `api_key`.
    pub fn new(config: GenerationConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .build()
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint: Arc::from(endpoint),
            api_key: Arc::from(api_key),
            config: Arc::new(config),
        })
    }

    async fn attempt(&self, system_info: &str, prompt: &str) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if !system_info.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system_info,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let body = CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint.as_ref())
            .bearer_auth(self.api_key.as_ref())
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decoded = response
            .json::<CompletionResponse>()
            .await
            .map_err(|err| GenerationError::Decode(err.to_string()))?;
        decoded
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| flatten_output(&content))
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GenerationError::Decode("empty completion".into()))
    }

    async fn generate_with_retries(
        &self,
        system_info: String,
        prompt: String,
    ) -> Result<String, GenerationError> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.attempt(&system_info, &prompt).await {
                Ok(output) => {
                    debug!(attempt, model = %self.config.model, "generation succeeded");
                    return Ok(output);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "generation attempt failed");
                    if attempt < attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(GenerationError::Exhausted { attempts })
    }
}

impl GenerationService for TogetherClient {
    fn generate(
        &self,
        system_info: String,
        prompt: String,
    ) -> BoxFuture<'static, Result<String, GenerationError>> {
        let this = self.clone();
        Box::pin(async move { this.generate_with_retries(system_info, prompt).await })
    }
}
