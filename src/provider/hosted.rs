//! Hosted chat-completion API backend
//!
//! Request bodies are built with async-openai's typed builders and sent over a
//! plain reqwest client so error statuses and response shapes stay under our
//! control. When the configured model is not entitled to the credential, the
//! backend substitutes the best entitled alternative for the rest of its life.

use super::{CompletionRequest, CompletionResult, ModelAvailability, Provider, ProviderError};
use crate::auth::{self, Credential, CredentialSource};
use crate::config::{ProviderConfig, ProviderKind};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Family markers tried in priority order during fallback selection
pub const FALLBACK_MARKERS: [&str; 2] = ["gpt-4", "gpt-3.5"];

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Option<Vec<ModelEntry>>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    code: Option<String>,
}

/// Backend for a hosted OpenAI-style API
pub struct HostedBackend {
    config: ProviderConfig,
    base_url: String,
    credential: Option<Credential>,
    active_model: RwLock<String>,
    http_client: reqwest::Client,
}

impl HostedBackend {
    /// Build the backend, resolving the credential chain against the process environment
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    /// Build the backend, resolving the credential chain against `env`
    ///
    /// A missing credential is not an error here; generation fails later instead.
    pub fn with_env<F>(config: ProviderConfig, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credential = auth::resolve_credential_with(
            config.credential.as_deref(),
            config.credential_path.as_deref(),
            env,
        );

        match &credential {
            Some(c) => tracing::debug!(target: "llm", source = c.source().as_str(), "Hosted credential resolved"),
            None => tracing::warn!(
                target: "llm",
                "No hosted API credential found; completions will fail until one is configured"
            ),
        }

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let active_model = RwLock::new(config.model.clone());

        Ok(Self {
            config,
            base_url,
            credential,
            active_model,
            http_client,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Where the credential came from, if one resolved
    pub fn credential_source(&self) -> Option<CredentialSource> {
        self.credential.as_ref().map(|c| c.source())
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.credential.as_ref().map(|c| c.key()).ok_or_else(|| {
            ProviderError::Auth(format!(
                "no API key configured (pass one explicitly or set {} / {})",
                auth::ENV_API_KEY,
                auth::ENV_API_KEY_PATH
            ))
        })
    }

    /// Model identifiers the credential is entitled to, in listing order
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let api_key = self.api_key()?;

        let response = self
            .http_client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(ProviderError::from_reqwest)?;
        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        let listing: ModelList = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Protocol(format!("Failed to parse model listing: {}", e)))?;
        let data = listing
            .data
            .ok_or_else(|| ProviderError::Protocol("model listing has no data array".to_string()))?;

        Ok(data.into_iter().filter_map(|m| m.id).collect())
    }

    // The API still accepts `max_tokens` for chat models.
    #[allow(deprecated)]
    fn build_request(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CreateChatCompletionRequest, ProviderError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system_prompt.as_str())
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to build request: {}", e)))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.user_prompt.as_str())
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to build request: {}", e)))?;

        let messages: Vec<ChatCompletionRequestMessage> = vec![system.into(), user.into()];

        CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to build request: {}", e)))
    }
}

#[async_trait]
impl Provider for HostedBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hosted
    }

    fn name(&self) -> &str {
        "hosted"
    }

    fn model(&self) -> String {
        self.active_model.read().clone()
    }

    async fn ensure_model_available(&self) -> Result<ModelAvailability, ProviderError> {
        let current = self.model();

        let entitled = match self.list_models().await {
            Ok(entitled) => entitled,
            Err(e @ ProviderError::Auth(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(target: "llm", model = %current, error = %e, "Could not list hosted models");
                return Ok(ModelAvailability::Unavailable {
                    reason: e.to_string(),
                });
            }
        };

        if entitled.iter().any(|id| *id == current) {
            return Ok(ModelAvailability::Available);
        }

        match select_fallback(&entitled) {
            Some(selected) => {
                tracing::warn!(
                    target: "llm",
                    requested = %current,
                    selected = selected,
                    "Configured model not entitled; using fallback"
                );
                *self.active_model.write() = selected.to_string();
                Ok(ModelAvailability::Substituted {
                    requested: current,
                    selected: selected.to_string(),
                })
            }
            None => {
                tracing::warn!(
                    target: "llm",
                    requested = %current,
                    entitled = entitled.len(),
                    "Configured model not entitled and no fallback matched"
                );
                Ok(ModelAvailability::Unavailable {
                    reason: format!("model '{}' is not available to this credential", current),
                })
            }
        }
    }

    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError> {
        let api_key = self.api_key()?;
        let model = self.model();
        let body = self.build_request(&model, request)?;

        let request_id = Uuid::new_v4();
        let start = Instant::now();
        tracing::info!(
            target: "llm",
            request_id = %request_id,
            provider = "hosted",
            model = %model,
            "Starting completion"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = ProviderError::from_reqwest(e);
                tracing::error!(target: "llm", request_id = %request_id, error = %err, "Completion failed");
                err
            })?;

        let elapsed = start.elapsed();
        let status = response.status();
        let text = response.text().await.map_err(ProviderError::from_reqwest)?;

        if !status.is_success() {
            let err = classify_error(status, &text);
            tracing::error!(
                target: "llm",
                request_id = %request_id,
                status = %status,
                error = %err,
                elapsed_ms = elapsed.as_millis() as u64,
                "Completion returned error"
            );
            return Err(err);
        }

        let response_body = parse_chat_response(&text)?;
        let input_tokens = response_body.usage.as_ref().and_then(|u| u.prompt_tokens);
        let output_tokens = response_body.usage.as_ref().and_then(|u| u.completion_tokens);

        let content = first_choice_content(response_body)?;

        tracing::info!(
            target: "llm",
            request_id = %request_id,
            provider = "hosted",
            model = %model,
            elapsed_ms = elapsed.as_millis() as u64,
            input_tokens = input_tokens,
            output_tokens = output_tokens,
            "Completion finished"
        );

        Ok(CompletionResult::new(content))
    }
}

/// Pick a substitute from the entitled list
///
/// Markers are tried in priority order; within a marker the first listed id wins.
pub fn select_fallback(entitled: &[String]) -> Option<&str> {
    FALLBACK_MARKERS.iter().find_map(|marker| {
        entitled
            .iter()
            .find(|id| id.contains(marker))
            .map(String::as_str)
    })
}

fn parse_chat_response(text: &str) -> Result<ChatResponse, ProviderError> {
    serde_json::from_str(text)
        .map_err(|e| ProviderError::Protocol(format!("Failed to parse response: {}", e)))
}

/// Text of the first choice; a null content means the model said nothing
fn first_choice_content(response: ChatResponse) -> Result<String, ProviderError> {
    let choices = response
        .choices
        .ok_or_else(|| ProviderError::Protocol("response has no choices array".to_string()))?;
    let message = choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Protocol("response choices array is empty".to_string()))?
        .message
        .ok_or_else(|| ProviderError::Protocol("first choice has no message".to_string()))?;

    Ok(message.content.unwrap_or_default())
}

fn classify_error(status: StatusCode, body: &str) -> ProviderError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    let code = error.as_ref().and_then(|e| e.code.clone());
    let message = error.and_then(|e| e.message).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.to_string()
        } else {
            trimmed.to_string()
        }
    });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        _ if code.as_deref() == Some("model_not_found") || status == StatusCode::NOT_FOUND => {
            ProviderError::ModelNotFound(message)
        }
        _ => ProviderError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
