//! The completion contract every backend implements

use crate::config::ProviderKind;
use crate::provider::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single system + user exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
        }
    }
}

/// Generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
}

impl CompletionResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Outcome of an availability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAvailability {
    /// Configured model is usable as is
    Available,
    /// Model was missing and has now been fetched
    Acquired,
    /// Configured model was not entitled; an alternative now serves requests
    Substituted { requested: String, selected: String },
    /// Model cannot be used; generation is left to fail on its own
    Unavailable { reason: String },
}

impl ModelAvailability {
    /// Whether generation can be expected to find a model
    pub fn is_usable(&self) -> bool {
        !matches!(self, ModelAvailability::Unavailable { .. })
    }
}

/// Uniform completion contract
///
/// Implementations hold no per-request state and may be shared across tasks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which backend variant this is
    fn kind(&self) -> ProviderKind;

    /// Display name for logs
    fn name(&self) -> &str;

    /// Model currently in effect
    fn model(&self) -> String;

    /// Make sure the configured model can serve requests.
    ///
    /// Safe to call repeatedly; an already usable model is never re-fetched.
    async fn ensure_model_available(&self) -> Result<ModelAvailability, ProviderError>;

    /// Issue one completion request; no retries.
    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError>;
}
