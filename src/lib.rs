//! LLM Provider - provider-agnostic text completion
//!
//! This crate provides:
//! - A single completion contract over a local model daemon and a hosted API
//! - Model availability checks (pull on the daemon, entitled fallback on the API)
//! - Configuration and credential resolution from arguments, environment and defaults
//! - Logging setup for binaries embedding the providers

pub mod auth;
pub mod config;
pub mod provider;
pub mod telemetry;

pub use auth::{Credential, CredentialSource};
pub use config::{ProviderConfig, ProviderKind, ProviderOverrides};
pub use provider::{
    create_provider, create_provider_from_env, CompletionRequest, CompletionResult,
    HostedBackend, LocalBackend, ModelAvailability, Provider, ProviderError,
};
pub use telemetry::{Telemetry, TelemetryOptions};
