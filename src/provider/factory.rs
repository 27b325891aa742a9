//! Provider selection
//!
//! Picks the backend kind (explicit argument, else `LLM_PROVIDER`, else local)
//! and constructs it. No connectivity is probed here.

use super::{HostedBackend, LocalBackend, Provider, ProviderError};
use crate::config::{ProviderConfig, ProviderKind, ProviderOverrides};

/// Build the backend described by an already resolved config
pub fn create_provider(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    create_provider_with(config, |key| std::env::var(key).ok())
}

/// Resolve overrides against the process environment, then build the backend
pub fn create_provider_from_env(
    overrides: ProviderOverrides,
) -> Result<Box<dyn Provider>, ProviderError> {
    resolve_and_create(overrides, |key| std::env::var(key).ok())
}

/// Resolve overrides against `env`, then build the backend
///
/// `env` also feeds the hosted credential chain.
pub fn resolve_and_create<F>(
    overrides: ProviderOverrides,
    env: F,
) -> Result<Box<dyn Provider>, ProviderError>
where
    F: Fn(&str) -> Option<String>,
{
    let config = ProviderConfig::resolve(overrides, &env)?;
    create_provider_with(config, env)
}

fn create_provider_with<F>(config: ProviderConfig, env: F) -> Result<Box<dyn Provider>, ProviderError>
where
    F: Fn(&str) -> Option<String>,
{
    tracing::debug!(
        target: "llm",
        provider = config.kind.as_str(),
        model = %config.model,
        "Creating provider"
    );

    match config.kind {
        ProviderKind::Local => Ok(Box::new(LocalBackend::new(config)?)),
        ProviderKind::Hosted => Ok(Box::new(HostedBackend::with_env(config, env)?)),
    }
}
