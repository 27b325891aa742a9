//! Provider configuration
//!
//! A [`ProviderConfig`] is resolved once per process from explicit overrides,
//! then environment settings, then built-in defaults.

use crate::provider::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_PROVIDER: &str = "LLM_PROVIDER";
pub const ENV_HOST: &str = "OLLAMA_HOST";
pub const ENV_PORT: &str = "OLLAMA_PORT";
pub const ENV_MODEL: &str = "LLM_MODEL";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_TEMPERATURE: &str = "LLM_TEMPERATURE";
pub const ENV_MAX_TOKENS: &str = "LLM_MAX_TOKENS";
pub const ENV_TOP_P: &str = "LLM_TOP_P";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 11434;
pub const DEFAULT_LOCAL_MODEL: &str = "llama3";
pub const DEFAULT_HOSTED_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Which backend serves completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Self-hosted model daemon
    #[default]
    Local,
    /// Hosted commercial chat-completion API
    Hosted,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Hosted => "hosted",
        }
    }

    /// Model used when nothing else names one
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Local => DEFAULT_LOCAL_MODEL,
            ProviderKind::Hosted => DEFAULT_HOSTED_MODEL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "ollama" => Ok(ProviderKind::Local),
            "hosted" | "openai" => Ok(ProviderKind::Hosted),
            other => Err(ProviderError::Config(format!(
                "unknown provider kind '{}' (expected one of: local, hosted)",
                other
            ))),
        }
    }
}

/// Fully resolved configuration captured by a backend at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Local daemon host (may carry a scheme, e.g. `http://gpu-box`)
    pub host: String,

    /// Local daemon port
    pub port: u16,

    /// Model name for whichever backend is selected
    pub model: String,

    /// Hosted API key given explicitly
    pub credential: Option<String>,

    /// File holding the hosted API key, given explicitly
    pub credential_path: Option<PathBuf>,

    /// Hosted API root
    pub base_url: String,

    pub temperature: f32,

    pub max_tokens: u32,

    /// Nucleus sampling, sent to the local daemon only
    pub top_p: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::for_kind(ProviderKind::Local)
    }
}

impl ProviderConfig {
    /// Defaults for the given backend kind
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self {
            kind,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model: kind.default_model().to_string(),
            credential: None,
            credential_path: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
        }
    }

    /// Local daemon config pointing at `host:port`
    pub fn local(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::for_kind(ProviderKind::Local)
        }
    }

    /// Hosted API config
    pub fn hosted() -> Self {
        Self::for_kind(ProviderKind::Hosted)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_credential_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_path = Some(path.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Resolve from overrides, then the process environment, then defaults
    pub fn from_env(overrides: ProviderOverrides) -> Result<Self, ProviderError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve from overrides, then `env`, then defaults
    ///
    /// Empty environment values count as unset.
    pub fn resolve<F>(overrides: ProviderOverrides, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let kind = match overrides.kind.or_else(|| lookup(ENV_PROVIDER)) {
            Some(raw) => raw.parse::<ProviderKind>()?,
            None => ProviderKind::default(),
        };

        let mut config = Self::for_kind(kind);

        if let Some(host) = overrides.host.or_else(|| lookup(ENV_HOST)) {
            config.host = host;
        }
        if let Some(port) = overrides.port {
            config.port = port;
        } else if let Some(raw) = lookup(ENV_PORT) {
            config.port = parse_setting(ENV_PORT, &raw)?;
        }
        if let Some(model) = overrides.model.or_else(|| lookup(ENV_MODEL)) {
            config.model = model;
        }
        if let Some(base_url) = overrides.base_url.or_else(|| lookup(ENV_BASE_URL)) {
            config.base_url = base_url;
        }
        if let Some(temperature) = overrides.temperature {
            config.temperature = temperature;
        } else if let Some(raw) = lookup(ENV_TEMPERATURE) {
            config.temperature = parse_setting(ENV_TEMPERATURE, &raw)?;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            config.max_tokens = max_tokens;
        } else if let Some(raw) = lookup(ENV_MAX_TOKENS) {
            config.max_tokens = parse_setting(ENV_MAX_TOKENS, &raw)?;
        }
        if let Some(top_p) = overrides.top_p {
            config.top_p = top_p;
        } else if let Some(raw) = lookup(ENV_TOP_P) {
            config.top_p = parse_setting(ENV_TOP_P, &raw)?;
        }

        // Credentials pass through untouched; the hosted backend walks the full chain.
        config.credential = overrides.credential;
        config.credential_path = overrides.credential_path;

        Ok(config)
    }
}

/// Explicitly supplied settings; every `None` falls through to the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverrides {
    pub kind: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<String>,
    pub credential: Option<String>,
    pub credential_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

fn parse_setting<T: FromStr>(key: &str, raw: &str) -> Result<T, ProviderError> {
    raw.trim()
        .parse()
        .map_err(|_| ProviderError::Config(format!("invalid value for {}: '{}'", key, raw)))
}
