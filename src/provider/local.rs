//! Local model daemon backend
//!
//! Speaks the daemon's generate/tags/pull endpoints. Model materialization can
//! take minutes, so the pull call gets a far longer bound than generation.

use super::{CompletionRequest, CompletionResult, ModelAvailability, Provider, ProviderError};
use crate::config::{ProviderConfig, ProviderKind};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(10);
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);
pub const PULL_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    generate: Duration,
    list: Duration,
    pull: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            generate: GENERATE_TIMEOUT,
            list: LIST_TIMEOUT,
            pull: PULL_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
}

/// Backend for a self-hosted model daemon
pub struct LocalBackend {
    config: ProviderConfig,
    base_url: String,
    http_client: reqwest::Client,
    timeouts: Timeouts,
}

impl LocalBackend {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = daemon_base_url(&config.host, config.port)?;

        Ok(Self {
            config,
            base_url,
            http_client,
            timeouts: Timeouts::default(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_timeouts(mut self, generate: Duration, list: Duration, pull: Duration) -> Self {
        self.timeouts = Timeouts {
            generate,
            list,
            pull,
        };
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of models the daemon already has
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeouts.list)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "model listing returned {}: {}",
                status, text
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(format!("Failed to parse model listing: {}", e)))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Ask the daemon to materialize `name`
    ///
    /// The daemon streams newline-delimited status objects; any object with an
    /// `error` field fails the pull even under a success status.
    async fn pull_model(&self, name: &str) -> Result<(), ProviderError> {
        let response = self
            .http_client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(self.timeouts.pull)
            .json(&PullRequest { name })
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(ProviderError::from_reqwest)?;

        if let Some(message) = pull_error(&text) {
            return Err(ProviderError::Transport(format!("pull failed: {}", message)));
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!(
                "pull returned {}: {}",
                status,
                text.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for LocalBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> String {
        self.config.model.clone()
    }

    async fn ensure_model_available(&self) -> Result<ModelAvailability, ProviderError> {
        let model = self.config.model.as_str();

        let listed = match self.list_models().await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(target: "llm", model = model, error = %e, "Could not list local models");
                return Ok(ModelAvailability::Unavailable {
                    reason: e.to_string(),
                });
            }
        };

        if listed.iter().any(|name| model_matches(model, name)) {
            tracing::debug!(target: "llm", model = model, "Local model already present");
            return Ok(ModelAvailability::Available);
        }

        let start = Instant::now();
        tracing::info!(target: "llm", model = model, "Pulling local model");

        match self.pull_model(model).await {
            Ok(()) => {
                tracing::info!(
                    target: "llm",
                    model = model,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Local model pulled"
                );
                Ok(ModelAvailability::Acquired)
            }
            Err(e) => {
                tracing::error!(
                    target: "llm",
                    model = model,
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Local model pull failed"
                );
                Ok(ModelAvailability::Unavailable {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError> {
        let request_id = Uuid::new_v4();
        let model = self.config.model.as_str();
        let body = GenerateRequest {
            model,
            prompt: &request.user_prompt,
            system: &request.system_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
        };

        let start = Instant::now();
        tracing::info!(
            target: "llm",
            request_id = %request_id,
            provider = "local",
            model = model,
            "Starting completion"
        );

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeouts.generate)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = ProviderError::from_reqwest(e);
                tracing::error!(target: "llm", request_id = %request_id, error = %err, "Completion failed");
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(
                target: "llm",
                request_id = %request_id,
                status = %status,
                error = %text,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Completion returned error"
            );
            return Err(ProviderError::Transport(format!(
                "daemon returned {}: {}",
                status,
                text.trim()
            )));
        }

        let text = response.text().await.map_err(ProviderError::from_reqwest)?;
        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Protocol(format!("Failed to parse response: {}", e)))?;
        let text = parsed.response.unwrap_or_default();

        tracing::info!(
            target: "llm",
            request_id = %request_id,
            provider = "local",
            model = model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            output_chars = text.len() as u64,
            "Completion finished"
        );

        Ok(CompletionResult::new(text))
    }
}

/// Daemon root URL from a host setting
///
/// The host may be bare (`gpu-box`), carry its own port (`127.0.0.1:11434`), or
/// name a scheme (`https://gpu-box`). `port` only fills in a missing port.
fn daemon_base_url(host: &str, port: u16) -> Result<String, ProviderError> {
    let host = host.trim().trim_end_matches('/');
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    let invalid = |detail: String| ProviderError::Config(format!("invalid daemon host '{}': {}", host, detail));

    let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
    if url.port().is_none() && !has_explicit_port(&raw) {
        url.set_port(Some(port))
            .map_err(|_| invalid("cannot carry a port".to_string()))?;
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

// `Url::port` hides a port equal to the scheme default, so look at the authority.
fn has_explicit_port(raw: &str) -> bool {
    let authority = raw
        .split_once("://")
        .map_or(raw, |(_, rest)| rest)
        .split('/')
        .next()
        .unwrap_or_default();
    let after_bracket = authority.rsplit(']').next().unwrap_or(authority);
    after_bracket
        .rsplit_once(':')
        .is_some_and(|(_, p)| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Untagged names match the daemon's implicit `:latest`
fn model_matches(configured: &str, listed: &str) -> bool {
    listed == configured
        || (!configured.contains(':')
            && listed
                .strip_prefix(configured)
                .is_some_and(|tag| tag == ":latest"))
}

fn pull_error(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .find_map(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderOverrides, ENV_HOST};
    use crate::provider::fake_server;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn backend_at(addr: SocketAddr, model: &str) -> LocalBackend {
        LocalBackend::new(ProviderConfig::local(addr.ip().to_string(), addr.port()).with_model(model))
            .unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("You write code.", "Say hello")
    }

    #[test]
    fn test_base_url() {
        let url = |host: &str, port: u16| daemon_base_url(host, port).unwrap();
        assert_eq!(url("localhost", 11434), "http://localhost:11434");
        assert_eq!(url("http://gpu-box/", 8080), "http://gpu-box:8080");
        assert_eq!(url("https://gpu-box:9000", 8080), "https://gpu-box:9000");
        assert_eq!(url("127.0.0.1:11434", 11434), "http://127.0.0.1:11434");
        assert_eq!(url("gpu-box:9000", 11434), "http://gpu-box:9000");
        assert_eq!(url("http://[::1]", 8080), "http://[::1]:8080");
        assert_eq!(url("[::1]:9000", 8080), "http://[::1]:9000");
        assert_eq!(url("http://gpu-box:80", 11434), "http://gpu-box");
        assert_eq!(url("http://gpu-box/ollama/", 8080), "http://gpu-box:8080/ollama");
    }

    #[test]
    fn test_unparseable_host_is_config_error() {
        let err = LocalBackend::new(ProviderConfig::local("gpu box", 11434)).err().unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn test_model_matches() {
        assert!(model_matches("llama3", "llama3"));
        assert!(model_matches("llama3", "llama3:latest"));
        assert!(!model_matches("llama3", "llama3:8b"));
        assert!(!model_matches("llama3:8b", "llama3:latest"));
        assert!(!model_matches("llama", "llama3:latest"));
    }

    #[test]
    fn test_pull_error_scans_stream() {
        let body = "{\"status\":\"pulling manifest\"}\n{\"error\":\"file does not exist\"}\n";
        assert_eq!(pull_error(body).as_deref(), Some("file does not exist"));
        assert_eq!(pull_error("{\"status\":\"success\"}\n"), None);
    }

    #[test]
    fn test_timeouts_are_fixed() {
        let t = Timeouts::default();
        assert_eq!(t.generate, Duration::from_secs(10));
        assert_eq!(t.list, Duration::from_secs(30));
        assert_eq!(t.pull, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_generate_returns_response_field() {
        let seen = Arc::new(Mutex::new(Value::Null));
        let captured = seen.clone();
        let router = Router::new().route(
            "/api/generate",
            post(move |Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = body;
                    Json(json!({"response": "hello", "done": true}))
                }
            }),
        );
        let addr = fake_server::spawn(router).await;

        let result = backend_at(addr, "llama3").generate_completion(&request()).await.unwrap();
        assert_eq!(result, CompletionResult::new("hello"));

        let body = seen.lock().unwrap().clone();
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["prompt"], "Say hello");
        assert_eq!(body["system"], "You write code.");
        assert_eq!(body["stream"], false);
        assert!(body["options"]["temperature"].is_number());
        assert!(body["options"]["top_p"].is_number());
    }

    #[tokio::test]
    async fn test_generate_missing_field_is_empty_text() {
        let router = Router::new().route("/api/generate", post(|| async { Json(json!({"done": true})) }));
        let addr = fake_server::spawn(router).await;

        let result = backend_at(addr, "llama3").generate_completion(&request()).await.unwrap();
        assert_eq!(result.text, "");
    }

    #[tokio::test]
    async fn test_generate_error_status_is_transport() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "model crashed"})),
                )
            }),
        );
        let addr = fake_server::spawn(router).await;

        let err = backend_at(addr, "llama3").generate_completion(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
        assert!(err.to_string().contains("model crashed"));
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"response": "too late"}))
            }),
        );
        let addr = fake_server::spawn(router).await;
        let backend = backend_at(addr, "llama3").with_timeouts(
            Duration::from_millis(200),
            LIST_TIMEOUT,
            PULL_TIMEOUT,
        );

        let start = Instant::now();
        let err = backend.generate_completion(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_generate_connection_refused() {
        let addr = fake_server::closed_addr().await;
        let err = backend_at(addr, "llama3").generate_completion(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    fn daemon_with(models: Value, pull_reply: &'static str, pulls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/api/tags",
                get(move || {
                    let models = models.clone();
                    async move { Json(models) }
                }),
            )
            .route(
                "/api/pull",
                post(move |Json(body): Json<Value>| {
                    let pulls = pulls.clone();
                    async move {
                        assert!(body["name"].is_string());
                        pulls.fetch_add(1, Ordering::SeqCst);
                        pull_reply
                    }
                }),
            )
    }

    #[tokio::test]
    async fn test_present_model_is_not_pulled() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let router = daemon_with(
            json!({"models": [{"name": "mistral:latest"}, {"name": "llama3:latest"}]}),
            "{\"status\":\"success\"}",
            pulls.clone(),
        );
        let addr = fake_server::spawn(router).await;
        let backend = backend_at(addr, "llama3");

        for _ in 0..3 {
            let availability = backend.ensure_model_available().await.unwrap();
            assert_eq!(availability, ModelAvailability::Available);
        }
        assert_eq!(pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_model_is_pulled() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let router = daemon_with(
            json!({"models": [{"name": "mistral:latest"}]}),
            "{\"status\":\"pulling manifest\"}\n{\"status\":\"success\"}\n",
            pulls.clone(),
        );
        let addr = fake_server::spawn(router).await;

        let availability = backend_at(addr, "codellama").ensure_model_available().await.unwrap();
        assert_eq!(availability, ModelAvailability::Acquired);
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_pull_is_unavailable() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let router = daemon_with(
            json!({"models": []}),
            "{\"status\":\"pulling manifest\"}\n{\"error\":\"pull model manifest: file does not exist\"}\n",
            pulls.clone(),
        );
        let addr = fake_server::spawn(router).await;

        let availability = backend_at(addr, "no-such-model").ensure_model_available().await.unwrap();
        match availability {
            ModelAvailability::Unavailable { reason } => assert!(reason.contains("file does not exist")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_host_setting_carrying_port() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { Json(json!({"response": "hi", "done": true})) }),
        );
        let addr = fake_server::spawn(router).await;
        let env = move |key: &str| (key == ENV_HOST).then(|| addr.to_string());
        let config = ProviderConfig::resolve(ProviderOverrides::default(), env).unwrap();
        assert_eq!(config.port, crate::config::DEFAULT_PORT);

        let backend = LocalBackend::new(config).unwrap();
        assert_eq!(backend.base_url(), format!("http://{}", addr));
        let result = backend.generate_completion(&request()).await.unwrap();
        assert_eq!(result.text, "hi");
    }

    #[tokio::test]
    async fn test_listing_error_status_is_unavailable() {
        let router = Router::new().route(
            "/api/tags",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "daemon overloaded") }),
        );
        let addr = fake_server::spawn(router).await;

        match backend_at(addr, "llama3").ensure_model_available().await.unwrap() {
            ModelAvailability::Unavailable { reason } => assert!(reason.contains("daemon overloaded")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_listing_is_unavailable() {
        let router = Router::new().route("/api/tags", get(|| async { "<html>not json</html>" }));
        let addr = fake_server::spawn(router).await;

        let availability = backend_at(addr, "llama3").ensure_model_available().await.unwrap();
        assert!(matches!(availability, ModelAvailability::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_unavailable() {
        let addr = fake_server::closed_addr().await;
        let availability = backend_at(addr, "llama3").ensure_model_available().await.unwrap();
        assert!(!availability.is_usable());
    }
}
