//! LLM Provider CLI
//!
//! Run with: cargo run --bin llm-provider -- complete "Write a haiku"

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use llm_provider::{
    create_provider_from_env, CompletionRequest, ModelAvailability, ProviderOverrides, Telemetry,
    TelemetryOptions,
};
use std::io::Read;
use std::path::PathBuf;

/// Get the default log directory
fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("llm-provider").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".llm_provider_logs"))
}

#[derive(Parser)]
#[command(name = "llm-provider")]
#[command(about = "Completions from a local model daemon or a hosted API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Provider kind: local or hosted (default: $LLM_PROVIDER, else local)
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Model name (default: $LLM_MODEL, else the provider's default)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Local daemon host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Local daemon port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Hosted API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// File containing the hosted API key
    #[arg(long, global = true)]
    api_key_path: Option<PathBuf>,

    /// Hosted API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// Nucleus sampling (local daemon only)
    #[arg(long, global = true)]
    top_p: Option<f32>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for JSON logs
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// OTLP/HTTP endpoint for trace export
    #[arg(long, global = true)]
    otel_endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure the configured model is usable (pulls or substitutes it if needed)
    Check,

    /// Run a single completion
    Complete {
        /// User prompt; read from stdin when omitted
        prompt: Option<String>,

        /// System prompt
        #[arg(short, long, default_value = "You are a helpful assistant.")]
        system: String,

        /// Skip the model availability check
        #[arg(long)]
        skip_check: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ProviderOverrides {
        ProviderOverrides {
            kind: self.provider.clone(),
            host: self.host.clone(),
            port: self.port,
            model: self.model.clone(),
            credential: self.api_key.clone(),
            credential_path: self.api_key_path.clone(),
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let _telemetry = Telemetry::init(TelemetryOptions {
        log_dir: Some(cli.log_dir.clone().unwrap_or_else(default_log_dir)),
        verbose: cli.verbose,
        otel_endpoint: cli.otel_endpoint.clone(),
    })?;

    let provider = create_provider_from_env(cli.overrides()).context("Failed to create provider")?;
    tracing::info!(provider = provider.name(), model = %provider.model(), "Provider ready");

    match cli.command {
        Commands::Check => match provider.ensure_model_available().await? {
            ModelAvailability::Available => println!("{}: available", provider.model()),
            ModelAvailability::Acquired => println!("{}: pulled", provider.model()),
            ModelAvailability::Substituted { requested, selected } => {
                println!("{}: not available, using {}", requested, selected)
            }
            ModelAvailability::Unavailable { reason } => {
                bail!("{} is unavailable: {}", provider.model(), reason)
            }
        },
        Commands::Complete {
            prompt,
            system,
            skip_check,
        } => {
            let prompt = match prompt {
                Some(prompt) => prompt,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read prompt from stdin")?;
                    buf
                }
            };

            if !skip_check {
                let availability = provider.ensure_model_available().await?;
                if let ModelAvailability::Unavailable { reason } = &availability {
                    tracing::warn!(reason = %reason, "Model unavailable; attempting completion anyway");
                }
            }

            let result = provider
                .generate_completion(&CompletionRequest::new(system, prompt))
                .await?;
            println!("{}", result.text);
        }
    }

    Ok(())
}
