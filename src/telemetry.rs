//! Logging infrastructure
//!
//! Installs the global tracing subscriber for binaries using the providers:
//! - Console logging on stderr (human-readable, stdout stays free for output)
//! - JSON file logging, rolled daily (for analysis)
//! - OpenTelemetry span export (optional)

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "llm-provider";

/// Options for [`Telemetry::init`]
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    /// Directory for JSON log files; no file logging when unset
    pub log_dir: Option<PathBuf>,

    /// Debug-level logging for this crate
    pub verbose: bool,

    /// OTLP/HTTP endpoint for span export
    pub otel_endpoint: Option<String>,
}

/// Keeps log writers and exporters alive; drop flushes them
pub struct Telemetry {
    log_dir: Option<PathBuf>,
    _file_guard: Option<WorkerGuard>,
    otel_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Install the global subscriber
    ///
    /// `RUST_LOG` takes precedence over the verbosity flag. A subscriber that is
    /// already installed is left in place.
    pub fn init(options: TelemetryOptions) -> anyhow::Result<Self> {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if options.verbose {
                EnvFilter::new("debug,hyper=info,hyper_util=info,reqwest=info,h2=info,rustls=info")
            } else {
                EnvFilter::new("info,hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn")
            }
        });

        let (file_layer, file_guard) = match &options.log_dir {
            Some(log_dir) => {
                std::fs::create_dir_all(log_dir)?;
                let file_appender = tracing_appender::rolling::daily(log_dir, "llm_provider.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                (Some(fmt::layer().json().with_writer(non_blocking)), Some(guard))
            }
            None => (None, None),
        };

        let otel_provider = match options.otel_endpoint.as_deref() {
            Some(endpoint) => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(endpoint)
                    .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
                    .build()?;

                Some(
                    SdkTracerProvider::builder()
                        .with_batch_exporter(exporter)
                        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                        .build(),
                )
            }
            None => None,
        };
        let otel_layer = otel_provider
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
            .with(file_layer)
            .with(otel_layer)
            .try_init()
            .ok();

        tracing::debug!(
            log_dir = ?options.log_dir,
            otel_enabled = options.otel_endpoint.is_some(),
            "Telemetry initialized"
        );

        Ok(Self {
            log_dir: options.log_dir,
            _file_guard: file_guard,
            otel_provider,
        })
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.otel_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush trace exporter: {}", e);
            }
        }
    }
}
