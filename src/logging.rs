//! Subscriber setup for the server binary.
//!
//! Production environments log JSON, everything else logs pretty text.
//! Output defaults to stderr because stdout carries the stdio MCP transport.
//! Spans are exported over OTLP when an endpoint is configured.

use anyhow::{Context, Result};
use opentelemetry::{
    KeyValue,
    trace::{TraceError, TracerProvider as _},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "sheet-tools-mcp";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Only read when `output` is [`LogOutput::File`].
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
    pub service_name: String,
    pub service_version: String,
    /// `production`/`prod` switch to JSON, info level and 10% sampling.
    pub environment: String,
    pub enable_otel: bool,
    pub otlp_endpoint: Option<String>,
    pub enable_rotation: bool,
    /// Fraction of root spans exported, clamped to `0.0..=1.0`.
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// `log_dir/log_file_prefix`, rotated daily unless rotation is off.
    File,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let is_production = is_production(&environment);

        Self {
            format: if is_production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            // stdout belongs to the stdio transport
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: SERVICE_NAME.to_string(),
            service_name: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            enable_otel: false,
            otlp_endpoint: None,
            enable_rotation: true,
            otel_sampling_rate: if is_production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }
}

fn is_production(environment: &str) -> bool {
    environment == "production" || environment == "prod"
}

impl LoggingConfig {
    /// Defaults overridden by `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR` and the
    /// standard `OTEL_*` variables. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => config.format,
            };
        }

        if let Ok(output) = env::var("LOG_OUTPUT") {
            config.output = match output.to_lowercase().as_str() {
                "stdout" => LogOutput::Stdout,
                "stderr" => LogOutput::Stderr,
                "file" => LogOutput::File,
                _ => config.output,
            };
        }

        if let Ok(log_dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        if let Ok(otel_endpoint) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.enable_otel = true;
            config.otlp_endpoint = Some(otel_endpoint);
        } else if env::var("ENABLE_OTEL").is_ok() {
            config.enable_otel = true;
        }

        if let Ok(rate) = env::var("OTEL_SAMPLING_RATE") {
            if let Ok(rate) = rate.parse::<f64>() {
                config.otel_sampling_rate = rate.clamp(0.0, 1.0);
            }
        }

        if let Ok(timeout) = env::var("OTEL_EXPORTER_OTLP_TIMEOUT") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                config.otlp_timeout_secs = timeout;
            }
        }

        config
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                self.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
        ])
    }

    fn sampler(&self) -> Sampler {
        if self.otel_sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.otel_sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.otel_sampling_rate,
            )))
        }
    }
}

/// Installs the global subscriber. Keep the returned guard alive until exit;
/// dropping it stops the background writer.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if is_production(&config.environment) {
            "info"
        } else {
            "debug"
        };
        EnvFilter::new(format!("{level},hyper=info,reqwest=info,umya_spreadsheet=warn"))
    });

    let (writer, guard) = match config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File => {
            std::fs::create_dir_all(&config.log_dir).with_context(|| {
                format!("cannot create log directory {}", config.log_dir.display())
            })?;
            let appender = if config.enable_rotation {
                tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix)
            } else {
                tracing_appender::rolling::never(&config.log_dir, &config.log_file_prefix)
            };
            tracing_appender::non_blocking(appender)
        }
    };

    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(config.output != LogOutput::File)
            .with_filter(env_filter)
            .boxed(),
    };

    // Export problems are reported once the subscriber exists.
    let (otel_layer, otel_problem) = match otel_layer(&config) {
        Ok(layer) => (layer, None),
        Err(problem) => (None, Some(problem)),
    };
    let exporting = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    if let Some(problem) = otel_problem {
        tracing::warn!(%problem, "trace export disabled");
    }
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otlp = exporting,
        "logging ready"
    );

    Ok(Some(guard))
}

/// OTLP layer when export is enabled. `Err` carries the reason export was
/// requested but could not be set up; logging continues without it.
fn otel_layer<S>(config: &LoggingConfig) -> Result<Option<OpenTelemetryLayer<S, Tracer>>, String>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    if !config.enable_otel {
        return Ok(None);
    }
    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        return Err("ENABLE_OTEL is set but OTEL_EXPORTER_OTLP_ENDPOINT is not".to_string());
    };
    let provider = tracer_provider(config, endpoint)
        .map_err(|e| format!("OTLP exporter for {endpoint} failed to start: {e}"))?;
    // shutdown_telemetry flushes through the global handle
    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(Some(
        tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)),
    ))
}

fn tracer_provider(config: &LoggingConfig, endpoint: &str) -> Result<TracerProvider, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

/// Flushes and shuts down the OpenTelemetry pipeline.
pub fn shutdown_telemetry() {
    tracing::info!("shutting down telemetry");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Emits one info event per finished tool call:
/// `log_tool_call!(tool, outcome, elapsed, extra_fields.., "message")`.
#[macro_export]
macro_rules! log_tool_call {
    ($tool:expr, $result:expr, $duration:expr, $($arg:tt)*) => {
        tracing::info!(
            tool = %$tool,
            result = %$result,
            duration_ms = $duration.as_millis() as u64,
            $($arg)*
        );
    };
}

/// Span wrapping a single tool dispatch.
pub fn tool_call_span(tool_name: &str) -> tracing::Span {
    tracing::info_span!(
        "tool_call",
        tool = tool_name,
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION")
    )
}

/// Span wrapping one `/chat` request from prompt to last tool result.
pub fn chat_request_span(request_id: &str, provider: &str) -> tracing::Span {
    tracing::info_span!(
        "chat_request",
        request_id = request_id,
        provider = provider,
        service = SERVICE_NAME,
    )
}
