/// Prometheus metrics for tool dispatch and model traffic
///
/// Exposed in text format on `GET /metrics`.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets, linear_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for tool invocation metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CallLabels {
    /// Tool name (e.g., "create_sheet", "write_cell")
    pub tool: String,
    /// Outcome ("success" or "error")
    pub status: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub tool: String,
    /// Error category from `ErrorCode::category`
    pub error_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolLabels {
    pub tool: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ModelLabels {
    /// Provider name ("openai", "gemini")
    pub provider: String,
    pub status: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Tool invocations by tool and outcome
    pub tool_calls_total: Family<CallLabels, Counter>,

    /// Tool latency in seconds, including file I/O
    pub tool_call_duration_seconds: Family<ToolLabels, Histogram>,

    /// Dispatch failures by tool and category
    pub tool_errors_total: Family<ErrorLabels, Counter>,

    /// Model provider requests by provider and outcome
    pub model_requests_total: Family<ModelLabels, Counter>,

    /// Model round-trip latency in seconds
    pub model_request_duration_seconds: Histogram,

    /// Number of calls per batch reply
    pub batch_size: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let tool_calls_total = Family::<CallLabels, Counter>::default();
        registry.register(
            "sheet_tool_calls",
            "Total number of tool invocations",
            tool_calls_total.clone(),
        );

        let tool_call_duration_seconds =
            Family::<ToolLabels, Histogram>::new_with_constructor(|| {
                // 5ms .. ~10s
                Histogram::new(exponential_buckets(0.005, 2.5, 9))
            });
        registry.register(
            "sheet_tool_call_duration_seconds",
            "Tool invocation latency in seconds",
            tool_call_duration_seconds.clone(),
        );

        let tool_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "sheet_tool_errors",
            "Total number of dispatch failures by tool and error type",
            tool_errors_total.clone(),
        );

        let model_requests_total = Family::<ModelLabels, Counter>::default();
        registry.register(
            "sheet_model_requests",
            "Total number of model provider requests",
            model_requests_total.clone(),
        );

        let model_request_duration_seconds = Histogram::new(exponential_buckets(0.1, 2.0, 10));
        registry.register(
            "sheet_model_request_duration_seconds",
            "Model provider round-trip latency in seconds",
            model_request_duration_seconds.clone(),
        );

        let batch_size = Histogram::new(linear_buckets(1.0, 1.0, 10));
        registry.register(
            "sheet_batch_size",
            "Number of tool calls per model reply",
            batch_size.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            tool_calls_total,
            tool_call_duration_seconds,
            tool_errors_total,
            model_requests_total,
            model_request_duration_seconds,
            batch_size,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::error!(?error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_tool_success(&self, tool: &str, duration: Duration) {
        self.count_call(tool, "success", duration);
    }

    pub fn record_tool_error(&self, tool: &str, duration: Duration, error_type: &str) {
        self.count_call(tool, "error", duration);
        self.record_dispatch_error(tool, error_type);
    }

    /// Failures that never reached a handler (malformed or unresolved calls)
    pub fn record_dispatch_error(&self, tool: &str, error_type: &str) {
        self.tool_errors_total
            .get_or_create(&ErrorLabels {
                tool: tool.to_string(),
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn record_model_request(&self, provider: &str, success: bool, duration: Duration) {
        self.model_requests_total
            .get_or_create(&ModelLabels {
                provider: provider.to_string(),
                status: if success { "success" } else { "error" }.to_string(),
            })
            .inc();
        self.model_request_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_batch(&self, size: usize) {
        self.batch_size.observe(size as f64);
    }

    fn count_call(&self, tool: &str, status: &str, duration: Duration) {
        self.tool_calls_total
            .get_or_create(&CallLabels {
                tool: tool.to_string(),
                status: status.to_string(),
            })
            .inc();
        self.tool_call_duration_seconds
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .observe(duration.as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_recorded_tool_calls() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_success("write_cell", Duration::from_millis(12));
        metrics.record_tool_error("create_sheet", Duration::from_millis(3), "invocation_error");
        metrics.record_model_request("openai", true, Duration::from_millis(800));
        metrics.record_batch(2);

        let text = metrics.encode();
        assert!(text.contains("sheet_tool_calls_total"));
        assert!(text.contains("tool=\"write_cell\""));
        assert!(text.contains("error_type=\"invocation_error\""));
        assert!(text.contains("provider=\"openai\""));
        assert!(text.contains("sheet_batch_size"));
    }
}
