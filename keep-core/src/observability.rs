/*!
Observability infrastructure for the storage layer.

This module provides:
- Structured logging setup (JSON or human-readable)
- Prometheus metrics for storage requests and health checks (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::{Duration, Instant};
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{KeepError, Result};

/// Directive applied on top of `RUST_LOG`
const DEFAULT_DIRECTIVE: &str = "keep_core=info";

/// Global metrics instance; `None` when registration failed
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<KeepMetrics>> = OnceLock::new();

/// Metrics collection for storage operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct KeepMetrics {
    /// Storage requests by action
    pub storage_requests_total: CounterVec,
    /// Failed storage requests by action; missing keys are not failures
    pub storage_errors_total: CounterVec,
    /// Storage request duration by action
    pub storage_latency_seconds: HistogramVec,
    /// Health checks by result
    pub check_db_total: CounterVec,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl KeepMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let storage_requests_total = CounterVec::new(
            Opts::new("keep_storage_requests_total", "Total storage requests"),
            &["action"],
        )
        .map_err(|e| metric_error("storage_requests_total", e))?;

        let storage_errors_total = CounterVec::new(
            Opts::new("keep_storage_errors_total", "Total failed storage requests"),
            &["action"],
        )
        .map_err(|e| metric_error("storage_errors_total", e))?;

        let storage_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "keep_storage_latency_seconds",
                "Duration of storage requests in seconds",
            ),
            &["action"],
        )
        .map_err(|e| metric_error("storage_latency_seconds", e))?;

        let check_db_total = CounterVec::new(
            Opts::new("keep_check_db_total", "Total database health checks"),
            &["result"],
        )
        .map_err(|e| metric_error("check_db_total", e))?;

        registry
            .register(Box::new(storage_requests_total.clone()))
            .map_err(|e| metric_error("storage_requests_total", e))?;
        registry
            .register(Box::new(storage_errors_total.clone()))
            .map_err(|e| metric_error("storage_errors_total", e))?;
        registry
            .register(Box::new(storage_latency_seconds.clone()))
            .map_err(|e| metric_error("storage_latency_seconds", e))?;
        registry
            .register(Box::new(check_db_total.clone()))
            .map_err(|e| metric_error("check_db_total", e))?;

        Ok(Self {
            storage_requests_total,
            storage_errors_total,
            storage_latency_seconds,
            check_db_total,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the metrics could not be registered; the failure is
    /// logged once.
    pub fn global() -> Option<&'static KeepMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!("Storage metrics disabled: {}", e);
                    None
                }
            })
            .as_ref()
    }

    pub fn record_request(&self, action: &str) {
        self.storage_requests_total.with_label_values(&[action]).inc();
    }

    pub fn record_error(&self, action: &str) {
        self.storage_errors_total.with_label_values(&[action]).inc();
    }

    pub fn record_latency(&self, action: &str, duration: Duration) {
        self.storage_latency_seconds
            .with_label_values(&[action])
            .observe(duration.as_secs_f64());
    }

    pub fn record_check_db(&self, healthy: bool) {
        let result = if healthy { "healthy" } else { "unhealthy" };
        self.check_db_total.with_label_values(&[result]).inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| KeepError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| KeepError::validation(format!("Failed to convert metrics to string: {e}")))
    }
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> KeepError {
    KeepError::validation(format!("Failed to set up metric {name}: {e}"))
}

/// Measures one storage request
///
/// Counts the request when started and records latency, plus an error when
/// finished with one.
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    action: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    /// Start a new timer for the given action
    pub fn start(action: &'static str) -> Self {
        if let Some(metrics) = KeepMetrics::global() {
            metrics.record_request(action);
        }
        Self {
            start: Instant::now(),
            action,
        }
    }

    /// Complete the timer, recording latency
    pub fn finish(self) {
        if let Some(metrics) = KeepMetrics::global() {
            metrics.record_latency(self.action, self.start.elapsed());
        }
    }

    /// Complete the timer with an error, recording both latency and error
    pub fn finish_with_error(self) {
        if let Some(metrics) = KeepMetrics::global() {
            metrics.record_latency(self.action, self.start.elapsed());
            metrics.record_error(self.action);
        }
    }
}

/// Initialize the global logging subscriber
///
/// The filter comes from `RUST_LOG` with `keep_core=info` added on top.
///
/// # Arguments
/// * `json` - Emit one JSON object per event instead of formatted text
///
/// # Returns
/// An error if a global subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    KeepMetrics::global();

    let directive = DEFAULT_DIRECTIVE
        .parse()
        .map_err(|e| KeepError::validation(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let installed = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };
    installed.map_err(|e| {
        KeepError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Observability initialized");
    Ok(())
}

/// Initialize observability with default settings (JSON output)
pub fn init_default_observability() -> Result<()> {
    init_observability(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_installs_once() {
        assert!(init_observability(false).is_ok());
        assert!(matches!(
            init_default_observability(),
            Err(KeepError::Validation(_))
        ));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_initialization() {
        let metrics = KeepMetrics::global().unwrap();

        metrics.record_request("put");
        metrics.record_error("get");
        metrics.record_latency("put", Duration::from_millis(100));
        metrics.record_check_db(true);
        metrics.record_check_db(false);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_timer() {
        let timer = MetricsTimer::start("scan");
        std::thread::sleep(Duration::from_millis(1));
        timer.finish();

        MetricsTimer::start("remove").finish_with_error();
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        let metrics = KeepMetrics::global().unwrap();
        metrics.record_request("get");
        metrics.record_check_db(true);

        let metrics_text = metrics.gather_metrics().unwrap();
        assert!(metrics_text.contains("keep_storage_requests_total"));
        assert!(metrics_text.contains("keep_check_db_total"));
    }
}
