//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Counters and histograms for dispatch runs
///
/// Owned by the caller and shared through `Arc`; there is no global instance.
pub struct DispatchMetrics {
    registry: Registry,

    // Counters
    pub dispatches: IntCounterVec,
    pub units_submitted: IntCounter,
    pub units_confirmed: IntCounter,
    pub submit_retries: IntCounter,
    pub submit_failures: IntCounterVec,
    pub packing_failures: IntCounter,

    // Histograms
    pub submit_latency: Histogram,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let dispatches = IntCounterVec::new(
            Opts::new("dispatches_total", "Dispatch runs by selected backend"),
            &["backend"],
        )?;

        let units_submitted = IntCounter::with_opts(Opts::new(
            "units_submitted_total",
            "Transactions accepted by the RPC node",
        ))?;

        let units_confirmed = IntCounter::with_opts(Opts::new(
            "units_confirmed_total",
            "Transactions confirmed at the configured commitment",
        ))?;

        let submit_retries = IntCounter::with_opts(Opts::new(
            "submit_retries_total",
            "Submission attempts after a transient failure",
        ))?;

        let submit_failures = IntCounterVec::new(
            Opts::new("submit_failures_total", "Failed submissions by error category"),
            &["category"],
        )?;

        let packing_failures = IntCounter::with_opts(Opts::new(
            "packing_failures_total",
            "Buckets too large for a unit on their own",
        ))?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new("submit_latency_seconds", "Send and confirm latency per unit")
                .buckets(vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(dispatches.clone()))?;
        registry.register(Box::new(units_submitted.clone()))?;
        registry.register(Box::new(units_confirmed.clone()))?;
        registry.register(Box::new(submit_retries.clone()))?;
        registry.register(Box::new(submit_failures.clone()))?;
        registry.register(Box::new(packing_failures.clone()))?;
        registry.register(Box::new(submit_latency.clone()))?;

        Ok(Self {
            registry,
            dispatches,
            units_submitted,
            units_confirmed,
            submit_retries,
            submit_failures,
            packing_failures,
            submit_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchMetrics")
            .field("units_submitted", &self.units_submitted.get())
            .field("units_confirmed", &self.units_confirmed.get())
            .finish()
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = DispatchMetrics::new().unwrap();
        metrics.units_submitted.inc();
        metrics.dispatches.with_label_values(&["direct"]).inc();
        metrics.submit_failures.with_label_values(&["transient"]).inc_by(2);

        let text = metrics.render();
        assert!(text.contains("units_submitted_total 1"));
        assert!(text.contains("dispatches_total{backend=\"direct\"} 1"));
        assert!(text.contains("submit_failures_total{category=\"transient\"} 2"));
    }
}
