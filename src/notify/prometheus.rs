//! Prometheus metrics for the reconciler.

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};

use crate::error::NotificationError;

/// Prometheus metrics for submissions and reconciles.
pub struct Metrics {
    /// Registry for all metrics.
    registry: Registry,
    /// Videos submitted to the remote service.
    pub submissions_total: Counter,
    /// Reconciles by outcome.
    pub reconciles_total: CounterVec,
    /// Artifacts created on the host.
    pub artifacts_created_total: Counter,
    /// (artifact, base URL) pairs that failed to materialize.
    pub materialization_failures_total: Counter,
    /// Remote failures reported to operators.
    pub reported_failures_total: Counter,
    /// Files with at least one tracking association.
    pub tracked_files: Gauge,
}

fn prom_err(e: prometheus::Error) -> NotificationError {
    NotificationError::PrometheusFailed(e.to_string())
}

impl Metrics {
    /// Creates a new metrics instance with all gauges and counters.
    pub fn new() -> Result<Self, NotificationError> {
        let registry = Registry::new();

        let submissions_total = Counter::new(
            "transcode_submissions_total",
            "Total number of videos submitted for transcoding",
        )
        .map_err(prom_err)?;

        let reconciles_total = CounterVec::new(
            Opts::new("transcode_reconciles_total", "Total number of reconciles by outcome"),
            &["outcome"],
        )
        .map_err(prom_err)?;

        let artifacts_created_total = Counter::new(
            "transcode_artifacts_created_total",
            "Total number of artifacts created from completed transcodes",
        )
        .map_err(prom_err)?;

        let materialization_failures_total = Counter::new(
            "transcode_materialization_failures_total",
            "Total number of artifact/base URL pairs that failed to materialize",
        )
        .map_err(prom_err)?;

        let reported_failures_total = Counter::new(
            "transcode_reported_failures_total",
            "Total number of remote transcode failures reported",
        )
        .map_err(prom_err)?;

        let tracked_files = Gauge::new(
            "transcode_tracked_files",
            "Number of files with transcodes in flight",
        )
        .map_err(prom_err)?;

        registry.register(Box::new(submissions_total.clone())).map_err(prom_err)?;
        registry.register(Box::new(reconciles_total.clone())).map_err(prom_err)?;
        registry
            .register(Box::new(artifacts_created_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(materialization_failures_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(reported_failures_total.clone()))
            .map_err(prom_err)?;
        registry.register(Box::new(tracked_files.clone())).map_err(prom_err)?;

        Ok(Self {
            registry,
            submissions_total,
            reconciles_total,
            artifacts_created_total,
            materialization_failures_total,
            reported_failures_total,
            tracked_files,
        })
    }

    /// Records a submission.
    pub fn record_submission(&self) {
        self.submissions_total.inc();
    }

    /// Records a reconcile outcome label.
    pub fn record_reconcile(&self, outcome: &str) {
        self.reconciles_total.with_label_values(&[outcome]).inc();
    }

    /// Records created artifacts.
    pub fn record_artifacts(&self, count: usize) {
        self.artifacts_created_total.inc_by(count as f64);
    }

    /// Records failed materializations.
    pub fn record_materialization_failures(&self, count: usize) {
        self.materialization_failures_total.inc_by(count as f64);
    }

    /// Records a reported remote failure.
    pub fn record_reported_failure(&self) {
        self.reported_failures_total.inc();
    }

    /// Updates the tracked files gauge.
    pub fn set_tracked_files(&self, count: usize) {
        self.tracked_files.set(count as f64);
    }

    /// Returns the metrics in Prometheus text format.
    pub fn gather(&self) -> Result<String, NotificationError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| NotificationError::PrometheusFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathered_text_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_submission();
        metrics.record_reconcile("materialized");
        metrics.record_artifacts(6);
        metrics.set_tracked_files(2);

        let text = metrics.gather().unwrap();
        assert!(text.contains("transcode_submissions_total 1"));
        assert!(text.contains(r#"transcode_reconciles_total{outcome="materialized"} 1"#));
        assert!(text.contains("transcode_artifacts_created_total 6"));
        assert!(text.contains("transcode_tracked_files 2"));
    }
}
