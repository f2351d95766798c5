//! Prometheus metrics for suppression cycles.

use crate::{Result, SuppressionError};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use suppression_common::CycleSummaryV1;

pub struct SuppressionMetrics {
    registry: Registry,
    cycles: IntCounter,
    cycles_aborted: IntCounter,
    alerts_created: IntCounter,
    alerts_updated: IntCounter,
    unsuppressed_created: IntCounter,
    suppressed_docs: IntCounter,
    dropped_by_cap: IntCounter,
    write_errors: IntCounter,
    cycle_duration: Histogram,
}

impl SuppressionMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cycles = counter(&registry, "suppression_cycles_total", "Evaluation cycles run")?;
        let cycles_aborted = counter(
            &registry,
            "suppression_cycles_aborted_total",
            "Evaluation cycles cancelled before all writes were flushed",
        )?;
        let alerts_created = counter(
            &registry,
            "suppression_alerts_created_total",
            "Suppressed alerts created",
        )?;
        let alerts_updated = counter(
            &registry,
            "suppression_alerts_updated_total",
            "Suppressed alerts extended in place",
        )?;
        let unsuppressed_created = counter(
            &registry,
            "suppression_unsuppressed_alerts_created_total",
            "Per-document alerts created for documents missing group-by fields",
        )?;
        let suppressed_docs = counter(
            &registry,
            "suppression_suppressed_documents_total",
            "Documents folded into suppressed alerts",
        )?;
        let dropped_by_cap = counter(
            &registry,
            "suppression_dropped_by_cap_total",
            "Groups or documents dropped after max_signals was reached",
        )?;
        let write_errors = counter(
            &registry,
            "suppression_write_errors_total",
            "Alert writes that failed after retries",
        )?;

        let cycle_duration = Histogram::with_opts(HistogramOpts::new(
            "suppression_cycle_duration_seconds",
            "Wall time of one evaluation cycle",
        ))
        .map_err(metrics_error)?;
        registry
            .register(Box::new(cycle_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            cycles,
            cycles_aborted,
            alerts_created,
            alerts_updated,
            unsuppressed_created,
            suppressed_docs,
            dropped_by_cap,
            write_errors,
            cycle_duration,
        })
    }

    pub fn record_cycle(&self, summary: &CycleSummaryV1) {
        self.cycles.inc();
        if summary.aborted {
            self.cycles_aborted.inc();
        }
        self.alerts_created.inc_by(summary.alerts_created as u64);
        self.alerts_updated.inc_by(summary.alerts_updated as u64);
        self.unsuppressed_created
            .inc_by(summary.unsuppressed_created as u64);
        self.suppressed_docs.inc_by(summary.suppressed_docs);
        self.dropped_by_cap.inc_by(summary.dropped_by_cap as u64);
        self.write_errors.inc_by(summary.errors.len() as u64);

        let elapsed = summary.finished_at - summary.started_at;
        if let Ok(elapsed) = elapsed.to_std() {
            self.cycle_duration.observe(elapsed.as_secs_f64());
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer)
            .map_err(|e| SuppressionError::Configuration(format!("metrics encoding: {}", e)))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help)).map_err(metrics_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metrics_error)?;
    Ok(counter)
}

fn metrics_error(e: prometheus::Error) -> SuppressionError {
    SuppressionError::Configuration(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_record_cycle_updates_counters() {
        let metrics = SuppressionMetrics::new().unwrap();
        let started = Utc.with_ymd_and_hms(2020, 10, 28, 5, 30, 0).unwrap();
        let mut summary = CycleSummaryV1::new("c-1", "rule-1", started);
        summary.finished_at = started + Duration::milliseconds(250);
        summary.alerts_created = 3;
        summary.suppressed_docs = 7;
        summary.dropped_by_cap = 2;

        metrics.record_cycle(&summary);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("suppression_cycles_total 1"));
        assert!(text.contains("suppression_alerts_created_total 3"));
        assert!(text.contains("suppression_suppressed_documents_total 7"));
        assert!(text.contains("suppression_dropped_by_cap_total 2"));
        assert!(text.contains("suppression_cycle_duration_seconds_count 1"));
    }
}
