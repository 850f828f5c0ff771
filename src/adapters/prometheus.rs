//! Prometheus Exposition Adapter
//!
//! Renders a [`CacheAnalyticsReport`] in the Prometheus text format using a
//! private registry, so several caches in one process never collide.

use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::analytics::CacheAnalyticsReport;
use crate::error::{Error, Result};

const NAMESPACE: &str = "mediacache";

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

/// Prometheus text exporter for cache analytics
pub struct PrometheusExporter {
    registry: Registry,
    hits: IntGauge,
    misses: IntGauge,
    hit_rate: Gauge,
    entries: IntGauge,
    size_bytes: IntGauge,
    max_size_bytes: IntGauge,
    utilization: Gauge,
    health_score: Gauge,
    evictions: IntGauge,
    space_freed_bytes: IntGauge,
    compression_savings_bytes: IntGauge,
    corrupt_entries: IntGauge,
    prefetch_completed: IntGauge,
    prefetching_enabled: IntGauge,
    get_latency_us: IntGauge,
    priority_entries: IntGaugeVec,
    priority_bytes: IntGaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
                .map_err(prom_err)?;
            registry.register(Box::new(gauge.clone())).map_err(prom_err)?;
            Ok(gauge)
        };
        let float_gauge = |name: &str, help: &str| -> Result<Gauge> {
            let gauge =
                Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(prom_err)?;
            registry.register(Box::new(gauge.clone())).map_err(prom_err)?;
            Ok(gauge)
        };
        let priority_gauge = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["priority"])
                .map_err(prom_err)?;
            registry.register(Box::new(gauge.clone())).map_err(prom_err)?;
            Ok(gauge)
        };

        Ok(Self {
            hits: int_gauge("hits", "Cache hits")?,
            misses: int_gauge("misses", "Cache misses")?,
            hit_rate: float_gauge("hit_rate", "Hit rate (1.0 before any access)")?,
            entries: int_gauge("entries", "Cached entries")?,
            size_bytes: int_gauge("size_bytes", "Bytes in use")?,
            max_size_bytes: int_gauge("max_size_bytes", "Configured cache budget")?,
            utilization: float_gauge("utilization", "Fraction of the budget in use")?,
            health_score: float_gauge("health_score", "Derived health score in [0, 1]")?,
            evictions: int_gauge("evictions", "Entries removed from the store")?,
            space_freed_bytes: int_gauge("space_freed_bytes", "Bytes released by removals")?,
            compression_savings_bytes: int_gauge(
                "compression_savings_bytes",
                "Bytes saved by compression",
            )?,
            corrupt_entries: int_gauge("corrupt_entries", "Corrupt entries discarded")?,
            prefetch_completed: int_gauge("prefetch_completed", "Completed prefetches")?,
            prefetching_enabled: int_gauge("prefetching_enabled", "1 if prefetching is on")?,
            get_latency_us: int_gauge("get_latency_microseconds", "Average read latency")?,
            priority_entries: priority_gauge("priority_entries", "Entries per priority")?,
            priority_bytes: priority_gauge("priority_bytes", "Bytes per priority")?,
            registry,
        })
    }

    /// Render a report as Prometheus text
    pub fn render(&self, report: &CacheAnalyticsReport) -> Result<String> {
        let m = &report.metrics;
        self.hits.set(m.hits as i64);
        self.misses.set(m.misses as i64);
        self.hit_rate.set(m.hit_rate);
        self.entries.set(report.total_entries as i64);
        self.size_bytes.set(report.total_size_bytes as i64);
        self.max_size_bytes.set(report.max_size_bytes as i64);
        self.utilization.set(report.utilization);
        self.health_score.set(report.health.score);
        self.evictions.set(m.evictions as i64);
        self.space_freed_bytes.set(m.space_freed as i64);
        self.compression_savings_bytes
            .set(m.compression_savings() as i64);
        self.corrupt_entries.set(m.corrupt_entries as i64);
        self.prefetch_completed.set(m.prefetch_completed as i64);
        self.prefetching_enabled
            .set(i64::from(report.prefetching_enabled));
        self.get_latency_us.set(m.avg_get_latency_us as i64);

        for (priority, stats) in &report.by_priority {
            self.priority_entries
                .with_label_values(&[priority.name()])
                .set(stats.entries as i64);
            self.priority_bytes
                .with_label_values(&[priority.name()])
                .set(stats.bytes as i64);
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::analytics::{CacheAnalytics, ReportContext};

    #[test]
    fn test_render_contains_metrics() {
        let analytics = CacheAnalytics::new();
        analytics.record_hit();
        analytics.record_miss();
        let report = analytics.report(ReportContext {
            state: "Running".into(),
            entries: &[],
            total_size_bytes: 300,
            max_size_bytes: 1000,
            compression_enabled: true,
            prefetching_enabled: true,
            high_watermark: 0.9,
        });

        let exporter = PrometheusExporter::new().unwrap();
        let text = exporter.render(&report).unwrap();
        assert!(text.contains("mediacache_hits 1"));
        assert!(text.contains("mediacache_hit_rate 0.5"));
        assert!(text.contains("mediacache_size_bytes 300"));
        assert!(text.contains(r#"mediacache_priority_entries{priority="low"} 0"#));
    }

    #[test]
    fn test_exporters_are_independent() {
        assert!(PrometheusExporter::new().is_ok());
        assert!(PrometheusExporter::new().is_ok());
    }
}
