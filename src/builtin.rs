//! Sources and sinks that ship with the daemon.

use chrono::{DateTime, Utc};
use std::sync::Weak;
use tracing::info;

use crate::metric::{Metric, MetricDescriptor, MetricSink, MetricSource, MetricSpec, MetricType};
use crate::registry::SourceRegistry;

const RUNTIME_GROUP: &str = "Benchwatch";
const RUNTIME_POLL_RATE: u32 = 5;

/// Daemon uptime and the number of registered sources.
pub struct RuntimeMetricSource {
    started: DateTime<Utc>,
    registry: Weak<SourceRegistry>,
}

impl RuntimeMetricSource {
    pub fn new(registry: Weak<SourceRegistry>) -> Self {
        Self {
            started: Utc::now(),
            registry,
        }
    }
}

impl MetricSource for RuntimeMetricSource {
    fn name(&self) -> &str {
        "Runtime"
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![
            MetricSpec::poll("Uptime", MetricType::DOUBLE)
                .in_group(RUNTIME_GROUP)
                .with_default_poll_rate(RUNTIME_POLL_RATE)
                .enabled_by_default()
                .with_description("Seconds since the daemon started"),
            MetricSpec::poll("Registered Sources", MetricType::DOUBLE)
                .in_group(RUNTIME_GROUP)
                .with_default_poll_rate(RUNTIME_POLL_RATE)
                .enabled_by_default(),
        ]
    }

    fn value(&self, metric: &MetricDescriptor) -> anyhow::Result<serde_json::Value> {
        match metric.name.as_str() {
            "Uptime" => {
                let uptime = Utc::now().signed_duration_since(self.started);
                Ok(serde_json::json!(uptime.num_milliseconds() as f64 / 1000.0))
            }
            "Registered Sources" => {
                let registry = self
                    .registry
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("registry dropped"))?;
                Ok(serde_json::json!(registry.len()))
            }
            other => anyhow::bail!("unknown runtime metric '{}'", other),
        }
    }
}

/// Writes every poll batch to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricSink for LogSink {
    fn name(&self) -> &str {
        "Log"
    }

    fn on_batch(&self, metrics: &[Metric]) -> anyhow::Result<()> {
        for metric in metrics {
            info!(
                metric = %metric.descriptor.full_name(),
                source = %metric.descriptor.source.name,
                value = %metric.value,
                time = %metric.time.to_rfc3339(),
                "Metric"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricValue;
    use std::sync::Arc;

    #[test]
    fn test_runtime_metrics() {
        let registry = Arc::new(SourceRegistry::new());
        registry.register(Arc::new(RuntimeMetricSource::new(Arc::downgrade(&registry))));

        let metrics = registry.enumerate();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.default_enabled && m.default_poll_rate == 5));

        let source = registry.source(metrics[1].source_id()).unwrap();
        let count = source.value(&metrics[1]).unwrap();
        assert_eq!(MetricValue::from_raw(&count), Some(MetricValue::Double(1.0)));
        let uptime = source.value(&metrics[0]).unwrap();
        assert!(uptime.as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn test_log_sink_accepts_batches() {
        assert!(LogSink.on_batch(&[]).is_ok());
    }
}
