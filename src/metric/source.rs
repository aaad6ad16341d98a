//! Capability traits implemented by metric producers and consumers.
//!
//! Producers implement [`MetricSource`], optionally extended with
//! [`AdditionalMetricsSource`] and [`PollNotifiable`]. Consumers implement
//! [`MetricListener`] (out-of-band pushes) or [`MetricSink`] (whole poll
//! batches). The core never sees a collaborator's error type: every call
//! returns `anyhow::Result` and is isolated by [`guarded`].

use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};

use super::descriptor::{MetricDescriptor, MetricSpec, SourceOrigin};
use super::value::Metric;

// ── Producers ───────────────────────────────────────────────────────

/// Something that exposes metrics, e.g. an instrument, a DUT or a
/// static producer.
pub trait MetricSource: Send + Sync {
    /// Display name; used as the group of metrics without one.
    fn name(&self) -> &str;

    fn origin(&self) -> SourceOrigin {
        SourceOrigin::Builtin
    }

    /// Statically declared metrics.
    fn metrics(&self) -> Vec<MetricSpec>;

    /// Read the current raw value of one of this source's metrics.
    fn value(&self, metric: &MetricDescriptor) -> Result<serde_json::Value>;

    fn as_additional(&self) -> Option<&dyn AdditionalMetricsSource> {
        None
    }

    fn as_poll_notifiable(&self) -> Option<&dyn PollNotifiable> {
        None
    }
}

/// A source with a dynamic, possibly changing list of extra metrics.
///
/// `additional_metrics` is called without any registry lock held, so it
/// may enumerate the registry itself.
pub trait AdditionalMetricsSource: MetricSource {
    fn additional_metrics(&self) -> Vec<MetricSpec>;
}

/// A source that wants to refresh several properties in one go before
/// its values are read.
pub trait PollNotifiable: Send + Sync {
    fn on_poll(&self, metrics: &[MetricDescriptor]) -> Result<()>;
}

// ── Consumers ───────────────────────────────────────────────────────

/// Receives pushed values of the metrics it showed interest in.
pub trait MetricListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_push(&self, metric: &Metric) -> Result<()>;
}

/// Receives every polled value of a distribution cycle as one batch.
pub trait MetricSink: Send + Sync {
    fn name(&self) -> &str;

    fn on_batch(&self, metrics: &[Metric]) -> Result<()>;
}

/// Run a collaborator callback, turning a panic into an error.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow::anyhow!("panicked: {}", msg))
        }
    }
}
