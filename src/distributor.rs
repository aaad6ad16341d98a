//! Metric distribution: the poll cycle and the push path.
//!
//! A cycle selects the configured specifiers whose poll rate divides the
//! current epoch second and collects every poll-capable descriptor matching
//! them. Each owning source refreshes once, then the values are read and
//! the batch goes to every sink. Pushes bypass the cycle and go straight to the
//! interested listeners on the caller's thread.
//!
//! Every call into a source, sink or listener is isolated: failures and
//! panics are logged with the collaborator's name and never abort delivery
//! to the others.

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{MetricsError, Result};
use crate::interest::{ConsumerId, InterestTracker};
use crate::metric::source::guarded;
use crate::metric::{
    Metric, MetricDescriptor, MetricKind, MetricListener, MetricSink, MetricValue, SourceId,
};
use crate::registry::SourceRegistry;
use crate::settings::MetricSettings;
use crate::specifier::SpecifierCache;

/// Longest run of missed seconds a late tick still evaluates.
const MAX_CATCH_UP_SECONDS: u64 = 10;

pub struct Distributor {
    registry: Arc<SourceRegistry>,
    cache: Arc<SpecifierCache>,
    interest: Arc<InterestTracker>,
    settings: Arc<MetricSettings>,
    listeners: DashMap<ConsumerId, Arc<dyn MetricListener>>,
    sinks: DashMap<ConsumerId, Arc<dyn MetricSink>>,
    /// Descriptors whose unsupported value was already reported.
    unsupported_logged: DashSet<MetricDescriptor>,
}

impl Distributor {
    pub fn new(
        registry: Arc<SourceRegistry>,
        cache: Arc<SpecifierCache>,
        interest: Arc<InterestTracker>,
        settings: Arc<MetricSettings>,
    ) -> Self {
        Self {
            registry,
            cache,
            interest,
            settings,
            listeners: DashMap::new(),
            sinks: DashMap::new(),
            unsupported_logged: DashSet::new(),
        }
    }

    // ── Consumers ──

    pub fn register_listener(&self, listener: Arc<dyn MetricListener>) -> ConsumerId {
        let id = ConsumerId::new();
        info!(consumer = %id, listener = listener.name(), "Registered metric listener");
        self.listeners.insert(id, listener);
        id
    }

    /// Drop a listener together with its interest.
    pub fn unregister_listener(&self, id: ConsumerId) -> bool {
        self.interest.remove(id);
        self.listeners.remove(&id).is_some()
    }

    pub fn register_sink(&self, sink: Arc<dyn MetricSink>) -> ConsumerId {
        let id = ConsumerId::new();
        info!(consumer = %id, sink = sink.name(), "Registered metric sink");
        self.sinks.insert(id, sink);
        id
    }

    pub fn unregister_sink(&self, id: ConsumerId) -> bool {
        self.interest.remove(id);
        self.sinks.remove(&id).is_some()
    }

    pub fn set_interest<I>(&self, consumer: ConsumerId, metrics: I)
    where
        I: IntoIterator<Item = MetricDescriptor>,
    {
        self.interest.set_interest(consumer, metrics);
    }

    pub fn has_interest(&self, metric: &MetricDescriptor) -> bool {
        self.interest.has_interest(metric)
    }

    // ── Poll cycle ──

    /// The descriptors due for polling at `epoch_seconds`.
    pub fn polled_descriptors(&self, epoch_seconds: u64) -> Vec<MetricDescriptor> {
        self.polled_descriptors_between(epoch_seconds..=epoch_seconds)
    }

    /// Every poll-capable descriptor of every specifier due at any second in
    /// `epochs`. All instances of a specifier are polled, each once.
    pub fn polled_descriptors_between(&self, epochs: RangeInclusive<u64>) -> Vec<MetricDescriptor> {
        let mut due_seen = HashSet::new();
        let due: Vec<_> = epochs
            .flat_map(|epoch| self.settings.due(epoch))
            .filter(|spec| due_seen.insert(spec.clone()))
            .collect();
        if due.is_empty() {
            return Vec::new();
        }

        let snapshot = self.cache.snapshot();
        let mut selected = HashSet::new();
        let mut polled = Vec::new();
        for spec in &due {
            let before = polled.len();
            polled.extend(
                snapshot
                    .descriptors
                    .iter()
                    .filter(|d| d.kind.can_poll() && spec.matches(d))
                    .filter(|d| selected.insert((*d).clone()))
                    .cloned(),
            );
            if polled.len() == before {
                debug!(specifier = %spec, "No poll-capable source for configured metric");
            }
        }
        polled
    }

    /// Read the current values of `metrics`, one `on_poll` per source first.
    pub fn poll_metrics(&self, metrics: &[MetricDescriptor]) -> Vec<Metric> {
        let mut by_source: BTreeMap<SourceId, Vec<MetricDescriptor>> = BTreeMap::new();
        for metric in metrics {
            by_source.entry(metric.source_id()).or_default().push(metric.clone());
        }

        let mut batch = Vec::with_capacity(metrics.len());
        for (id, group) in by_source {
            let source = match self.registry.source(id) {
                Some(s) => s,
                None => {
                    debug!(source = %id, "Source vanished before poll");
                    continue;
                }
            };
            let source_name = group[0].source.name.clone();

            if let Some(notifiable) = source.as_poll_notifiable() {
                if let Err(e) = guarded(|| notifiable.on_poll(&group)) {
                    error!(source = %source_name, "Poll notification failed: {}", e);
                }
            }

            for metric in group {
                let raw = match guarded(|| source.value(&metric)) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(
                            source = %source_name,
                            metric = %metric.full_name(),
                            "Failed to read metric: {}", e
                        );
                        continue;
                    }
                };
                match MetricValue::from_raw(&raw) {
                    Some(value) => batch.push(Metric::new(metric, value)),
                    None => self.log_unsupported(&metric, &raw),
                }
            }
        }
        batch
    }

    /// Run one distribution cycle. Returns the batch size.
    pub fn run_cycle(&self, epoch_seconds: u64) -> usize {
        self.run_cycle_between(epoch_seconds..=epoch_seconds)
    }

    /// One cycle covering every second in `epochs`, so seconds skipped by a
    /// late tick still fire. Nothing is read while no sink is registered.
    pub fn run_cycle_between(&self, epochs: RangeInclusive<u64>) -> usize {
        if self.sinks.is_empty() {
            return 0;
        }
        let selected = self.polled_descriptors_between(epochs.clone());
        if selected.is_empty() {
            return 0;
        }
        let batch = self.poll_metrics(&selected);
        if batch.is_empty() {
            return 0;
        }

        let sinks: Vec<_> = self
            .sinks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for sink in sinks {
            if let Err(e) = guarded(|| sink.on_batch(&batch)) {
                error!(sink = sink.name(), "Metric sink failed: {}", e);
            }
        }
        debug!(
            from = *epochs.start(),
            to = *epochs.end(),
            metrics = batch.len(),
            "Distributed poll batch"
        );
        batch.len()
    }

    // ── Push path ──

    /// Deliver a pushed value to every interested listener, synchronously.
    /// Returns how many listeners received it.
    pub fn push(&self, metric: &MetricDescriptor, value: impl Into<MetricValue>) -> usize {
        if self.registry.set_available(metric, true) {
            self.registry.notify_changed();
        }
        let mut descriptor = metric.clone();
        descriptor.available = true;
        let pushed = Metric::new(descriptor, value.into());

        // Collect first; a listener may unregister itself while handling.
        let interested: Vec<_> = self
            .listeners
            .iter()
            .filter(|entry| self.interest.is_interested(*entry.key(), metric))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut delivered = 0;
        for listener in interested {
            match guarded(|| listener.on_push(&pushed)) {
                Ok(()) => delivered += 1,
                Err(e) => error!(
                    listener = listener.name(),
                    metric = %metric.full_name(),
                    "Metric listener failed: {}", e
                ),
            }
        }
        delivered
    }

    /// Signal whether a pushed metric currently has a value.
    pub fn set_availability(&self, metric: &MetricDescriptor, available: bool) -> Result<()> {
        if !metric.kind.contains(MetricKind::PUSH) {
            return Err(MetricsError::InvalidAvailabilityTarget {
                metric: metric.full_name(),
                kind: metric.kind,
            });
        }
        if self.registry.set_available(metric, available) {
            debug!(metric = %metric.full_name(), available, "Metric availability changed");
            self.registry.notify_changed();
        }
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    // ── Driver ──

    /// Tick every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "Metric distributor starting");
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_epoch = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now = Utc::now().timestamp().max(0) as u64;
            let Some(epochs) = epochs_to_evaluate(last_epoch, now) else {
                continue;
            };
            last_epoch = Some(now);

            // Sources may block on hardware.
            let this = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || this.run_cycle_between(epochs)).await {
                error!("Distribution cycle aborted: {}", e);
            }
        }
        info!("Metric distributor stopped");
    }

    fn log_unsupported(&self, metric: &MetricDescriptor, raw: &serde_json::Value) {
        if self.unsupported_logged.insert(metric.clone()) {
            warn!(
                source = %metric.source.name,
                metric = %metric.full_name(),
                value = %raw,
                "Unsupported metric value type, dropping"
            );
        }
    }
}

/// The epoch seconds a tick at `now` must cover after `last`: every second
/// since the previous tick, at most [`MAX_CATCH_UP_SECONDS`] of them. A
/// clock that went backwards restarts from `now`.
fn epochs_to_evaluate(last: Option<u64>, now: u64) -> Option<RangeInclusive<u64>> {
    match last {
        Some(last) if last == now => None,
        Some(last) if last < now => {
            let from = (last + 1).max(now.saturating_sub(MAX_CATCH_UP_SECONDS - 1));
            Some(from..=now)
        }
        _ => Some(now..=now),
    }
}
