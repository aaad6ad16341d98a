//! Source registry: which metric descriptors exist right now.
//!
//! Sources are registered explicitly by the host at startup (and whenever
//! an instrument or DUT is added to the bench). Enumeration snapshots the
//! source list and releases the lock before calling into any source, so a
//! source whose dynamic metric list enumerates the registry again does not
//! deadlock.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{MetricsError, Result};
use crate::metric::source::guarded;
use crate::metric::{MetricDescriptor, MetricSource, MetricSpec, SourceId, SourceRef};

/// Capacity of the metric-created broadcast channel.
const CREATED_CHANNEL_CAPACITY: usize = 256;

type ChangeHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct Registered {
    source_ref: SourceRef,
    source: Arc<dyn MetricSource>,
}

pub struct SourceRegistry {
    sources: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
    /// Availability overrides; metrics not listed here are available.
    availability: DashMap<MetricDescriptor, bool>,
    created: broadcast::Sender<MetricDescriptor>,
    change_hooks: RwLock<Vec<ChangeHook>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        let (created, _) = broadcast::channel(CREATED_CHANNEL_CAPACITY);
        Self {
            sources: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            availability: DashMap::new(),
            created,
            change_hooks: RwLock::new(Vec::new()),
        }
    }

    // ── Registration ──

    /// Register a source; its metrics show up in the next enumeration.
    pub fn register(&self, source: Arc<dyn MetricSource>) -> SourceId {
        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let source_ref = SourceRef {
            id,
            name: Arc::from(source.name()),
            origin: source.origin(),
        };
        info!(source = %source_ref.name, id = %id, "Registered metric source");
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registered { source_ref, source });
        self.notify_changed();
        id
    }

    pub fn unregister(&self, id: SourceId) -> Result<()> {
        let removed = {
            let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
            let idx = sources
                .iter()
                .position(|r| r.source_ref.id == id)
                .ok_or_else(|| MetricsError::UnknownSource(id.to_string()))?;
            sources.remove(idx)
        };
        self.availability.retain(|metric, _| metric.source.id != id);
        info!(source = %removed.source_ref.name, id = %id, "Unregistered metric source");
        self.notify_changed();
        Ok(())
    }

    pub fn source(&self, id: SourceId) -> Option<Arc<dyn MetricSource>> {
        self.snapshot()
            .into_iter()
            .find(|r| r.source_ref.id == id)
            .map(|r| r.source)
    }

    pub fn sources(&self) -> Vec<SourceRef> {
        self.snapshot().into_iter().map(|r| r.source_ref).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Enumeration ──

    /// All descriptors of all registered sources with a supported type.
    pub fn enumerate(&self) -> Vec<MetricDescriptor> {
        self.snapshot()
            .iter()
            .flat_map(|r| self.describe(r))
            .collect()
    }

    /// The live descriptor of one of a source's metrics.
    pub fn metric_info(&self, id: SourceId, name: &str) -> Option<MetricDescriptor> {
        let registered = self.snapshot().into_iter().find(|r| r.source_ref.id == id)?;
        self.describe(&registered).into_iter().find(|m| m.name == name)
    }

    /// Bind a dynamically created metric to its source and announce it.
    ///
    /// The registry does not keep the declared metric. The source must also
    /// list it from its dynamic metric list
    /// ([`crate::metric::AdditionalMetricsSource`]) for it to show up in
    /// enumeration and in the rescan this call schedules.
    pub fn declare(&self, id: SourceId, spec: MetricSpec) -> Result<MetricDescriptor> {
        let registered = self
            .snapshot()
            .into_iter()
            .find(|r| r.source_ref.id == id)
            .ok_or_else(|| MetricsError::UnknownSource(id.to_string()))?;
        if !spec.value_type.is_supported() {
            return Err(MetricsError::UnsupportedType(spec.name));
        }
        let descriptor = self.with_availability(MetricDescriptor::bind(spec, registered.source_ref));
        debug!(metric = %descriptor.full_name(), "Metric created");
        // No subscribers is fine.
        let _ = self.created.send(descriptor.clone());
        self.notify_changed();
        Ok(descriptor)
    }

    /// Receive every metric created through [`SourceRegistry::declare`].
    pub fn subscribe_created(&self) -> broadcast::Receiver<MetricDescriptor> {
        self.created.subscribe()
    }

    // ── Availability ──

    /// Returns true if the flag actually changed.
    pub(crate) fn set_available(&self, metric: &MetricDescriptor, available: bool) -> bool {
        if available {
            self.availability.remove(metric).is_some()
        } else {
            self.availability.insert(metric.clone(), false).is_none()
        }
    }

    pub fn is_available(&self, metric: &MetricDescriptor) -> bool {
        self.availability.get(metric).map(|v| *v).unwrap_or(true)
    }

    // ── Change notification ──

    /// Called whenever the set of available metrics may have changed.
    pub fn on_change(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.change_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    pub fn notify_changed(&self) {
        let hooks = self
            .change_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook();
        }
    }

    fn snapshot(&self) -> Vec<Registered> {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn describe(&self, registered: &Registered) -> Vec<MetricDescriptor> {
        let source = &registered.source;
        let mut specs = match guarded(|| Ok(source.metrics())) {
            Ok(specs) => specs,
            Err(e) => {
                warn!(source = %registered.source_ref.name, "Failed to list metrics: {}", e);
                Vec::new()
            }
        };
        if let Some(additional) = source.as_additional() {
            match guarded(|| Ok(additional.additional_metrics())) {
                Ok(extra) => specs.extend(extra),
                Err(e) => warn!(
                    source = %registered.source_ref.name,
                    "Failed to list additional metrics: {}", e
                ),
            }
        }

        specs
            .into_iter()
            .filter(|spec| {
                let supported = spec.value_type.is_supported();
                if !supported {
                    debug!(
                        source = %registered.source_ref.name,
                        metric = %spec.name,
                        "Skipping metric with unsupported type"
                    );
                }
                supported
            })
            .map(|spec| {
                self.with_availability(MetricDescriptor::bind(spec, registered.source_ref.clone()))
            })
            .collect()
    }

    fn with_availability(&self, mut descriptor: MetricDescriptor) -> MetricDescriptor {
        descriptor.available = self.is_available(&descriptor);
        descriptor
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
