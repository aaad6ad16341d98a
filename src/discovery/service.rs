//! Long-running discovery: periodic rounds, the last result, and the
//! discovery state exposed as metrics.

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::coordinator::DiscoveryCoordinator;
use super::round::DiscoveryRound;
use super::DiscoveryProvider;
use crate::error::{MetricsError, Result};
use crate::invalidator::DebouncedCacheInvalidator;
use crate::metric::{
    AdditionalMetricsSource, MetricDescriptor, MetricSource, MetricSpec, MetricType, SourceId,
};
use crate::registry::SourceRegistry;

const ROUND_CHANNEL_CAPACITY: usize = 16;

/// Group of the metrics published by [`DiscoveryMetricSource`].
pub const DISCOVERY_METRIC_GROUP: &str = "Asset Discovery";
const ASSETS_SUFFIX: &str = " Assets";
const AVAILABLE_SUFFIX: &str = " Available";

struct Shared {
    coordinator: Arc<DiscoveryCoordinator>,
    last: RwLock<Option<Arc<DiscoveryRound>>>,
    rounds: broadcast::Sender<Arc<DiscoveryRound>>,
}

impl Shared {
    async fn discover(&self) -> Arc<DiscoveryRound> {
        let round = Arc::new(self.coordinator.discover_all().await);
        let summary: Vec<String> = round
            .outcomes()
            .iter()
            .map(|o| format!("{} ({} assets)", o.name, o.result.assets().len()))
            .collect();
        debug!(providers = round.outcomes().len(), "Asset discovery: {}", summary.join(", "));

        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&round));
        // No subscribers is fine.
        let _ = self.rounds.send(Arc::clone(&round));
        round
    }

    fn last_round(&self) -> Option<Arc<DiscoveryRound>> {
        self.last.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Owns a coordinator, remembers its last round and reruns discovery
/// shortly after the provider set changes.
pub struct DiscoveryService {
    shared: Arc<Shared>,
    invalidator: DebouncedCacheInvalidator,
    handle: Handle,
}

impl DiscoveryService {
    /// Must be called inside a tokio runtime.
    pub fn new(
        coordinator: Arc<DiscoveryCoordinator>,
        debounce_window: Duration,
        debounce_max_delay: Duration,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            MetricsError::config(format!("discovery service needs a tokio runtime: {}", e))
        })?;
        let (rounds, _) = broadcast::channel(ROUND_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            coordinator,
            last: RwLock::new(None),
            rounds,
        });

        let scan_target = Arc::clone(&shared);
        let invalidator = DebouncedCacheInvalidator::with_handle(
            handle.clone(),
            "asset-discovery",
            debounce_window,
            debounce_max_delay,
            move || {
                let shared = Arc::clone(&scan_target);
                async move {
                    shared.discover().await;
                }
            },
        );

        Ok(Self { shared, invalidator, handle })
    }

    pub fn coordinator(&self) -> &Arc<DiscoveryCoordinator> {
        &self.shared.coordinator
    }

    /// Add a provider and schedule a fresh round.
    pub fn add_provider(&self, provider: Arc<dyn DiscoveryProvider>) {
        self.shared.coordinator.add_provider(provider);
        self.invalidator.notify();
    }

    pub fn remove_provider(&self, name: &str) -> bool {
        let removed = self.shared.coordinator.remove_provider(name);
        if removed {
            self.invalidator.notify();
        }
        removed
    }

    /// Run a round now.
    pub async fn discover(&self) -> Arc<DiscoveryRound> {
        self.shared.discover().await
    }

    pub fn last_round(&self) -> Option<Arc<DiscoveryRound>> {
        self.shared.last_round()
    }

    /// Receive every completed round.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DiscoveryRound>> {
        self.shared.rounds.subscribe()
    }

    /// Register the discovery metrics with `registry`; each completed round
    /// tells the registry its metric list may have changed.
    pub fn attach_metrics(&self, registry: &Arc<SourceRegistry>) -> SourceId {
        let id = registry.register(Arc::new(self.metric_source()));
        let mut rounds = self.subscribe();
        let registry: Weak<SourceRegistry> = Arc::downgrade(registry);
        self.handle.spawn(async move {
            loop {
                match rounds.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => match registry.upgrade() {
                        Some(registry) => registry.notify_changed(),
                        None => break,
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        id
    }

    pub fn metric_source(&self) -> DiscoveryMetricSource {
        DiscoveryMetricSource {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run a round now and then every `interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Asset discovery starting");
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let round = self.discover().await;
                    info!(
                        providers = round.outcomes().len(),
                        assets = round.resolve_assets().len(),
                        "Asset discovery round finished"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Asset discovery stopped");
    }
}

// ── Discovery as metrics ────────────────────────────────────────────

/// Per provider of the last round: how many assets it found and whether
/// it answered at all.
pub struct DiscoveryMetricSource {
    shared: Arc<Shared>,
}

impl MetricSource for DiscoveryMetricSource {
    fn name(&self) -> &str {
        DISCOVERY_METRIC_GROUP
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        Vec::new()
    }

    fn value(&self, metric: &MetricDescriptor) -> anyhow::Result<serde_json::Value> {
        let round = self
            .shared
            .last_round()
            .ok_or_else(|| anyhow::anyhow!("no discovery round has finished yet"))?;
        if let Some(provider) = metric.name.strip_suffix(ASSETS_SUFFIX) {
            if let Some(result) = round.result(provider) {
                return Ok(serde_json::json!(result.assets().len()));
            }
        }
        if let Some(provider) = metric.name.strip_suffix(AVAILABLE_SUFFIX) {
            if let Some(result) = round.result(provider) {
                return Ok(serde_json::json!(result.is_success));
            }
        }
        anyhow::bail!("provider of '{}' is not part of the last round", metric.name)
    }

    fn as_additional(&self) -> Option<&dyn AdditionalMetricsSource> {
        Some(self)
    }
}

impl AdditionalMetricsSource for DiscoveryMetricSource {
    fn additional_metrics(&self) -> Vec<MetricSpec> {
        let Some(round) = self.shared.last_round() else {
            return Vec::new();
        };
        round
            .outcomes()
            .iter()
            .flat_map(|o| {
                [
                    MetricSpec::poll(format!("{}{}", o.name, ASSETS_SUFFIX), MetricType::DOUBLE)
                        .in_group(DISCOVERY_METRIC_GROUP)
                        .with_description("Assets found in the last discovery round"),
                    MetricSpec::poll(format!("{}{}", o.name, AVAILABLE_SUFFIX), MetricType::BOOLEAN)
                        .in_group(DISCOVERY_METRIC_GROUP)
                        .with_description("Whether the provider answered the last discovery round"),
                ]
            })
            .collect()
    }
}
