//! One discovery round at a time, across all configured providers.
//!
//! A round moves through dispatch, a bounded wait and collection. Tasks
//! that miss the deadline are not cancelled: they stay in the in-flight
//! map and the next round joins them instead of querying the provider
//! again, so a busy instrument never sees more than one query at a time.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

use super::round::{DiscoveryRound, ProviderOutcome};
use super::{DiscoveryProvider, DiscoveryResult};

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

type InFlight = HashMap<String, JoinHandle<DiscoveryResult>>;

pub struct DiscoveryCoordinator {
    providers: RwLock<Vec<Arc<dyn DiscoveryProvider>>>,
    /// Held for a whole round; also serialises access to pending tasks.
    in_flight: Mutex<InFlight>,
    timeout: Duration,
}

impl DiscoveryCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ── Providers ──

    /// Add a provider, replacing any configured under the same name.
    ///
    /// If the replaced provider still has a query in flight, the next round
    /// joins that query rather than asking the new provider.
    pub fn add_provider(&self, provider: Arc<dyn DiscoveryProvider>) {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        providers.retain(|p| p.name() != provider.name());
        debug!(provider = provider.name(), priority = provider.priority(), "Added discovery provider");
        providers.push(provider);
    }

    pub fn remove_provider(&self, name: &str) -> bool {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        providers.len() != before
    }

    /// Configured providers, highest priority first. Equal priorities keep
    /// their configuration order.
    pub fn providers(&self) -> Vec<Arc<dyn DiscoveryProvider>> {
        let mut providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        providers.sort_by(|a, b| b.priority().total_cmp(&a.priority()));
        providers
    }

    /// Providers whose last query is still running.
    pub async fn pending(&self) -> Vec<String> {
        let mut names: Vec<_> = self.in_flight.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    // ── Rounds ──

    /// Run one round and report every configured provider's outcome.
    pub async fn discover_all(&self) -> DiscoveryRound {
        let mut in_flight = self.in_flight.lock().await;
        let providers = self.providers();

        // Dispatch
        for provider in &providers {
            let name = provider.name().to_string();
            if in_flight.contains_key(&name) {
                debug!(provider = %name, "Joining discovery query from an earlier round");
                continue;
            }
            let provider = Arc::clone(provider);
            in_flight.insert(name, tokio::spawn(query(provider)));
        }

        // Await: one deadline for every tracked task, old and new.
        let deadline = Instant::now() + self.timeout;
        let mut finished: HashMap<String, DiscoveryResult> = HashMap::new();
        for (name, task) in in_flight.iter_mut() {
            if let Ok(joined) = time::timeout_at(deadline, task).await {
                let result = joined.unwrap_or_else(|e| {
                    error!(provider = %name, "Discovery task failed: {}", e);
                    DiscoveryResult::failed(format!("discovery task failed: {}", e))
                });
                finished.insert(name.clone(), result);
            }
        }
        in_flight.retain(|name, _| !finished.contains_key(name));

        // Collect
        let outcomes = providers
            .iter()
            .map(|provider| {
                let name = provider.name();
                let result = match finished.remove(name) {
                    Some(result) => result,
                    None => {
                        warn!(
                            provider = %name,
                            "Discovery provider is taking a long time to complete; \
                             it will not be queried again until the current query finishes"
                        );
                        DiscoveryResult::timeout()
                    }
                };
                ProviderOutcome {
                    name: name.to_string(),
                    priority: provider.priority(),
                    result,
                }
            })
            .collect();

        DiscoveryRound::new(outcomes)
    }
}

impl Default for DiscoveryCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

/// Run a provider, turning its error into a failed result.
async fn query(provider: Arc<dyn DiscoveryProvider>) -> DiscoveryResult {
    debug!(provider = provider.name(), "Asking provider to discover assets");
    match provider.discover().await {
        Ok(result) => {
            debug!(provider = provider.name(), success = result.is_success, "Provider returned");
            result
        }
        Err(e) => {
            error!(provider = provider.name(), "Error while discovering assets: {}", e);
            DiscoveryResult::failed(e.to_string())
        }
    }
}
