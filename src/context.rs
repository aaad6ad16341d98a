//! The metric core wired together.
//!
//! One `MetricsContext` per process (or per test). Registry changes are
//! funnelled through a debounced invalidator that rebuilds the specifier
//! cache and seeds default-enabled metrics into the settings.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::Config;
use crate::distributor::Distributor;
use crate::error::Result;
use crate::interest::InterestTracker;
use crate::invalidator::DebouncedCacheInvalidator;
use crate::registry::SourceRegistry;
use crate::settings::MetricSettings;
use crate::specifier::SpecifierCache;

pub struct MetricsContext {
    pub registry: Arc<SourceRegistry>,
    pub cache: Arc<SpecifierCache>,
    pub interest: Arc<InterestTracker>,
    pub settings: Arc<MetricSettings>,
    pub distributor: Arc<Distributor>,
    pub invalidator: DebouncedCacheInvalidator,
}

impl MetricsContext {
    /// Build a context from the daemon configuration. Needs a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.metric_settings()?,
            config.debounce_window(),
            config.debounce_max_delay(),
        )
    }

    pub fn new(settings: MetricSettings, window: Duration, max_delay: Duration) -> Result<Self> {
        let registry = Arc::new(SourceRegistry::new());
        let cache = Arc::new(SpecifierCache::new(Arc::clone(&registry)));
        let interest = Arc::new(InterestTracker::new());
        let settings = Arc::new(settings);
        let distributor = Arc::new(Distributor::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&interest),
            Arc::clone(&settings),
        ));

        let scan_cache = Arc::clone(&cache);
        let scan_settings = Arc::clone(&settings);
        let invalidator = DebouncedCacheInvalidator::new(
            "metric-specifiers",
            window,
            max_delay,
            move || {
                let cache = Arc::clone(&scan_cache);
                let settings = Arc::clone(&scan_settings);
                async move {
                    // Enumeration calls into sources, which may block.
                    let refreshed = tokio::task::spawn_blocking(move || {
                        let snapshot = cache.refresh();
                        settings.add_defaults(&snapshot.specifiers)
                    })
                    .await;
                    match refreshed {
                        Ok(seeded) if seeded > 0 => debug!(seeded, "Seeded default metric settings"),
                        Ok(_) => {}
                        Err(e) => error!("Specifier refresh failed: {}", e),
                    }
                }
            },
        )?;

        let hook = invalidator.clone();
        registry.on_change(move || hook.notify());

        Ok(Self {
            registry,
            cache,
            interest,
            settings,
            distributor,
            invalidator,
        })
    }

    /// Rebuild the specifier cache right away, bypassing the debounce.
    pub fn refresh_now(&self) -> usize {
        let snapshot = self.cache.refresh();
        self.settings.add_defaults(&snapshot.specifiers)
    }
}
