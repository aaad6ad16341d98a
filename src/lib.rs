//! Benchwatch: metric distribution and asset discovery for test benches.
//!
//! Sources (instruments, DUTs, sensors) declare metrics through
//! [`MetricSource`]. Equivalent declarations from different sources are
//! merged into [`MetricSpecifier`]s, configured in [`MetricSettings`] and
//! polled by the [`Distributor`], which also routes pushed values to
//! interested listeners. Independently, the [`DiscoveryCoordinator`]
//! queries asset discovery providers under a shared deadline.

pub mod builtin;
pub mod config;
pub mod context;
pub mod discovery;
pub mod distributor;
pub mod error;
pub mod interest;
pub mod invalidator;
pub mod metric;
pub mod registry;
pub mod settings;
pub mod specifier;

pub use config::Config;
pub use context::MetricsContext;
pub use discovery::{
    DiscoveredAsset, DiscoveryCoordinator, DiscoveryProvider, DiscoveryResult, DiscoveryRound,
    DiscoveryService,
};
pub use distributor::Distributor;
pub use error::{MetricsError, Result};
pub use interest::{ConsumerId, InterestTracker};
pub use invalidator::DebouncedCacheInvalidator;
pub use metric::{
    AdditionalMetricsSource, Metric, MetricDescriptor, MetricKind, MetricListener, MetricSink,
    MetricSource, MetricSpec, MetricType, MetricValue, PollNotifiable,
};
pub use registry::SourceRegistry;
pub use settings::{MetricSettings, MetricSettingsItem, MetricsBlockList};
pub use specifier::{MergedHints, MetricSpecifier, SpecifierCache};
