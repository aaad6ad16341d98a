//! Asset discovery: finding instruments and DUTs attached to the bench.
//!
//! Providers talk to hardware over slow buses and may hang. The
//! [`DiscoveryCoordinator`] queries them concurrently under one shared
//! deadline and never has more than one outstanding query per provider.

pub mod coordinator;
pub mod round;
pub mod service;

pub use coordinator::{DiscoveryCoordinator, DEFAULT_DISCOVERY_TIMEOUT};
pub use round::{
    AssetDiscoveryResponse, AssetProviderResult, DiscoveryRound, ProviderOutcome, ResolvedAsset,
};
pub use service::{DiscoveryMetricSource, DiscoveryService};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error recorded for a provider that missed the round deadline.
pub const TIMEOUT_ERROR: &str = "Timeout";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAsset {
    /// E.g. the first field of an `*IDN?` reply, or a USB vendor ID.
    pub manufacturer: String,
    pub model: String,
    /// Unique per physical asset; used to reconcile providers.
    pub identifier: String,
}

impl DiscoveredAsset {
    pub fn new(
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            identifier: identifier.into(),
        }
    }
}

/// Outcome of one provider query.
///
/// `is_success == false` means the provider could not answer right now
/// (busy, instrument in use, timed out). It never means "no assets".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub is_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub assets: Option<Vec<DiscoveredAsset>>,
}

impl DiscoveryResult {
    pub fn success(assets: Vec<DiscoveredAsset>) -> Self {
        Self {
            is_success: true,
            error: None,
            assets: Some(assets),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            is_success: false,
            error: Some(error.into()),
            assets: None,
        }
    }

    pub fn timeout() -> Self {
        Self::failed(TIMEOUT_ERROR)
    }

    pub fn is_timeout(&self) -> bool {
        !self.is_success && self.error.as_deref() == Some(TIMEOUT_ERROR)
    }

    /// Assets of a successful result; empty otherwise.
    pub fn assets(&self) -> &[DiscoveredAsset] {
        match (&self.assets, self.is_success) {
            (Some(assets), true) => assets,
            _ => &[],
        }
    }
}

/// A plugin that can list assets attached to the system.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Unique among configured providers.
    fn name(&self) -> &str;

    /// Higher wins when two providers report the same identifier.
    fn priority(&self) -> f64 {
        0.0
    }

    async fn discover(&self) -> Result<DiscoveryResult>;
}
