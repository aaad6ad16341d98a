//! Results of a discovery round and their merged view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{DiscoveredAsset, DiscoveryResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub name: String,
    pub priority: f64,
    pub result: DiscoveryResult,
}

/// Every configured provider's outcome, highest priority first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRound {
    outcomes: Vec<ProviderOutcome>,
    pub finished_at: DateTime<Utc>,
}

/// An asset together with the provider whose attributes were kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAsset {
    pub provider: String,
    #[serde(flatten)]
    pub asset: DiscoveredAsset,
}

impl DiscoveryRound {
    pub(crate) fn new(mut outcomes: Vec<ProviderOutcome>) -> Self {
        outcomes.sort_by(|a, b| b.priority.total_cmp(&a.priority));
        Self {
            outcomes,
            finished_at: Utc::now(),
        }
    }

    pub fn outcomes(&self) -> &[ProviderOutcome] {
        &self.outcomes
    }

    pub fn result(&self, provider: &str) -> Option<&DiscoveryResult> {
        self.outcomes
            .iter()
            .find(|o| o.name == provider)
            .map(|o| &o.result)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Assets of all successful providers, one per identifier. When two
    /// providers report the same identifier the higher priority one wins.
    pub fn resolve_assets(&self) -> Vec<ResolvedAsset> {
        let mut seen = HashSet::new();
        let mut resolved: Vec<ResolvedAsset> = self
            .outcomes
            .iter()
            .flat_map(|o| {
                o.result.assets().iter().map(move |asset| ResolvedAsset {
                    provider: o.name.clone(),
                    asset: asset.clone(),
                })
            })
            .filter(|r| seen.insert(r.asset.identifier.clone()))
            .collect();
        resolved.sort_by(|a, b| a.asset.identifier.cmp(&b.asset.identifier));
        resolved
    }

    /// The wire shape published to remote consumers.
    pub fn to_response(&self) -> AssetDiscoveryResponse {
        AssetDiscoveryResponse {
            asset_providers: self
                .outcomes
                .iter()
                .map(|o| AssetProviderResult {
                    name: o.name.clone(),
                    priority: o.priority,
                    is_success: o.result.is_success,
                    error: o.result.error.clone(),
                    discovered_assets: o.result.assets.clone().unwrap_or_default(),
                })
                .collect(),
            last_seen: self.finished_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetDiscoveryResponse {
    pub asset_providers: Vec<AssetProviderResult>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetProviderResult {
    pub name: String,
    pub priority: f64,
    pub is_success: bool,
    pub error: Option<String>,
    pub discovered_assets: Vec<DiscoveredAsset>,
}
