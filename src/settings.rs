//! In-memory metric settings: which specifiers are polled, how often, and
//! which are blocked.
//!
//! Persisting these is the host's job; they deserialize from the daemon
//! config but are never written back.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock};

use crate::error::{MetricsError, Result};
use crate::specifier::{MergedHints, MetricSpecifier};

/// Poll rates (seconds) every UI can display nicely.
pub const STANDARD_POLL_RATES: [u32; 10] = [5, 10, 30, 60, 300, 900, 1800, 3600, 7200, 86400];

/// Used when no contributor suggests a poll rate.
pub const FALLBACK_POLL_RATE: u32 = 300;

// ── Settings Item ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSettingsItem {
    pub specifier: MetricSpecifier,
    /// Seconds between polls; 0 never fires.
    pub poll_rate: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl MetricSettingsItem {
    /// An enabled item polled at the first suggested rate, else 300 s.
    pub fn new(specifier: MetricSpecifier, hints: &MergedHints) -> Self {
        Self {
            specifier,
            poll_rate: hints.default_poll_rate().unwrap_or(FALLBACK_POLL_RATE),
            enabled: true,
        }
    }

    /// True if this item asks for a poll at `epoch_seconds`.
    pub fn is_due(&self, epoch_seconds: u64) -> bool {
        self.enabled && self.poll_rate != 0 && epoch_seconds % u64::from(self.poll_rate) == 0
    }

    /// Standard rates, suggested rates and the current rate; ascending.
    pub fn available_poll_rates(&self, hints: &MergedHints) -> Vec<u32> {
        STANDARD_POLL_RATES
            .iter()
            .chain(hints.default_poll_rates.iter())
            .copied()
            .chain((self.poll_rate != 0).then_some(self.poll_rate))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Human readable poll rate, e.g. "Every 5 Minutes (Default)".
pub fn poll_rate_label(seconds: u32, is_default: bool) -> String {
    let mut value = seconds;
    let mut unit = "Second";
    if value > 0 && value % 60 == 0 {
        value /= 60;
        unit = "Minute";
        if value % 60 == 0 {
            value /= 60;
            unit = "Hour";
            if value % 24 == 0 {
                value /= 24;
                unit = "Day";
            }
        }
    }
    let label = if value == 1 {
        format!("Every {}", unit)
    } else {
        format!("Every {} {}s", value, unit)
    };
    if is_default {
        format!("{} (Default)", label)
    } else {
        label
    }
}

// ── Block List ──────────────────────────────────────────────────────

/// Specifiers that were manually disabled, keyed by display string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsBlockList {
    blocked: BTreeSet<String>,
}

impl MetricsBlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, specifier: &MetricSpecifier) -> bool {
        self.blocked.contains(&specifier.to_string())
    }

    pub fn block(&mut self, specifier: &MetricSpecifier) {
        self.blocked.insert(specifier.to_string());
    }

    pub fn unblock(&mut self, specifier: &MetricSpecifier) {
        self.blocked.remove(&specifier.to_string());
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// The configured metrics. Readers take a cheap clone of the item list.
#[derive(Default)]
pub struct MetricSettings {
    items: RwLock<Vec<MetricSettingsItem>>,
    block_list: RwLock<MetricsBlockList>,
}

impl MetricSettings {
    pub fn new(items: Vec<MetricSettingsItem>, block_list: MetricsBlockList) -> Result<Self> {
        let settings = Self {
            items: RwLock::new(Vec::new()),
            block_list: RwLock::new(block_list),
        };
        for item in items {
            settings.add(item)?;
        }
        Ok(settings)
    }

    /// Settings holding one item per default-enabled specifier.
    pub fn with_defaults<'a, I>(specifiers: I, block_list: MetricsBlockList) -> Self
    where
        I: IntoIterator<Item = (&'a MetricSpecifier, &'a MergedHints)>,
    {
        let settings = Self {
            items: RwLock::new(Vec::new()),
            block_list: RwLock::new(block_list),
        };
        settings.add_defaults(specifiers);
        settings
    }

    /// Seed an item for every default-enabled, unblocked specifier that is
    /// not configured yet. Returns how many were added.
    pub fn add_defaults<'a, I>(&self, specifiers: I) -> usize
    where
        I: IntoIterator<Item = (&'a MetricSpecifier, &'a MergedHints)>,
    {
        let block_list = self.block_list();
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for (specifier, hints) in specifiers {
            if !hints.default_enabled || block_list.is_blocked(specifier) {
                continue;
            }
            if items.iter().any(|i| &i.specifier == specifier) {
                continue;
            }
            items.push(MetricSettingsItem::new(specifier.clone(), hints));
            added += 1;
        }
        added
    }

    pub fn add(&self, item: MetricSettingsItem) -> Result<()> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if items.iter().any(|i| i.specifier == item.specifier) {
            return Err(MetricsError::DuplicateSetting(item.specifier.to_string()));
        }
        items.push(item);
        Ok(())
    }

    pub fn remove(&self, specifier: &MetricSpecifier) -> bool {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let before = items.len();
        items.retain(|i| &i.specifier != specifier);
        items.len() != before
    }

    pub fn set_poll_rate(&self, specifier: &MetricSpecifier, poll_rate: u32) -> bool {
        self.update(specifier, |item| item.poll_rate = poll_rate)
    }

    pub fn set_enabled(&self, specifier: &MetricSpecifier, enabled: bool) -> bool {
        self.update(specifier, |item| item.enabled = enabled)
    }

    pub fn items(&self) -> Vec<MetricSettingsItem> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn block_list(&self) -> MetricsBlockList {
        self.block_list.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Block a specifier; it is no longer polled.
    pub fn block(&self, specifier: &MetricSpecifier) {
        self.block_list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .block(specifier);
    }

    pub fn unblock(&self, specifier: &MetricSpecifier) {
        self.block_list
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unblock(specifier);
    }

    /// Distinct specifiers whose poll is due at `epoch_seconds`.
    pub fn due(&self, epoch_seconds: u64) -> Vec<MetricSpecifier> {
        let block_list = self.block_list();
        let mut seen = HashSet::new();
        self.items()
            .into_iter()
            .filter(|item| item.is_due(epoch_seconds) && !block_list.is_blocked(&item.specifier))
            .filter(|item| seen.insert(item.specifier.clone()))
            .map(|item| item.specifier)
            .collect()
    }

    fn update(&self, specifier: &MetricSpecifier, f: impl FnOnce(&mut MetricSettingsItem)) -> bool {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items.iter_mut().find(|i| &i.specifier == specifier) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }
}
