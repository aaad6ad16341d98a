//! Specifier merging: one identity for equivalent metrics across sources.
//!
//! Several interchangeable drivers often declare the same metric concept
//! (two instrument drivers both exposing `Sensors / Temperature`). They are
//! collapsed into a [`MetricSpecifier`] with merged hints so configuration
//! refers to the concept, not to a concrete source.
//!
//! Which concrete source a specifier binds to at runtime is a best-effort
//! heuristic: a contributor that is not supplied by a plugin package is
//! preferred, otherwise the first one found wins.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::metric::{MetricDescriptor, MetricKind, MetricType, SourceOrigin};
use crate::registry::SourceRegistry;

// ── Specifier ───────────────────────────────────────────────────────

/// Source-independent identity of a metric: name, declared group and value
/// type with nullability stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricSpecifier {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    pub value_type: MetricType,
}

impl MetricSpecifier {
    pub fn new(name: impl Into<String>, group: Option<String>, value_type: MetricType) -> Self {
        Self {
            name: name.into(),
            group: group.filter(|g| !g.trim().is_empty()),
            value_type: value_type.without_nullable(),
        }
    }

    pub fn of(descriptor: &MetricDescriptor) -> Self {
        Self::new(
            descriptor.name.clone(),
            descriptor.declared_group.clone(),
            descriptor.value_type,
        )
    }

    pub fn matches(&self, descriptor: &MetricDescriptor) -> bool {
        self.name == descriptor.name
            && self.group == descriptor.declared_group
            && self.value_type == descriptor.value_type.without_nullable()
    }
}

impl fmt::Display for MetricSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{} \\ {} \\ {}", self.value_type, group, self.name),
            None => write!(f, "{} \\ {}", self.value_type, self.name),
        }
    }
}

// ── Merged Hints ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergedHints {
    /// Union of all contributors' kinds.
    pub kind: MetricKind,
    /// True if any contributor is enabled by default.
    pub default_enabled: bool,
    /// Distinct non-zero default poll rates, ascending.
    pub default_poll_rates: Vec<u32>,
}

impl MergedHints {
    /// Fold one more contributor in. Only ever adds flags or rates.
    pub fn absorb(&mut self, descriptor: &MetricDescriptor) {
        self.kind |= descriptor.kind;
        self.default_enabled |= descriptor.default_enabled;
        let rate = descriptor.default_poll_rate;
        if rate != 0 {
            if let Err(idx) = self.default_poll_rates.binary_search(&rate) {
                self.default_poll_rates.insert(idx, rate);
            }
        }
    }

    /// The smallest non-zero default poll rate, if any contributor has one.
    pub fn default_poll_rate(&self) -> Option<u32> {
        self.default_poll_rates.first().copied()
    }
}

/// Collapse descriptors into specifiers. The result does not depend on
/// the order of `descriptors`.
pub fn merge<'a, I>(descriptors: I) -> HashMap<MetricSpecifier, MergedHints>
where
    I: IntoIterator<Item = &'a MetricDescriptor>,
{
    let mut merged: HashMap<MetricSpecifier, MergedHints> = HashMap::new();
    for descriptor in descriptors {
        merged
            .entry(MetricSpecifier::of(descriptor))
            .or_default()
            .absorb(descriptor);
    }
    merged
}

/// Pick the concrete descriptor a specifier binds to.
pub fn bind<'a>(
    specifier: &MetricSpecifier,
    descriptors: &'a [MetricDescriptor],
) -> Option<&'a MetricDescriptor> {
    let mut contributors = descriptors.iter().filter(|d| specifier.matches(d));
    let first = contributors.next()?;
    if first.source.origin == SourceOrigin::Builtin {
        return Some(first);
    }
    Some(
        contributors
            .find(|d| d.source.origin == SourceOrigin::Builtin)
            .unwrap_or(first),
    )
}

// ── Cache ───────────────────────────────────────────────────────────

/// A derived snapshot of the registry: descriptors and their merge.
#[derive(Debug, Default)]
pub struct SpecifierSnapshot {
    pub descriptors: Vec<MetricDescriptor>,
    pub specifiers: HashMap<MetricSpecifier, MergedHints>,
}

/// Cached merge, refreshed by the debounced invalidator rather than on
/// every lookup.
pub struct SpecifierCache {
    registry: Arc<SourceRegistry>,
    current: RwLock<Arc<SpecifierSnapshot>>,
}

impl SpecifierCache {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        let cache = Self {
            registry,
            current: RwLock::new(Arc::new(SpecifierSnapshot::default())),
        };
        cache.refresh();
        cache
    }

    /// Re-enumerate the registry and replace the snapshot.
    pub fn refresh(&self) -> Arc<SpecifierSnapshot> {
        let descriptors = self.registry.enumerate();
        let specifiers = merge(&descriptors);
        debug!(
            descriptors = descriptors.len(),
            specifiers = specifiers.len(),
            "Refreshed metric specifiers"
        );
        let snapshot = Arc::new(SpecifierSnapshot { descriptors, specifiers });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> Arc<SpecifierSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn hints(&self, specifier: &MetricSpecifier) -> Option<MergedHints> {
        self.snapshot().specifiers.get(specifier).cloned()
    }

    /// Every current descriptor contributing to `specifier`.
    pub fn contributors(&self, specifier: &MetricSpecifier) -> Vec<MetricDescriptor> {
        self.snapshot()
            .descriptors
            .iter()
            .filter(|d| specifier.matches(d))
            .cloned()
            .collect()
    }

    pub fn bind(&self, specifier: &MetricSpecifier) -> Option<MetricDescriptor> {
        bind(specifier, &self.snapshot().descriptors).cloned()
    }

    /// Names of the sources currently providing `specifier`.
    pub fn current_sources(&self, specifier: &MetricSpecifier) -> Vec<String> {
        self.contributors(specifier)
            .iter()
            .map(|d| d.source.name.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricSpec, SourceId, SourceRef};

    fn descriptor(source: u64, origin: SourceOrigin, spec: MetricSpec) -> MetricDescriptor {
        MetricDescriptor::bind(
            spec,
            SourceRef {
                id: SourceId(source),
                name: Arc::from(format!("src-{}", source)),
                origin,
            },
        )
    }

    fn temperature() -> MetricSpec {
        MetricSpec::poll("Temperature", MetricType::DOUBLE).in_group("Sensors")
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = descriptor(1, SourceOrigin::Builtin, temperature().with_default_poll_rate(60));
        let b = descriptor(
            2,
            SourceOrigin::Builtin,
            temperature()
                .with_kind(MetricKind::PUSH)
                .with_default_poll_rate(5)
                .enabled_by_default(),
        );
        let c = descriptor(3, SourceOrigin::Builtin, MetricSpec::poll("Mode", MetricType::STRING));

        let forward = merge(&[a.clone(), b.clone(), c.clone()]);
        let backward = merge(&[c, b, a]);
        assert_eq!(forward, backward);

        let spec = MetricSpecifier::new("Temperature", Some("Sensors".into()), MetricType::DOUBLE);
        let hints = &forward[&spec];
        assert_eq!(hints.kind, MetricKind::PUSH_POLL);
        assert!(hints.default_enabled);
        assert_eq!(hints.default_poll_rates, vec![5, 60]);
        assert_eq!(hints.default_poll_rate(), Some(5));
    }

    #[test]
    fn test_nullable_merges_to_same_specifier() {
        let plain = descriptor(1, SourceOrigin::Builtin, temperature());
        let nullable = descriptor(
            2,
            SourceOrigin::Builtin,
            MetricSpec::poll("Temperature", MetricType::DOUBLE.nullable()).in_group("Sensors"),
        );
        assert_eq!(MetricSpecifier::of(&plain), MetricSpecifier::of(&nullable));
        assert_eq!(merge(&[plain, nullable]).len(), 1);
    }

    #[test]
    fn test_merge_is_monotonic() {
        let base = descriptor(1, SourceOrigin::Builtin, temperature().enabled_by_default());
        let extra = descriptor(2, SourceOrigin::Builtin, temperature());
        let spec = MetricSpecifier::of(&base);

        let before = merge(&[base.clone()])[&spec].clone();
        let after = merge(&[base, extra])[&spec].clone();
        assert!(after.kind.contains(before.kind));
        assert!(after.default_enabled);
    }

    #[test]
    fn test_ungrouped_metrics_merge_across_sources() {
        // Without an explicit group the effective groups differ (source names)
        // but the specifier only looks at the declared group.
        let a = descriptor(1, SourceOrigin::Builtin, MetricSpec::poll("Voltage", MetricType::DOUBLE));
        let b = descriptor(2, SourceOrigin::Builtin, MetricSpec::poll("Voltage", MetricType::DOUBLE));
        assert_ne!(a.group, b.group);
        assert_eq!(merge(&[a, b]).len(), 1);
    }

    #[test]
    fn test_bind_prefers_builtin_source() {
        let packaged = descriptor(1, SourceOrigin::Package("vendor-drivers".into()), temperature());
        let builtin = descriptor(2, SourceOrigin::Builtin, temperature());
        let all = vec![packaged.clone(), builtin.clone()];
        let spec = MetricSpecifier::of(&packaged);
        assert_eq!(bind(&spec, &all), Some(&builtin));

        let only_packaged = vec![packaged.clone()];
        assert_eq!(bind(&spec, &only_packaged), Some(&packaged));
    }

    #[test]
    fn test_specifier_display() {
        let grouped = MetricSpecifier::new("Temperature", Some("Sensors".into()), MetricType::DOUBLE);
        assert_eq!(grouped.to_string(), "Double \\ Sensors \\ Temperature");
        let ungrouped = MetricSpecifier::new("Mode", Some(" ".into()), MetricType::STRING);
        assert_eq!(ungrouped.to_string(), "String \\ Mode");
    }

    #[test]
    fn test_cache_current_sources() {
        use crate::registry::tests::StaticSource;

        let registry = Arc::new(SourceRegistry::new());
        for name in ["Scope B", "Scope A"] {
            registry.register(Arc::new(StaticSource {
                name: name.into(),
                specs: vec![temperature()],
            }));
        }
        let cache = SpecifierCache::new(Arc::clone(&registry));
        let spec = MetricSpecifier::new("Temperature", Some("Sensors".into()), MetricType::DOUBLE);
        assert_eq!(cache.current_sources(&spec), vec!["Scope A", "Scope B"]);
        assert_eq!(cache.contributors(&spec).len(), 2);
        assert_eq!(cache.bind(&spec).unwrap().source.name.as_ref(), "Scope B");
    }
}
