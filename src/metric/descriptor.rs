//! Metric declarations and their live, source-bound descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::kind::{MetricKind, MetricType};

// ── Sources ─────────────────────────────────────────────────────────

/// Registry-assigned identity of a metric source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Where a source's implementation comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// Compiled into the host.
    #[default]
    Builtin,
    /// Supplied by a loaded external plugin package.
    Package(String),
}

/// Opaque owner reference carried by every descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub id: SourceId,
    pub name: Arc<str>,
    pub origin: SourceOrigin,
}

// ── Declarations ────────────────────────────────────────────────────

/// A metric as declared by a source, before it is bound to the source
/// instance by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    /// Explicit group. When absent the owning source's name is used.
    #[serde(default)]
    pub group: Option<String>,
    pub kind: MetricKind,
    pub value_type: MetricType,
    /// Suggested poll rate in seconds; 0 means unspecified.
    #[serde(default)]
    pub default_poll_rate: u32,
    #[serde(default)]
    pub default_enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, kind: MetricKind, value_type: MetricType) -> Self {
        Self {
            name: name.into(),
            group: None,
            kind,
            value_type,
            default_poll_rate: 0,
            default_enabled: false,
            description: None,
        }
    }

    pub fn poll(name: impl Into<String>, value_type: MetricType) -> Self {
        Self::new(name, MetricKind::POLL, value_type)
    }

    pub fn push(name: impl Into<String>, value_type: MetricType) -> Self {
        Self::new(name, MetricKind::PUSH, value_type)
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_default_poll_rate(mut self, seconds: u32) -> Self {
        self.default_poll_rate = seconds;
        self
    }

    pub fn enabled_by_default(mut self) -> Self {
        self.default_enabled = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ── Descriptor ──────────────────────────────────────────────────────

/// One metric on one source instance.
///
/// Equality and hashing use the owning source, the effective group and the
/// name. Two descriptors that agree on those are the same live metric, no
/// matter what their hints or availability say.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    /// Effective group: the declared group, or the source name.
    pub group: String,
    /// Group as declared by the source, blank groups normalised to `None`.
    pub declared_group: Option<String>,
    pub kind: MetricKind,
    pub value_type: MetricType,
    pub default_poll_rate: u32,
    pub default_enabled: bool,
    pub description: Option<String>,
    pub source: SourceRef,
    pub available: bool,
}

impl MetricDescriptor {
    pub fn bind(spec: MetricSpec, source: SourceRef) -> Self {
        let declared_group = spec.group.filter(|g| !g.trim().is_empty());
        let group = declared_group
            .clone()
            .unwrap_or_else(|| source.name.to_string());
        Self {
            name: spec.name,
            group,
            declared_group,
            kind: spec.kind,
            value_type: spec.value_type,
            default_poll_rate: spec.default_poll_rate,
            default_enabled: spec.default_enabled,
            description: spec.description,
            source,
            available: true,
        }
    }

    /// `"{group} \ {name}"`
    pub fn full_name(&self) -> String {
        format!("{} \\ {}", self.group, self.name)
    }

    pub fn source_id(&self) -> SourceId {
        self.source.id
    }
}

impl PartialEq for MetricDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.source.id == other.source.id && self.group == other.group && self.name == other.name
    }
}

impl Eq for MetricDescriptor {}

impl Hash for MetricDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.id.hash(state);
        self.group.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metric: {}", self.full_name())
    }
}
