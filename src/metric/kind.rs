//! Push/poll semantics and value types of a metric.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

// ── Metric Kind ─────────────────────────────────────────────────────

/// Bit-set of the delivery semantics a metric supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKind(u8);

impl MetricKind {
    pub const NONE: Self = Self(0);
    /// The metric can be polled.
    pub const POLL: Self = Self(1);
    /// The metric can be pushed out of band.
    pub const PUSH: Self = Self(2);
    pub const PUSH_POLL: Self = Self(1 | 2);

    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if every flag of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn can_poll(self) -> bool {
        self.contains(Self::POLL)
    }

    pub fn can_push(self) -> bool {
        self.contains(Self::PUSH)
    }
}

impl BitOr for MetricKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MetricKind {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.can_push(), self.can_poll()) {
            (true, true) => "Push & Poll",
            (true, false) => "Push",
            (false, true) => "Poll",
            (false, false) => "None",
        };
        f.write_str(label)
    }
}

// ── Value Type ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Unknown,
    Double,
    Boolean,
    String,
}

/// Declared value type of a metric, with the nullable modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricType {
    pub kind: ValueKind,
    #[serde(default)]
    pub nullable: bool,
}

impl MetricType {
    pub const UNKNOWN: Self = Self::of(ValueKind::Unknown);
    pub const DOUBLE: Self = Self::of(ValueKind::Double);
    pub const BOOLEAN: Self = Self::of(ValueKind::Boolean);
    pub const STRING: Self = Self::of(ValueKind::String);

    const fn of(kind: ValueKind) -> Self {
        Self { kind, nullable: false }
    }

    pub fn nullable(self) -> Self {
        Self { nullable: true, ..self }
    }

    /// The type used for identity purposes; nullability does not count.
    pub fn without_nullable(self) -> Self {
        Self { nullable: false, ..self }
    }

    /// Double, Boolean and String (nullable or not) are supported.
    pub fn is_supported(self) -> bool {
        self.kind != ValueKind::Unknown
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            ValueKind::Unknown => "Unknown",
            ValueKind::Double => "Double",
            ValueKind::Boolean => "Boolean",
            ValueKind::String => "String",
        };
        if self.nullable {
            write!(f, "{} (nullable)", name)
        } else {
            f.write_str(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_flags() {
        assert!(MetricKind::PUSH_POLL.can_poll());
        assert!(MetricKind::PUSH_POLL.can_push());
        assert!(MetricKind::POLL.can_poll());
        assert!(!MetricKind::POLL.can_push());
        assert!(!MetricKind::NONE.contains(MetricKind::NONE));
        assert_eq!(MetricKind::POLL | MetricKind::PUSH, MetricKind::PUSH_POLL);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MetricKind::PUSH_POLL.to_string(), "Push & Poll");
        assert_eq!(MetricKind::POLL.to_string(), "Poll");
    }

    #[test]
    fn test_nullable_identity() {
        let t = MetricType::DOUBLE.nullable();
        assert!(t.nullable);
        assert_eq!(t.without_nullable(), MetricType::DOUBLE);
        assert!(t.is_supported());
        assert!(!MetricType::UNKNOWN.is_supported());
        assert!(!MetricType::UNKNOWN.nullable().is_supported());
    }
}
