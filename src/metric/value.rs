//! Typed metric values as delivered to consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::descriptor::MetricDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetricValue {
    Double(f64),
    Boolean(bool),
    String(String),
}

impl MetricValue {
    /// Dispatch a raw source reading by its runtime type. Numbers (integer
    /// or floating point) become `Double`; null, arrays and objects are not
    /// supported and yield `None`.
    pub fn from_raw(raw: &serde_json::Value) -> Option<Self> {
        match raw {
            serde_json::Value::Number(n) => n.as_f64().map(Self::Double),
            serde_json::Value::Bool(b) => Some(Self::Boolean(*b)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Double(v as f64)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double(v) => write!(f, "{}", v),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// A value of one metric at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub descriptor: MetricDescriptor,
    pub value: MetricValue,
    pub time: DateTime<Utc>,
}

impl Metric {
    pub fn new(descriptor: MetricDescriptor, value: MetricValue) -> Self {
        Self {
            descriptor,
            value,
            time: Utc::now(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at {}",
            self.descriptor.full_name(),
            self.value,
            self.time.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_dispatch() {
        assert_eq!(MetricValue::from_raw(&json!(2.5)), Some(MetricValue::Double(2.5)));
        assert_eq!(MetricValue::from_raw(&json!(7)), Some(MetricValue::Double(7.0)));
        assert_eq!(MetricValue::from_raw(&json!(true)), Some(MetricValue::Boolean(true)));
        assert_eq!(
            MetricValue::from_raw(&json!("idle")),
            Some(MetricValue::String("idle".into()))
        );
    }

    #[test]
    fn test_from_raw_unsupported() {
        assert_eq!(MetricValue::from_raw(&json!(null)), None);
        assert_eq!(MetricValue::from_raw(&json!([1, 2])), None);
        assert_eq!(MetricValue::from_raw(&json!({"a": 1})), None);
    }

    #[test]
    fn test_integer_conversion() {
        assert_eq!(MetricValue::from(3i32), MetricValue::Double(3.0));
        assert_eq!(MetricValue::from(-4i64).as_f64(), Some(-4.0));
    }
}
