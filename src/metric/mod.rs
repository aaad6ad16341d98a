//! Metric data model and capability traits.

pub mod descriptor;
pub mod kind;
pub mod source;
pub mod value;

pub use descriptor::{MetricDescriptor, MetricSpec, SourceId, SourceOrigin, SourceRef};
pub use kind::{MetricKind, MetricType, ValueKind};
pub use source::{AdditionalMetricsSource, MetricListener, MetricSink, MetricSource, PollNotifiable};
pub use value::{Metric, MetricValue};
