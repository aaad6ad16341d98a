use std::sync::{Arc, Mutex};
use std::time::Duration;

use benchwatch::metric::SourceOrigin;
use benchwatch::{
    Metric, MetricDescriptor, MetricKind, MetricListener, MetricSettings, MetricSettingsItem,
    MetricSink, MetricSource, MetricSpec, MetricSpecifier, MetricType, MetricValue, MetricsContext,
    MetricsError,
};

struct Psu {
    name: &'static str,
    origin: SourceOrigin,
    volts: f64,
}

impl MetricSource for Psu {
    fn name(&self) -> &str {
        self.name
    }

    fn origin(&self) -> SourceOrigin {
        self.origin.clone()
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![
            MetricSpec::poll("Voltage", MetricType::DOUBLE)
                .in_group("Power")
                .with_default_poll_rate(60),
            MetricSpec::push("Overcurrent", MetricType::BOOLEAN).in_group("Power"),
            MetricSpec::push("Fault Code", MetricType::STRING).in_group("Power"),
        ]
    }

    fn value(&self, _metric: &MetricDescriptor) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!(self.volts))
    }
}

/// Two of these on one bench share every specifier.
struct Twin {
    name: &'static str,
    volts: f64,
}

impl MetricSource for Twin {
    fn name(&self) -> &str {
        self.name
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::poll("Voltage", MetricType::DOUBLE)]
    }

    fn value(&self, _metric: &MetricDescriptor) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!(self.volts))
    }
}

#[derive(Default)]
struct Collector {
    pushes: Mutex<Vec<Metric>>,
    batches: Mutex<Vec<Vec<Metric>>>,
}

impl MetricListener for Collector {
    fn name(&self) -> &str {
        "Collector"
    }

    fn on_push(&self, metric: &Metric) -> anyhow::Result<()> {
        self.pushes.lock().unwrap().push(metric.clone());
        Ok(())
    }
}

impl MetricSink for Collector {
    fn name(&self) -> &str {
        "Collector"
    }

    fn on_batch(&self, metrics: &[Metric]) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(metrics.to_vec());
        Ok(())
    }
}

fn context(settings: MetricSettings) -> MetricsContext {
    MetricsContext::new(settings, Duration::from_millis(200), Duration::from_secs(10)).unwrap()
}

fn find(ctx: &MetricsContext, source: &str, name: &str) -> MetricDescriptor {
    ctx.registry
        .enumerate()
        .into_iter()
        .find(|m| m.source.name.as_ref() == source && m.name == name)
        .unwrap()
}

fn voltage() -> MetricSpecifier {
    MetricSpecifier::new("Voltage", Some("Power".into()), MetricType::DOUBLE)
}

#[tokio::test]
async fn test_push_only_reaches_subscribers_of_that_metric() {
    let ctx = context(MetricSettings::default());
    ctx.registry.register(Arc::new(Psu {
        name: "PSU",
        origin: SourceOrigin::Builtin,
        volts: 12.0,
    }));
    let a = find(&ctx, "PSU", "Overcurrent");
    let b = find(&ctx, "PSU", "Fault Code");

    let collector = Arc::new(Collector::default());
    let id = ctx
        .distributor
        .register_listener(Arc::clone(&collector) as Arc<dyn MetricListener>);
    ctx.distributor.set_interest(id, [a.clone()]);

    assert_eq!(ctx.distributor.push(&b, "E42"), 0);
    assert_eq!(ctx.distributor.push(&a, true), 1);

    let pushes = collector.pushes.lock().unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].descriptor, a);
    assert_eq!(pushes[0].value, MetricValue::Boolean(true));
}

#[tokio::test]
async fn test_poll_schedule_follows_epoch_seconds() {
    let settings = MetricSettings::default();
    settings
        .add(MetricSettingsItem {
            specifier: voltage(),
            poll_rate: 60,
            enabled: true,
        })
        .unwrap();
    let ctx = context(settings);
    ctx.registry.register(Arc::new(Psu {
        name: "PSU",
        origin: SourceOrigin::Builtin,
        volts: 12.0,
    }));
    ctx.refresh_now();

    let sink = Arc::new(Collector::default());
    ctx.distributor
        .register_sink(Arc::clone(&sink) as Arc<dyn MetricSink>);

    assert_eq!(ctx.distributor.run_cycle(120), 1);
    assert_eq!(ctx.distributor.run_cycle(121), 0);

    let batches = sink.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].value, MetricValue::Double(12.0));
}

#[tokio::test]
async fn test_equivalent_sources_merge_and_all_are_polled() {
    let ctx = context(MetricSettings::default());
    ctx.registry.register(Arc::new(Psu {
        name: "Vendor PSU",
        origin: SourceOrigin::Package("vendor-psu".into()),
        volts: 5.0,
    }));
    ctx.registry.register(Arc::new(Psu {
        name: "Bench PSU",
        origin: SourceOrigin::Builtin,
        volts: 3.3,
    }));
    ctx.refresh_now();

    let hints = ctx.cache.hints(&voltage()).unwrap();
    assert_eq!(hints.kind, MetricKind::POLL);
    assert_eq!(hints.default_poll_rates, vec![60]);
    assert_eq!(ctx.cache.current_sources(&voltage()), vec!["Bench PSU", "Vendor PSU"]);

    ctx.settings
        .add(MetricSettingsItem {
            specifier: voltage(),
            poll_rate: 10,
            enabled: true,
        })
        .unwrap();
    assert_eq!(ctx.cache.bind(&voltage()).unwrap().source.name.as_ref(), "Bench PSU");

    let sink = Arc::new(Collector::default());
    ctx.distributor
        .register_sink(Arc::clone(&sink) as Arc<dyn MetricSink>);
    assert_eq!(ctx.distributor.run_cycle(10), 2);

    let batches = sink.batches.lock().unwrap();
    let mut readings: Vec<_> = batches[0]
        .iter()
        .map(|m| (m.descriptor.source.name.to_string(), m.value.clone()))
        .collect();
    readings.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        readings,
        vec![
            ("Bench PSU".to_string(), MetricValue::Double(3.3)),
            ("Vendor PSU".to_string(), MetricValue::Double(5.0)),
        ]
    );
}

#[tokio::test]
async fn test_identical_instruments_both_reach_the_batch() {
    let settings = MetricSettings::default();
    settings
        .add(MetricSettingsItem {
            specifier: MetricSpecifier::new("Voltage", None, MetricType::DOUBLE),
            poll_rate: 5,
            enabled: true,
        })
        .unwrap();
    let ctx = context(settings);
    for (name, volts) in [("PSU1", 12.0), ("PSU2", 24.0)] {
        ctx.registry.register(Arc::new(Twin { name, volts }));
    }
    ctx.refresh_now();

    let sink = Arc::new(Collector::default());
    ctx.distributor
        .register_sink(Arc::clone(&sink) as Arc<dyn MetricSink>);
    assert_eq!(ctx.distributor.run_cycle(10), 2);

    let batches = sink.batches.lock().unwrap();
    let names: Vec<_> = batches[0].iter().map(|m| m.descriptor.full_name()).collect();
    assert_eq!(names, vec!["PSU1 \\ Voltage", "PSU2 \\ Voltage"]);
}

#[tokio::test]
async fn test_availability_is_only_for_pushed_metrics() {
    let ctx = context(MetricSettings::default());
    let id = ctx.registry.register(Arc::new(Psu {
        name: "PSU",
        origin: SourceOrigin::Builtin,
        volts: 12.0,
    }));

    let poll_only = ctx.registry.metric_info(id, "Voltage").unwrap();
    assert!(matches!(
        ctx.distributor.set_availability(&poll_only, false),
        Err(MetricsError::InvalidAvailabilityTarget { .. })
    ));

    let dynamic = ctx
        .registry
        .declare(id, MetricSpec::push("Ripple", MetricType::DOUBLE).in_group("Power"))
        .unwrap();
    ctx.distributor.set_availability(&dynamic, false).unwrap();
    assert!(!ctx.registry.is_available(&dynamic));
    ctx.distributor.push(&dynamic, 0.02);
    assert!(ctx.registry.is_available(&dynamic));
}
