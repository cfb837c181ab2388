use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref NOTIFICATIONS_DELIVERED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "snapwatch_notifications_delivered_total",
            "Change notifications delivered to listeners"
        ),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref LISTENER_FAULTS: IntCounter = IntCounter::new(
        "snapwatch_listener_faults_total",
        "Listener bodies that returned an error or panicked"
    )
    .expect("metric can not be created");

    pub static ref STALE_VERSION_SKIPS: IntCounter = IntCounter::new(
        "snapwatch_stale_version_skips_total",
        "Observables skipped for one cycle because their baseline was no longer retained"
    )
    .expect("metric can not be created");

    pub static ref WATCHER_CYCLES: IntCounter = IntCounter::new(
        "snapwatch_watcher_cycles_total",
        "Watcher wake-ups that advanced the read snapshot"
    )
    .expect("metric can not be created");

    pub static ref ASYNC_TASKS: IntCounterVec = IntCounterVec::new(
        Opts::new("snapwatch_async_tasks_total", "Async write tasks by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

fn register_custom_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(NOTIFICATIONS_DELIVERED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(LISTENER_FAULTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(STALE_VERSION_SKIPS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(WATCHER_CYCLES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ASYNC_TASKS.clone()))
            .expect("collector can be registered");
    });
}

/// Renders the crate's metrics in the Prometheus text exposition format
pub fn gather_text() -> String {
    register_custom_metrics();

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
        return String::default();
    }

    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            warn!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
