use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_RECEIVED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "monitor_readings_received_total",
            "Total readings received, by ingest source"
        ),
        &["source"]
    )
    .unwrap();
    pub static ref READINGS_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_readings_stored_total",
        "Total readings written to the database"
    ))
    .unwrap();
    pub static ref INVALID_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_invalid_readings_total",
        "Total readings rejected by validation or parsing"
    ))
    .unwrap();
    pub static ref ALERTS_RAISED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_alerts_raised_total", "Total alerts raised, by type"),
        &["alert_type"]
    )
    .unwrap();
    pub static ref DEVICES_MARKED_OFFLINE_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_devices_marked_offline_total",
        "Total devices marked offline by the sweep"
    ))
    .unwrap();
    pub static ref SWEEP_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_sweep_duration_seconds",
            "Time taken by one offline sweep"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    )
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_db_failures_total",
        "Total transient database failures"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_ingest_latency_seconds",
            "Time taken to ingest a reading batch into the DB"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "monitor_batch_size",
        "Current batch size being processed"
    ))
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_channel_full_total",
        "Total number of times the ingest channel was full"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(READINGS_RECEIVED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(READINGS_STORED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INVALID_READINGS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ALERTS_RAISED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DEVICES_MARKED_OFFLINE_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SWEEP_DURATION_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DB_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
    REGISTRY.register(Box::new(BATCH_SIZE.clone())).unwrap();
    REGISTRY
        .register(Box::new(CHANNEL_FULL_TOTAL.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
