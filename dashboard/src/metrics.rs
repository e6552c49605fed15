use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref FRAMES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_frames_total",
        "Total telemetry frames received over the WebSocket"
    ))
    .unwrap();
    pub static ref MALFORMED_FRAMES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_malformed_frames_total",
        "Total telemetry frames ignored because they could not be decoded"
    ))
    .unwrap();
    pub static ref ALERTS_EMITTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_alerts_emitted_total",
        "Total alert notifications emitted after cooldown"
    ))
    .unwrap();
    pub static ref HISTORY_FALLBACK_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_history_fallback_total",
        "Total history series replaced by placeholder data"
    ))
    .unwrap();
    pub static ref SCHEDULE_PARSE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_schedule_parse_failures_total",
        "Total schedule attribute values that failed to parse"
    ))
    .unwrap();
    pub static ref RPC_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_rpc_failures_total",
        "Total one-way RPC calls that failed"
    ))
    .unwrap();
    pub static ref CONNECTED: IntGauge = IntGauge::with_opts(Opts::new(
        "dashboard_connected",
        "1 while the telemetry subscription is open"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(FRAMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MALFORMED_FRAMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_EMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HISTORY_FALLBACK_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SCHEDULE_PARSE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RPC_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECTED.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
