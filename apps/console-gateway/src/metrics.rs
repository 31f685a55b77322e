use console_bridge::metrics::REGISTRY;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "console_gateway_requests_total",
            "gateway requests by route and status",
        ),
        &["route", "status"],
    )
    .expect("request counter");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn record_request(route: &str, status: u16) {
    HTTP_REQUESTS
        .with_label_values(&[route, &status.to_string()])
        .inc();
}

/// Text exposition of the bridge and gateway metrics.
pub fn gather() -> String {
    Lazy::force(&HTTP_REQUESTS);
    console_bridge::metrics::gather_text()
}
