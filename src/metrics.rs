// ===============================
// src/metrics.rs
// ===============================
use std::{convert::Infallible, net::SocketAddr};

use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Cart --------
pub static CART_MUTATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cart_mutations_total", "persisted cart mutations (label: op)"),
        &["op"],
    )
    .expect("valid metric")
});

pub static CART_ITEMS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("cart_items", "units currently in the cart").expect("valid metric"));

pub static CART_SUBTOTAL: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("cart_subtotal", "cart subtotal in store currency").expect("valid metric")
});

// -------- Shipping --------
pub static SHIPPING_CONFIG_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "shipping_config_lookups_total",
            "shipping config lookups (label: source = remote|cached|fallback)",
        ),
        &["source"],
    )
    .expect("valid metric")
});

// -------- Checkout & orders --------
pub static CHECKOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("checkouts_total", "checkout attempts (labels: flow, outcome)"),
        &["flow", "outcome"],
    )
    .expect("valid metric")
});

pub static ORDER_POLLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_polls_total", "order status fetches (label: result)"),
        &["result"],
    )
    .expect("valid metric")
});

// -------- Backend API --------
pub static API_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("api_requests_total", "backend requests (labels: endpoint, status)"),
        &["endpoint", "status"],
    )
    .expect("valid metric")
});

pub static API_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("api_latency_ms", "backend round trip (ms)")
            .buckets(vec![25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
        &["endpoint"],
    )
    .expect("valid metric")
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(CART_MUTATIONS.clone())),
        REGISTRY.register(Box::new(CART_ITEMS.clone())),
        REGISTRY.register(Box::new(CART_SUBTOTAL.clone())),
        REGISTRY.register(Box::new(SHIPPING_CONFIG_LOOKUPS.clone())),
        REGISTRY.register(Box::new(CHECKOUTS.clone())),
        REGISTRY.register(Box::new(ORDER_POLLS.clone())),
        REGISTRY.register(Box::new(API_REQUESTS.clone())),
        REGISTRY.register(Box::new(API_LATENCY_MS.clone())),
    ] {
        if let Err(e) = m {
            tracing::debug!(%e, "metric already registered");
        }
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let mut rsp = Response::new(Body::from(encode_metrics()));
    rsp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    Ok(rsp)
}

/// Serve every path with the Prometheus text exposition.
pub async fn serve_metrics(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(%e, %addr, "metrics bind failed");
            return;
        }
    };
    info!(%addr, "metrics listening on /metrics");
    if let Err(e) = server.await {
        error!(%e, "metrics server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_families() {
        init();
        CHECKOUTS.with_label_values(&["gateway", "created"]).inc();

        let text = String::from_utf8(encode_metrics()).expect("utf8");

        assert!(text.contains("checkouts_total"), "got: {text}");
    }
}
