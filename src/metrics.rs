// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::ToSocketAddrs;
use std::thread;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static GATEWAY_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("gateway_requests", "Client requests accepted by the order gateway")
        .expect("gateway_requests");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static GATEWAY_DROPS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("gateway_drops", "Client requests dropped by the order gateway"),
        &["reason"],
    )
    .expect("gateway_drops");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_REQUESTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("engine_requests", "Requests dispatched by the matching engine")
        .expect("engine_requests");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ENGINE_TRADES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("engine_trades", "Trade events produced by matching").expect("engine_trades");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MDP_INCREMENTAL_FRAMES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "mdp_incremental_frames",
        "Frames published on the incremental multicast stream",
    )
    .expect("mdp_incremental_frames");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MDP_SNAPSHOT_ROUNDS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("mdp_snapshot_rounds", "Snapshot rounds published").expect("mdp_snapshot_rounds");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MDC_GAPS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("mdc_gaps", "Incremental stream gaps detected by the consumer")
        .expect("mdc_gaps");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MDC_RECOVERIES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("mdc_recoveries", "Snapshot recoveries completed by the consumer")
        .expect("mdc_recoveries");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static MDC_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("mdc_published", "Updates delivered downstream by the consumer")
        .expect("mdc_published");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn inc_gateway_requests() { GATEWAY_REQUESTS.inc(); }
pub fn inc_gateway_drop(reason: &str) { GATEWAY_DROPS.with_label_values(&[reason]).inc(); }
pub fn inc_engine_requests() { ENGINE_REQUESTS.inc(); }
pub fn inc_engine_trades() { ENGINE_TRADES.inc(); }
pub fn inc_mdp_incremental() { MDP_INCREMENTAL_FRAMES.inc(); }
pub fn inc_mdp_snapshot_round() { MDP_SNAPSHOT_ROUNDS.inc(); }
pub fn inc_mdc_gap() { MDC_GAPS.inc(); }
pub fn inc_mdc_recovery() { MDC_RECOVERIES.inc(); }
pub fn inc_mdc_published(n: u64) { MDC_PUBLISHED.inc_by(n); }

pub fn spawn_http<A: ToSocketAddrs + Send + 'static>(addr: A) -> thread::JoinHandle<()> {
    let bind = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .map_or_else(|| "0.0.0.0:9100".to_string(), |a| a.to_string());
    thread::spawn(move || serve(&bind))
}

/// Routes: /metrics (Prometheus text format), /healthz and /live (liveness),
/// /shutdown (ends the exporter thread). Everything else is 404.
fn serve(bind: &str) {
    let server = match tiny_http::Server::http(bind) {
        Ok(s) => s,
        Err(e) => {
            log::error!("metrics exporter could not bind {bind}: {e}");
            return;
        }
    };
    log::info!("metrics exporter serving http://{bind}/metrics");
    while let Ok(request) = server.recv() {
        let url = request.url().to_string();
        match url.as_str() {
            "/metrics" => {
                let _ = request.respond(render_metrics());
            }
            "/healthz" | "/live" => {
                let _ = request.respond(tiny_http::Response::from_string("ok"));
            }
            "/shutdown" => {
                let _ = request.respond(tiny_http::Response::from_string("shutting down"));
                return;
            }
            _ => {
                let _ = request.respond(tiny_http::Response::empty(404));
            }
        }
    }
}

fn render_metrics() -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let encoder = TextEncoder::new();
    let mut body = Vec::with_capacity(8 * 1024);
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut body) {
        log::error!("metrics encode failed: {e}");
    }
    let content_type =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], encoder.format_type().as_bytes())
            .expect("static header");
    tiny_http::Response::from_data(body).with_header(content_type)
}

/// Ask a running exporter to exit by hitting its /shutdown route.
pub fn request_http_shutdown(addr: &str) {
    use std::io::Write;
    let Ok(mut conn) = std::net::TcpStream::connect(addr) else { return };
    let _ = conn.write_all(b"GET /shutdown HTTP/1.1\r\nHost: metrics\r\nConnection: close\r\n\r\n");
}
