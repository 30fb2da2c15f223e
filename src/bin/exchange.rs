// src/bin/exchange.rs
//
// Exchange-side process: order gateway, matching engine, market data
// publisher, and snapshot synthesizer, each on its own pinned busy-loop
// thread, chained by SPSC rings.

use log::{error, info};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tickmatch::config::VenueConfig;
use tickmatch::engine::MatchingEngine;
use tickmatch::gateway::OrderGateway;
use tickmatch::publisher::{MarketDataPublisher, McastTx, SnapshotSynthesizer};
use tickmatch::spsc::SpscRing;
use tickmatch::util::{pin_to_core_if_set, StopFlag};
use tickmatch::{mcast, metrics};

fn main() -> anyhow::Result<()> {
    let cfg_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load config before the logger so the JSON formatting choice applies.
    let cfg = VenueConfig::from_file(&cfg_path)?;
    init_logger(cfg.general.json_logs);
    info!("loaded config: {cfg:?}");

    let stop = Arc::new(StopFlag::default());
    {
        let s = stop.clone();
        ctrlc::set_handler(move || s.raise())?;
    }

    let metrics_handle = cfg.metrics.as_ref().map(|m| metrics::spawn_http(m.bind.clone()));

    let requests = Arc::new(SpscRing::new(cfg.general.request_ring_capacity));
    let responses = Arc::new(SpscRing::new(cfg.general.response_ring_capacity));
    let updates = Arc::new(SpscRing::new(cfg.general.update_ring_capacity));
    let snapshot_tee = Arc::new(SpscRing::new(cfg.general.update_ring_capacity));

    let listen = SocketAddrV4::new(cfg.order_server.listen_addr, cfg.order_server.port);
    let mut gateway = OrderGateway::new(listen, cfg.general.max_clients, requests.clone(), responses.clone())?;
    info!("order server listening on {listen}");

    let mut engine = MatchingEngine::new(
        cfg.general.max_tickers,
        cfg.general.max_orders_per_ticker,
        cfg.general.max_price_levels,
        requests,
        responses,
        updates.clone(),
    );

    let inc_sock = mcast::publisher(
        cfg.market_data.iface_addr,
        cfg.market_data.incremental_group,
        cfg.market_data.incremental_port,
    )?;
    let mut publisher = MarketDataPublisher::new(updates, snapshot_tee.clone(), McastTx::new(inc_sock));

    let snap_sock = mcast::publisher(
        cfg.market_data.iface_addr,
        cfg.market_data.snapshot_group,
        cfg.market_data.snapshot_port,
    )?;
    let mut synthesizer = SnapshotSynthesizer::new(
        snapshot_tee,
        McastTx::new(snap_sock),
        cfg.general.max_tickers,
        cfg.market_data.snapshot_interval_secs,
    );

    let spin = cfg.general.spin_loops_per_yield;

    let t_gateway = {
        let stop = stop.clone();
        let core = cfg.cpu.gateway_core;
        thread::Builder::new().name("gateway".into()).spawn(move || {
            pin_to_core_if_set(core);
            gateway.run(&stop, spin);
        })?
    };
    let t_engine = {
        let stop = stop.clone();
        let core = cfg.cpu.engine_core;
        thread::Builder::new().name("engine".into()).spawn(move || {
            pin_to_core_if_set(core);
            engine.run(&stop, spin);
        })?
    };
    let t_publisher = {
        let stop = stop.clone();
        let core = cfg.cpu.publisher_core;
        thread::Builder::new().name("mdp".into()).spawn(move || {
            pin_to_core_if_set(core);
            publisher.run(&stop, spin);
        })?
    };
    let t_synthesizer = {
        let stop = stop.clone();
        let core = cfg.cpu.synthesizer_core;
        thread::Builder::new().name("snapshot".into()).spawn(move || {
            pin_to_core_if_set(core);
            synthesizer.run(&stop, spin);
        })?
    };

    // Join; log panics explicitly to aid diagnosis in production.
    for (name, handle) in [
        ("gateway", t_gateway),
        ("engine", t_engine),
        ("mdp", t_publisher),
        ("snapshot", t_synthesizer),
    ] {
        if handle.join().is_err() {
            error!("{name} thread panicked");
        }
    }
    if let Some(m) = &cfg.metrics {
        metrics::request_http_shutdown(&m.bind);
    }
    if let Some(h) = metrics_handle {
        let _ = h.join();
    }
    info!("clean shutdown");
    Ok(())
}

fn init_logger(json_logs: bool) {
    if json_logs {
        let mut b = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        b.format(|buf, record| {
            use std::io::Write;
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                ts,
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        })
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}
