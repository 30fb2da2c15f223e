// src/bin/trader.rs
//
// Co-located client-side process: runs the market data consumer and drains
// its in-order downstream feed. Trading logic sits behind that feed and is
// out of scope here; this binary just accounts for and logs the stream.

use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tickmatch::config::VenueConfig;
use tickmatch::consumer::MarketDataConsumer;
use tickmatch::spsc::SpscRing;
use tickmatch::types::MarketUpdate;
use tickmatch::util::{now_nanos, pin_to_core_if_set, spin_wait, StopFlag};

const REPORT_INTERVAL_NS: u64 = 5_000_000_000;

fn main() -> anyhow::Result<()> {
    let cfg_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let cfg = VenueConfig::from_file(&cfg_path)?;
    init_logger(cfg.general.json_logs);

    let stop = Arc::new(StopFlag::default());
    {
        let s = stop.clone();
        ctrlc::set_handler(move || s.raise())?;
    }

    let downstream: Arc<SpscRing<MarketUpdate>> = Arc::new(SpscRing::new(cfg.general.update_ring_capacity));
    let mut consumer = MarketDataConsumer::new(&cfg.market_data, downstream.clone())?;

    let spin = cfg.general.spin_loops_per_yield;
    let t_consumer = {
        let stop = stop.clone();
        let core = cfg.cpu.consumer_core;
        thread::Builder::new().name("mdc".into()).spawn(move || {
            pin_to_core_if_set(core);
            consumer.run(&stop, spin);
        })?
    };

    let mut received: u64 = 0;
    let mut last_report = now_nanos();
    while !stop.is_raised() {
        let mut moved = false;
        while let Some(update) = downstream.pop() {
            received += 1;
            moved = true;
            log::debug!("md update: {update:?}");
        }
        let now = now_nanos();
        if now.saturating_sub(last_report) >= REPORT_INTERVAL_NS {
            info!("market data feed: {received} updates received");
            last_report = now;
        }
        if !moved {
            spin_wait(spin);
        }
    }

    if t_consumer.join().is_err() {
        error!("mdc thread panicked");
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
