// src/config.rs
use serde::Deserialize;
use std::{fs, net::Ipv4Addr, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub general: General,
    pub order_server: OrderServer,
    pub market_data: MarketData,
    #[serde(default)]
    pub cpu: Cpu,
    pub metrics: Option<Metrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub max_tickers: usize,             // e.g., 8
    pub max_clients: usize,             // e.g., 256
    pub max_orders_per_ticker: usize,   // order pool capacity, e.g., 1048576
    pub max_price_levels: usize,        // level pool capacity, e.g., 256
    pub request_ring_capacity: usize,   // sequencer -> engine
    pub response_ring_capacity: usize,  // engine -> gateway
    pub update_ring_capacity: usize,    // engine -> publisher, publisher -> synthesizer, consumer -> downstream
    pub spin_loops_per_yield: u32,      // e.g., 64
    #[serde(default)]
    pub json_logs: bool,                // structured JSON logs to stdout
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderServer {
    pub listen_addr: Ipv4Addr,          // e.g., 0.0.0.0
    pub port: u16,                      // e.g., 12345
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketData {
    pub iface_addr: Ipv4Addr,           // local IPv4 of the NIC to join/publish on
    pub incremental_group: Ipv4Addr,    // e.g., 239.50.10.1
    pub incremental_port: u16,
    pub snapshot_group: Ipv4Addr,       // e.g., 239.50.10.2
    pub snapshot_port: u16,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    pub recv_buffer_bytes: u32,         // e.g., 64<<20 on subscriber sockets
}

fn default_snapshot_interval_secs() -> u64 { 60 }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cpu {
    pub gateway_core: Option<usize>,
    pub engine_core: Option<usize>,
    pub publisher_core: Option<usize>,
    pub synthesizer_core: Option<usize>,
    pub consumer_core: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    /// Bind address for the Prometheus exporter (e.g. "0.0.0.0:9100")
    pub bind: String,
}

impl VenueConfig {
    pub fn from_file(p: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(p)?;
        let cfg: VenueConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.market_data.incremental_group.is_multicast()
            || !self.market_data.snapshot_group.is_multicast()
        {
            anyhow::bail!("market_data groups must be multicast IPv4 addresses");
        }
        if self.general.max_tickers == 0 || self.general.max_clients == 0 {
            anyhow::bail!("general.max_tickers and general.max_clients must be > 0");
        }
        if self.general.max_orders_per_ticker == 0 || self.general.max_price_levels == 0 {
            anyhow::bail!("book pool capacities must be > 0");
        }
        if self.general.request_ring_capacity == 0
            || self.general.response_ring_capacity == 0
            || self.general.update_ring_capacity == 0
        {
            anyhow::bail!("ring capacities must be > 0");
        }
        if self.market_data.snapshot_interval_secs == 0 {
            anyhow::bail!("market_data.snapshot_interval_secs must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        r#"
            [general]
            max_tickers = 8
            max_clients = 256
            max_orders_per_ticker = 1048576
            max_price_levels = 256
            request_ring_capacity = 262144
            response_ring_capacity = 262144
            update_ring_capacity = 262144
            spin_loops_per_yield = 64

            [order_server]
            listen_addr = "0.0.0.0"
            port = 12345

            [market_data]
            iface_addr = "127.0.0.1"
            incremental_group = "239.50.10.1"
            incremental_port = 20000
            snapshot_group = "239.50.10.2"
            snapshot_port = 20001
            recv_buffer_bytes = 4194304
        "#
        .to_string()
    }

    #[test]
    fn parses_and_defaults() {
        let cfg: VenueConfig = toml::from_str(&sample()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.market_data.snapshot_interval_secs, 60);
        assert!(!cfg.general.json_logs);
        assert!(cfg.cpu.engine_core.is_none());
    }

    #[test]
    fn rejects_unicast_group() {
        let bad = sample().replace("239.50.10.1", "10.0.0.1");
        let cfg: VenueConfig = toml::from_str(&bad).unwrap();
        assert!(cfg.validate().is_err());
    }
}
