// src/consumer.rs
//
// Market data consumer: always subscribed to the incremental stream, and to
// the snapshot stream only while recovering. A sequence gap flips the
// consumer into recovery; both streams are then staged by seq until a
// complete snapshot round can be stitched to the tail of the staged
// incrementals, at which point the combined feed is released downstream in
// order and the snapshot group is left.

use crate::config;
use crate::mcast;
use crate::metrics;
use crate::spsc::SpscRing;
use crate::types::*;
use crate::util::{now_nanos, spin_wait, StopFlag};
use crate::wire::{self, MarketDataFrame, MARKET_DATA_FRAME_SIZE};
use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::Arc;
use zerocopy::FromBytes;

const JOIN_RETRY_NS: u64 = 1_000_000_000;

/// Protocol state machine, socket-free so it can be driven directly by tests.
pub struct RecoveryState {
    next_expected_inc_seq: u64,
    in_recovery: bool,
    snapshot_staging: BTreeMap<u64, MarketUpdate>,
    incremental_staging: BTreeMap<u64, MarketUpdate>,
}

impl Default for RecoveryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryState {
    /// A fresh consumer starts in recovery and bootstraps from the next
    /// snapshot round.
    pub fn new() -> Self {
        Self {
            next_expected_inc_seq: 1,
            in_recovery: true,
            snapshot_staging: BTreeMap::new(),
            incremental_staging: BTreeMap::new(),
        }
    }

    pub fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    pub fn on_incremental(&mut self, m: SeqMarketUpdate, out: &SpscRing<MarketUpdate>) {
        if !self.in_recovery && m.seq != self.next_expected_inc_seq {
            log::warn!(
                "incremental gap: expected seq {}, received {}; entering recovery",
                self.next_expected_inc_seq, m.seq
            );
            metrics::inc_mdc_gap();
            self.in_recovery = true;
            self.snapshot_staging.clear();
            self.incremental_staging.clear();
        }
        if self.in_recovery {
            self.incremental_staging.insert(m.seq, m.update);
            self.try_resync(out);
            return;
        }
        self.next_expected_inc_seq += 1;
        push_downstream(out, m.update);
        metrics::inc_mdc_published(1);
    }

    pub fn on_snapshot(&mut self, m: SeqMarketUpdate, out: &SpscRing<MarketUpdate>) {
        if !self.in_recovery {
            log::debug!("snapshot message while not recovering; discarded");
            return;
        }
        if self.snapshot_staging.contains_key(&m.seq) {
            // A repeated round seq means packets of two rounds interleaved;
            // restart staging from this message.
            log::warn!("duplicate snapshot seq {}; discarding torn round", m.seq);
            self.snapshot_staging.clear();
        }
        self.snapshot_staging.insert(m.seq, m.update);
        self.try_resync(out);
    }

    /// Attempt to stitch the staged snapshot round to the staged incremental
    /// tail. Every early return either discards an unusable round or waits
    /// for more data; the walk restarts from scratch on the next message, so
    /// partial progress here carries no state.
    fn try_resync(&mut self, out: &SpscRing<MarketUpdate>) {
        let Some((_, first)) = self.snapshot_staging.iter().next() else {
            return;
        };
        if first.kind != UpdateKind::SnapshotStart {
            self.snapshot_staging.clear();
            return;
        }

        let mut final_events: Vec<MarketUpdate> = Vec::new();
        let mut expected_snapshot_seq: u64 = 0;
        let mut complete = true;
        for (&seq, update) in &self.snapshot_staging {
            if seq != expected_snapshot_seq {
                log::warn!(
                    "gap in snapshot round: expected seq {}, have {}; discarding",
                    expected_snapshot_seq, seq
                );
                complete = false;
                break;
            }
            if update.kind != UpdateKind::SnapshotStart && update.kind != UpdateKind::SnapshotEnd {
                final_events.push(*update);
            }
            expected_snapshot_seq += 1;
        }
        if !complete {
            self.snapshot_staging.clear();
            return;
        }

        let (_, last) = self.snapshot_staging.iter().next_back().expect("non-empty staging");
        if last.kind != UpdateKind::SnapshotEnd {
            // Round still streaming in.
            return;
        }

        // START/END carry the incremental seq the round is synchronized to.
        self.next_expected_inc_seq = last.order_id + 1;
        let snapshot_events = final_events.len();
        for (&seq, update) in &self.incremental_staging {
            if seq < self.next_expected_inc_seq {
                continue;
            }
            if seq != self.next_expected_inc_seq {
                // Staged incrementals do not reach the snapshot yet; keep
                // everything and wait for the missing packets or a newer round.
                return;
            }
            final_events.push(*update);
            self.next_expected_inc_seq += 1;
        }

        let n = final_events.len();
        for event in final_events {
            push_downstream(out, event);
        }
        log::info!(
            "recovered: {} snapshot events + {} incrementals, resuming at seq {}",
            snapshot_events,
            n - snapshot_events,
            self.next_expected_inc_seq
        );
        metrics::inc_mdc_recovery();
        metrics::inc_mdc_published(n as u64);
        self.snapshot_staging.clear();
        self.incremental_staging.clear();
        self.in_recovery = false;
    }
}

fn push_downstream(out: &SpscRing<MarketUpdate>, update: MarketUpdate) {
    if out.push(update).is_err() {
        panic!("downstream update ring overflow");
    }
}

pub struct MarketDataConsumer {
    inc_sock: UdpSocket,
    snap_sock: Option<UdpSocket>,
    md: config::MarketData,
    state: RecoveryState,
    out: Arc<SpscRing<MarketUpdate>>,
    last_join_attempt_ns: u64,
}

impl MarketDataConsumer {
    pub fn new(md: &config::MarketData, out: Arc<SpscRing<MarketUpdate>>) -> anyhow::Result<Self> {
        let inc_sock = mcast::subscriber(
            md.iface_addr,
            md.incremental_group,
            md.incremental_port,
            md.recv_buffer_bytes,
        )?;
        Ok(Self {
            inc_sock,
            snap_sock: None,
            md: md.clone(),
            state: RecoveryState::new(),
            out,
            last_join_attempt_ns: 0,
        })
    }

    pub fn run(&mut self, stop: &StopFlag, spin_loops: u32) {
        log::info!("market data consumer running");
        let mut buf = vec![0u8; 64 * 1024];
        while !stop.is_raised() {
            self.sync_snapshot_membership();

            let mut moved = drain_socket(&self.inc_sock, false, &mut self.state, &self.out, &mut buf);
            if let Some(snap) = &self.snap_sock {
                moved |= drain_socket(snap, true, &mut self.state, &self.out, &mut buf);
            }
            if !moved {
                spin_wait(spin_loops);
            }
        }
    }

    /// Joined to the snapshot group exactly while recovering.
    fn sync_snapshot_membership(&mut self) {
        if self.state.in_recovery && self.snap_sock.is_none() {
            let now = now_nanos();
            if now.saturating_sub(self.last_join_attempt_ns) < JOIN_RETRY_NS {
                return;
            }
            self.last_join_attempt_ns = now;
            match mcast::subscriber(
                self.md.iface_addr,
                self.md.snapshot_group,
                self.md.snapshot_port,
                self.md.recv_buffer_bytes,
            ) {
                Ok(sock) => {
                    log::info!("joined snapshot group {}", self.md.snapshot_group);
                    self.snap_sock = Some(sock);
                }
                Err(e) => log::error!("snapshot group join failed: {e:?}"),
            }
        } else if !self.state.in_recovery {
            if let Some(sock) = self.snap_sock.take() {
                mcast::leave(&sock, self.md.snapshot_group, self.md.iface_addr);
                log::info!("left snapshot group {}", self.md.snapshot_group);
            }
        }
    }
}

fn drain_socket(
    sock: &UdpSocket,
    from_snapshot: bool,
    state: &mut RecoveryState,
    out: &SpscRing<MarketUpdate>,
    buf: &mut [u8],
) -> bool {
    let mut any = false;
    loop {
        match sock.recv(buf) {
            Ok(n) => {
                any = true;
                let mut off = 0usize;
                while off + MARKET_DATA_FRAME_SIZE <= n {
                    let frame = MarketDataFrame::read_from(&buf[off..off + MARKET_DATA_FRAME_SIZE])
                        .expect("sized frame read");
                    off += MARKET_DATA_FRAME_SIZE;
                    let Some(m) = wire::decode_update(&frame) else {
                        panic!("malformed market data frame (type {})", frame.kind);
                    };
                    if from_snapshot {
                        state.on_snapshot(m, out);
                    } else {
                        state.on_incremental(m, out);
                    }
                }
                if off != n {
                    panic!("misaligned market data datagram ({} trailing bytes)", n - off);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                log::warn!("multicast recv error: {e}");
                break;
            }
        }
    }
    any
}
