// src/publisher.rs
//
// Market data publisher pair. The incremental publisher drains the engine's
// update ring, stamps the venue-global sequence number, sends the frame on
// the incremental multicast group, and tees the stamped update to the
// snapshot synthesizer. The synthesizer keeps a shadow copy of every live
// order and periodically serializes the whole book set onto the snapshot
// group, tagged with the incremental seq it is synchronized to.

use crate::metrics;
use crate::spsc::SpscRing;
use crate::types::*;
use crate::util::{now_nanos, spin_wait, StopFlag};
use crate::wire;
use hashbrown::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use zerocopy::AsBytes;

/// Outbound frame seam; multicast in production, a vector in tests.
pub trait FrameTx {
    fn send_frame(&mut self, frame: &[u8]);
}

pub struct McastTx {
    sock: UdpSocket,
}

impl McastTx {
    pub fn new(sock: UdpSocket) -> Self {
        Self { sock }
    }
}

impl FrameTx for McastTx {
    fn send_frame(&mut self, frame: &[u8]) {
        // No backpressure on multicast: a failed send is one lost packet and
        // the snapshot stream is the recovery path.
        if let Err(e) = self.sock.send(frame) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                log::warn!("multicast send failed: {e}");
            }
        }
    }
}

pub struct MarketDataPublisher<T: FrameTx> {
    updates: Arc<SpscRing<MarketUpdate>>,
    snapshot_tee: Arc<SpscRing<SeqMarketUpdate>>,
    tx: T,
    next_inc_seq: u64,
}

impl<T: FrameTx> MarketDataPublisher<T> {
    pub fn new(
        updates: Arc<SpscRing<MarketUpdate>>,
        snapshot_tee: Arc<SpscRing<SeqMarketUpdate>>,
        tx: T,
    ) -> Self {
        Self { updates, snapshot_tee, tx, next_inc_seq: 1 }
    }

    pub fn run(&mut self, stop: &StopFlag, spin_loops: u32) {
        log::info!("market data publisher running");
        while !stop.is_raised() {
            let mut moved = false;
            while let Some(update) = self.updates.pop() {
                self.publish_one(update);
                moved = true;
            }
            if !moved {
                spin_wait(spin_loops);
            }
        }
    }

    fn publish_one(&mut self, update: MarketUpdate) {
        let seq = self.next_inc_seq;
        let frame = wire::encode_update(seq, &update);
        self.tx.send_frame(frame.as_bytes());
        if self.snapshot_tee.push(SeqMarketUpdate { seq, update }).is_err() {
            panic!("snapshot tee ring overflow");
        }
        self.next_inc_seq += 1;
        metrics::inc_mdp_incremental();
    }
}

#[derive(Clone, Copy, Debug)]
struct ShadowOrder {
    order_id: OrderId,
    side: Side,
    price: Price,
    qty: Qty,
    priority: Priority,
}

pub struct SnapshotSynthesizer<T: FrameTx> {
    tee: Arc<SpscRing<SeqMarketUpdate>>,
    tx: T,
    max_tickers: usize,
    shadow: HashMap<TickerId, HashMap<OrderId, ShadowOrder>>,
    last_inc_seq: u64,
    interval_ns: u64,
    last_round_ns: u64,
}

impl<T: FrameTx> SnapshotSynthesizer<T> {
    pub fn new(tee: Arc<SpscRing<SeqMarketUpdate>>, tx: T, max_tickers: usize, interval_secs: u64) -> Self {
        Self {
            tee,
            tx,
            max_tickers,
            shadow: HashMap::new(),
            last_inc_seq: 0,
            interval_ns: interval_secs.saturating_mul(1_000_000_000),
            last_round_ns: now_nanos(),
        }
    }

    pub fn run(&mut self, stop: &StopFlag, spin_loops: u32) {
        log::info!("snapshot synthesizer running (interval {}s)", self.interval_ns / 1_000_000_000);
        while !stop.is_raised() {
            let mut moved = false;
            while let Some(m) = self.tee.pop() {
                self.apply(m);
                moved = true;
            }
            let now = now_nanos();
            if now.saturating_sub(self.last_round_ns) >= self.interval_ns {
                self.publish_round();
                self.last_round_ns = now;
            }
            if !moved {
                spin_wait(spin_loops);
            }
        }
    }

    /// Mirror one incremental update into the shadow books. Trades carry no
    /// book state of their own; the paired MODIFY/CANCEL does.
    fn apply(&mut self, m: SeqMarketUpdate) {
        self.last_inc_seq = m.seq;
        let u = m.update;
        match u.kind {
            UpdateKind::Clear => {
                self.shadow.remove(&u.ticker_id);
            }
            UpdateKind::Add => {
                self.shadow.entry(u.ticker_id).or_default().insert(
                    u.order_id,
                    ShadowOrder { order_id: u.order_id, side: u.side, price: u.price, qty: u.qty, priority: u.priority },
                );
            }
            UpdateKind::Modify => {
                if let Some(order) = self.shadow.get_mut(&u.ticker_id).and_then(|t| t.get_mut(&u.order_id)) {
                    order.qty = u.qty;
                } else {
                    debug_assert!(false, "MODIFY for unknown order {}", u.order_id);
                }
            }
            UpdateKind::Cancel => {
                if let Some(t) = self.shadow.get_mut(&u.ticker_id) {
                    t.remove(&u.order_id);
                }
            }
            UpdateKind::Trade => {}
            UpdateKind::SnapshotStart | UpdateKind::SnapshotEnd => {
                debug_assert!(false, "snapshot marker on the incremental tee");
            }
        }
    }

    /// One snapshot round: START, then per ticker a CLEAR plus one ADD per
    /// live order, then END. The round-local seq restarts at 0; START and END
    /// carry `last_inc_seq` in their order_id field.
    fn publish_round(&mut self) {
        let mut seq: u64 = 0;
        Self::emit(&mut self.tx, &mut seq, MarketUpdate::snapshot_marker(UpdateKind::SnapshotStart, self.last_inc_seq));

        let mut order_total = 0usize;
        for ticker in 0..self.max_tickers as TickerId {
            Self::emit(&mut self.tx, &mut seq, MarketUpdate::clear(ticker));
            if let Some(book) = self.shadow.get(&ticker) {
                let mut orders: Vec<&ShadowOrder> = book.values().collect();
                orders.sort_unstable_by_key(|o| o.order_id);
                for o in orders {
                    Self::emit(
                        &mut self.tx,
                        &mut seq,
                        MarketUpdate {
                            kind: UpdateKind::Add,
                            order_id: o.order_id,
                            ticker_id: ticker,
                            side: o.side,
                            price: o.price,
                            qty: o.qty,
                            priority: o.priority,
                        },
                    );
                    order_total += 1;
                }
            }
        }

        Self::emit(&mut self.tx, &mut seq, MarketUpdate::snapshot_marker(UpdateKind::SnapshotEnd, self.last_inc_seq));
        log::info!(
            "snapshot round published: {} tickers, {} orders, synced to inc seq {}",
            self.max_tickers, order_total, self.last_inc_seq
        );
        metrics::inc_mdp_snapshot_round();
    }

    fn emit(tx: &mut T, seq: &mut u64, update: MarketUpdate) {
        let frame = wire::encode_update(*seq, &update);
        tx.send_frame(frame.as_bytes());
        *seq += 1;
    }
}
