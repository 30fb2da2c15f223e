// src/types.rs
//
// Fixed-width identifiers and the internal message records that flow over the
// SPSC rings. The max value of each identifier type is reserved as the
// "absent" sentinel; wire encoding lives in wire.rs.

pub type OrderId = u64;
pub type TickerId = u32;
pub type ClientId = u32;
pub type Price = i64;
pub type Qty = u32;
pub type Priority = u64;

pub const ORDER_ID_INVALID: OrderId = OrderId::MAX;
pub const TICKER_ID_INVALID: TickerId = TickerId::MAX;
pub const CLIENT_ID_INVALID: ClientId = ClientId::MAX;
pub const PRICE_INVALID: Price = Price::MAX;
pub const QTY_INVALID: Qty = Qty::MAX;
pub const PRIORITY_INVALID: Priority = Priority::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Side {
    Invalid = 0,
    Buy = 1,
    Sell = -1,
}

impl Default for Side {
    fn default() -> Self { Side::Invalid }
}

impl Side {
    /// {+1, -1} multiplier for signed book arithmetic.
    #[inline]
    pub fn sign(self) -> i64 {
        self as i8 as i64
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
            Side::Invalid => Side::Invalid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    New,
    Cancel,
}

/// A client order request after gateway sequencing (the per-client wire
/// seq_num has already been validated and stripped).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: RequestKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Accepted,
    Canceled,
    Filled,
    CancelRejected,
}

/// Engine-to-client response. `exec_qty` is the size of a single fill, not
/// cumulative; `leaves_qty` is what remains resting afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientResponse {
    pub kind: ResponseKind,
    pub client_id: ClientId,
    pub ticker_id: TickerId,
    pub client_order_id: OrderId,
    pub market_order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub exec_qty: Qty,
    pub leaves_qty: Qty,
}

impl ClientResponse {
    /// Response for a cancel that named no live order. Everything the venue
    /// cannot attribute stays at its sentinel.
    pub fn cancel_rejected(client_id: ClientId, ticker_id: TickerId, client_order_id: OrderId) -> Self {
        Self {
            kind: ResponseKind::CancelRejected,
            client_id,
            ticker_id,
            client_order_id,
            market_order_id: ORDER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            exec_qty: QTY_INVALID,
            leaves_qty: QTY_INVALID,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Clear,
    Add,
    Modify,
    Cancel,
    Trade,
    SnapshotStart,
    SnapshotEnd,
}

/// One market data event. On SnapshotStart/SnapshotEnd the `order_id` field
/// carries the incremental seq the snapshot round is synchronized to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketUpdate {
    pub kind: UpdateKind,
    pub order_id: OrderId,
    pub ticker_id: TickerId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub priority: Priority,
}

impl MarketUpdate {
    pub fn snapshot_marker(kind: UpdateKind, last_inc_seq: u64) -> Self {
        Self {
            kind,
            order_id: last_inc_seq,
            ticker_id: TICKER_ID_INVALID,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }

    pub fn clear(ticker_id: TickerId) -> Self {
        Self {
            kind: UpdateKind::Clear,
            order_id: ORDER_ID_INVALID,
            ticker_id,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: QTY_INVALID,
            priority: PRIORITY_INVALID,
        }
    }
}

/// A market update stamped with its venue-global incremental sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeqMarketUpdate {
    pub seq: u64,
    pub update: MarketUpdate,
}
