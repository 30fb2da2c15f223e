// src/wire.rs
// Binary wire formats for the three external interfaces:
// - client TCP request / response frames
// - UDP multicast market data frames (incremental and snapshot streams)
// Little-endian, packed, no padding; #[repr(C, packed)] with zerocopy for
// safe casts to/from bytes.

use crate::types::*;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// Frames store native integers directly; only little-endian hosts are valid
// deployment targets for this wire format.
const _: () = assert!(cfg!(target_endian = "little"), "wire format requires a little-endian host");

pub mod request_kind {
    pub const NEW: u8 = 1;
    pub const CANCEL: u8 = 2;
}

pub mod response_kind {
    pub const ACCEPTED: u8 = 1;
    pub const CANCELED: u8 = 2;
    pub const FILLED: u8 = 3;
    pub const CANCEL_REJECTED: u8 = 4;
}

pub mod update_kind {
    pub const CLEAR: u8 = 1;
    pub const ADD: u8 = 2;
    pub const MODIFY: u8 = 3;
    pub const CANCEL: u8 = 4;
    pub const TRADE: u8 = 5;
    pub const SNAPSHOT_START: u8 = 6;
    pub const SNAPSHOT_END: u8 = 7;
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderRequestFrame {
    pub seq_num: u64,
    pub kind: u8,
    pub client_id: u32,
    pub ticker_id: u32,
    pub client_order_id: u64,
    pub side: i8,
    pub price: i64,
    pub qty: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderResponseFrame {
    pub seq_num: u64,
    pub kind: u8,
    pub client_id: u32,
    pub ticker_id: u32,
    pub client_order_id: u64,
    pub market_order_id: u64,
    pub side: i8,
    pub price: i64,
    pub exec_qty: u32,
    pub leaves_qty: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct MarketDataFrame {
    pub seq_num: u64,
    pub kind: u8,
    pub order_id: u64,
    pub ticker_id: u32,
    pub side: i8,
    pub price: i64,
    pub qty: u32,
    pub priority: u64,
}

pub const ORDER_REQUEST_FRAME_SIZE: usize = std::mem::size_of::<OrderRequestFrame>();
pub const ORDER_RESPONSE_FRAME_SIZE: usize = std::mem::size_of::<OrderResponseFrame>();
pub const MARKET_DATA_FRAME_SIZE: usize = std::mem::size_of::<MarketDataFrame>();

const _: () = assert!(ORDER_REQUEST_FRAME_SIZE == 38);
const _: () = assert!(ORDER_RESPONSE_FRAME_SIZE == 50);
const _: () = assert!(MARKET_DATA_FRAME_SIZE == 42);

#[inline]
fn side_from_wire(raw: i8) -> Option<Side> {
    match raw {
        1 => Some(Side::Buy),
        -1 => Some(Side::Sell),
        0 => Some(Side::Invalid),
        _ => None,
    }
}

/// Decode a client request frame into (per-client seq, internal request).
/// None means an unknown type or side byte, which the gateway treats as
/// stream corruption.
pub fn decode_request(frame: &OrderRequestFrame) -> Option<(u64, ClientRequest)> {
    let kind = match frame.kind {
        request_kind::NEW => RequestKind::New,
        request_kind::CANCEL => RequestKind::Cancel,
        _ => return None,
    };
    let side = side_from_wire(frame.side)?;
    Some((
        frame.seq_num,
        ClientRequest {
            kind,
            client_id: frame.client_id,
            ticker_id: frame.ticker_id,
            client_order_id: frame.client_order_id,
            side,
            price: frame.price,
            qty: frame.qty,
        },
    ))
}

pub fn encode_request(seq_num: u64, r: &ClientRequest) -> OrderRequestFrame {
    OrderRequestFrame {
        seq_num,
        kind: match r.kind {
            RequestKind::New => request_kind::NEW,
            RequestKind::Cancel => request_kind::CANCEL,
        },
        client_id: r.client_id,
        ticker_id: r.ticker_id,
        client_order_id: r.client_order_id,
        side: r.side as i8,
        price: r.price,
        qty: r.qty,
    }
}

pub fn encode_response(seq_num: u64, r: &ClientResponse) -> OrderResponseFrame {
    OrderResponseFrame {
        seq_num,
        kind: match r.kind {
            ResponseKind::Accepted => response_kind::ACCEPTED,
            ResponseKind::Canceled => response_kind::CANCELED,
            ResponseKind::Filled => response_kind::FILLED,
            ResponseKind::CancelRejected => response_kind::CANCEL_REJECTED,
        },
        client_id: r.client_id,
        ticker_id: r.ticker_id,
        client_order_id: r.client_order_id,
        market_order_id: r.market_order_id,
        side: r.side as i8,
        price: r.price,
        exec_qty: r.exec_qty,
        leaves_qty: r.leaves_qty,
    }
}

pub fn decode_response(frame: &OrderResponseFrame) -> Option<(u64, ClientResponse)> {
    let kind = match frame.kind {
        response_kind::ACCEPTED => ResponseKind::Accepted,
        response_kind::CANCELED => ResponseKind::Canceled,
        response_kind::FILLED => ResponseKind::Filled,
        response_kind::CANCEL_REJECTED => ResponseKind::CancelRejected,
        _ => return None,
    };
    let side = side_from_wire(frame.side)?;
    Some((
        frame.seq_num,
        ClientResponse {
            kind,
            client_id: frame.client_id,
            ticker_id: frame.ticker_id,
            client_order_id: frame.client_order_id,
            market_order_id: frame.market_order_id,
            side,
            price: frame.price,
            exec_qty: frame.exec_qty,
            leaves_qty: frame.leaves_qty,
        },
    ))
}

pub fn encode_update(seq_num: u64, u: &MarketUpdate) -> MarketDataFrame {
    MarketDataFrame {
        seq_num,
        kind: match u.kind {
            UpdateKind::Clear => update_kind::CLEAR,
            UpdateKind::Add => update_kind::ADD,
            UpdateKind::Modify => update_kind::MODIFY,
            UpdateKind::Cancel => update_kind::CANCEL,
            UpdateKind::Trade => update_kind::TRADE,
            UpdateKind::SnapshotStart => update_kind::SNAPSHOT_START,
            UpdateKind::SnapshotEnd => update_kind::SNAPSHOT_END,
        },
        order_id: u.order_id,
        ticker_id: u.ticker_id,
        side: u.side as i8,
        price: u.price,
        qty: u.qty,
        priority: u.priority,
    }
}

pub fn decode_update(frame: &MarketDataFrame) -> Option<SeqMarketUpdate> {
    let kind = match frame.kind {
        update_kind::CLEAR => UpdateKind::Clear,
        update_kind::ADD => UpdateKind::Add,
        update_kind::MODIFY => UpdateKind::Modify,
        update_kind::CANCEL => UpdateKind::Cancel,
        update_kind::TRADE => UpdateKind::Trade,
        update_kind::SNAPSHOT_START => UpdateKind::SnapshotStart,
        update_kind::SNAPSHOT_END => UpdateKind::SnapshotEnd,
        _ => return None,
    };
    let side = side_from_wire(frame.side)?;
    Some(SeqMarketUpdate {
        seq: frame.seq_num,
        update: MarketUpdate {
            kind,
            order_id: frame.order_id,
            ticker_id: frame.ticker_id,
            side,
            price: frame.price,
            qty: frame.qty,
            priority: frame.priority,
        },
    })
}
