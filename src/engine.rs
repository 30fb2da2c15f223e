// src/engine.rs
//
// Matching engine thread: single consumer of the sequenced request ring,
// dispatching to the per-ticker books. Responses and market updates are
// emitted synchronously into the rings consumed by the order gateway and the
// market data publisher.

use crate::book::{EngineSink, TickerBook};
use crate::metrics;
use crate::spsc::SpscRing;
use crate::types::*;
use crate::util::{spin_wait, StopFlag};
use std::sync::Arc;

/// Ring-backed sink. Overflow on either ring means the capacities were
/// misconfigured for the traffic; continuing would silently drop venue state.
pub struct RingSink {
    responses: Arc<SpscRing<ClientResponse>>,
    updates: Arc<SpscRing<MarketUpdate>>,
}

impl EngineSink for RingSink {
    fn client_response(&mut self, response: ClientResponse) {
        if self.responses.push(response).is_err() {
            panic!("client response ring overflow");
        }
    }

    fn market_update(&mut self, update: MarketUpdate) {
        if update.kind == UpdateKind::Trade {
            metrics::inc_engine_trades();
        }
        if self.updates.push(update).is_err() {
            panic!("market update ring overflow");
        }
    }
}

pub struct MatchingEngine {
    books: Vec<TickerBook>,
    requests: Arc<SpscRing<ClientRequest>>,
    sink: RingSink,
}

impl MatchingEngine {
    pub fn new(
        max_tickers: usize,
        max_orders_per_ticker: usize,
        max_price_levels: usize,
        requests: Arc<SpscRing<ClientRequest>>,
        responses: Arc<SpscRing<ClientResponse>>,
        updates: Arc<SpscRing<MarketUpdate>>,
    ) -> Self {
        let books = (0..max_tickers)
            .map(|t| TickerBook::new(t as TickerId, max_orders_per_ticker, max_price_levels))
            .collect();
        Self { books, requests, sink: RingSink { responses, updates } }
    }

    pub fn run(&mut self, stop: &StopFlag, spin_loops: u32) {
        log::info!("matching engine running ({} tickers)", self.books.len());
        while !stop.is_raised() {
            let mut moved = false;
            while let Some(request) = self.requests.pop() {
                self.process(request);
                moved = true;
            }
            if !moved {
                spin_wait(spin_loops);
            }
        }
    }

    pub fn process(&mut self, request: ClientRequest) {
        let book = self
            .books
            .get_mut(request.ticker_id as usize)
            .unwrap_or_else(|| panic!("request for unknown ticker {}", request.ticker_id));
        match request.kind {
            RequestKind::New => book.add(
                &mut self.sink,
                request.client_id,
                request.client_order_id,
                request.side,
                request.price,
                request.qty,
            ),
            RequestKind::Cancel => book.cancel(&mut self.sink, request.client_id, request.client_order_id),
        }
        metrics::inc_engine_requests();
    }

    pub fn book(&self, ticker_id: TickerId) -> Option<&TickerBook> {
        self.books.get(ticker_id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (MatchingEngine, Arc<SpscRing<ClientResponse>>, Arc<SpscRing<MarketUpdate>>) {
        let requests = Arc::new(SpscRing::new(64));
        let responses = Arc::new(SpscRing::new(256));
        let updates = Arc::new(SpscRing::new(256));
        (
            MatchingEngine::new(2, 1024, 64, requests, responses.clone(), updates.clone()),
            responses,
            updates,
        )
    }

    fn new_order(client_id: ClientId, ticker_id: TickerId, coid: OrderId, side: Side, price: Price, qty: Qty) -> ClientRequest {
        ClientRequest { kind: RequestKind::New, client_id, ticker_id, client_order_id: coid, side, price, qty }
    }

    #[test]
    fn dispatch_reaches_the_right_book_and_rings() {
        let (mut engine, responses, updates) = engine();
        engine.process(new_order(7, 1, 100, Side::Buy, 100, 10));
        engine.process(new_order(8, 1, 200, Side::Sell, 100, 10));

        let resp: Vec<_> = std::iter::from_fn(|| responses.pop()).collect();
        assert_eq!(resp.len(), 4); // accepted x2 + filled x2
        assert!(resp.iter().filter(|r| r.kind == ResponseKind::Filled).count() == 2);

        let upd: Vec<_> = std::iter::from_fn(|| updates.pop()).collect();
        let kinds: Vec<_> = upd.iter().map(|u| u.kind).collect();
        assert_eq!(kinds, vec![UpdateKind::Add, UpdateKind::Trade, UpdateKind::Cancel]);

        // Ticker 0 untouched.
        assert_eq!(engine.book(0).unwrap().order_count(), 0);
        assert_eq!(engine.book(1).unwrap().order_count(), 0);
    }

    #[test]
    fn cancel_request_routes_to_cancel_path() {
        let (mut engine, responses, _updates) = engine();
        engine.process(ClientRequest {
            kind: RequestKind::Cancel,
            client_id: 7,
            ticker_id: 0,
            client_order_id: 999,
            side: Side::Invalid,
            price: PRICE_INVALID,
            qty: 0,
        });
        let r = responses.pop().unwrap();
        assert_eq!(r.kind, ResponseKind::CancelRejected);
    }

    #[test]
    #[should_panic(expected = "unknown ticker")]
    fn out_of_range_ticker_is_fatal() {
        let (mut engine, _responses, _updates) = engine();
        engine.process(new_order(1, 99, 1, Side::Buy, 1, 1));
    }
}
