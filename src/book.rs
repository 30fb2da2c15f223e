// src/book.rs
//
// Per-ticker limit order book. Orders and price levels live in fixed slot
// pools and are linked by index: each price level keeps its orders in a
// circular FIFO, and the levels of one side form a circular doubly linked
// list ordered best-first (bids descending, asks ascending). Matching walks
// the opposite side's head and emits responses and market updates through an
// injected sink, so the book itself never touches a queue or socket.

use crate::pool::{SlotIndex, SlotPool, NIL};
use crate::types::*;
use hashbrown::HashMap;

/// Receives the side effects of book operations. The matching engine backs
/// this with SPSC rings; tests back it with vectors.
pub trait EngineSink {
    fn client_response(&mut self, response: ClientResponse);
    fn market_update(&mut self, update: MarketUpdate);
}

#[derive(Clone, Copy, Default, Debug)]
struct BookOrder {
    client_id: ClientId,
    client_order_id: OrderId,
    market_order_id: OrderId,
    side: Side,
    price: Price,
    qty: Qty,
    priority: Priority,
    prev: SlotIndex,
    next: SlotIndex,
}

#[derive(Clone, Copy, Default, Debug)]
struct BookLevel {
    side: Side,
    price: Price,
    first_order: SlotIndex,
    prev: SlotIndex,
    next: SlotIndex,
}

/// Top of book on each side plus the aggregate size resting there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bbo {
    pub bid_price: Price,
    pub bid_qty: Qty,
    pub ask_price: Price,
    pub ask_qty: Qty,
}

impl Default for Bbo {
    fn default() -> Self {
        Self { bid_price: PRICE_INVALID, bid_qty: 0, ask_price: PRICE_INVALID, ask_qty: 0 }
    }
}

pub struct TickerBook {
    ticker_id: TickerId,
    orders: SlotPool<BookOrder>,
    levels: SlotPool<BookLevel>,
    bids_head: SlotIndex,
    asks_head: SlotIndex,
    levels_by_price: HashMap<(Side, Price), SlotIndex>,
    client_index: HashMap<(ClientId, OrderId), SlotIndex>,
    next_market_order_id: OrderId,
    bbo: Bbo,
}

impl TickerBook {
    pub fn new(ticker_id: TickerId, max_orders: usize, max_levels: usize) -> Self {
        Self {
            ticker_id,
            orders: SlotPool::new(max_orders),
            levels: SlotPool::new(max_levels),
            bids_head: NIL,
            asks_head: NIL,
            levels_by_price: HashMap::new(),
            client_index: HashMap::with_capacity(max_orders),
            next_market_order_id: 1,
            bbo: Bbo::default(),
        }
    }

    pub fn ticker_id(&self) -> TickerId { self.ticker_id }

    pub fn bbo(&self) -> Bbo { self.bbo }

    pub fn order_count(&self) -> usize { self.client_index.len() }

    /// NEW request. Acknowledges, matches aggressively against the opposite
    /// side, and rests any residual at its price level. Zero-qty and
    /// sentinel-price requests are the caller's responsibility to screen.
    pub fn add(
        &mut self,
        sink: &mut impl EngineSink,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        qty: Qty,
    ) {
        let market_order_id = self.next_market_order_id;
        self.next_market_order_id += 1;

        sink.client_response(ClientResponse {
            kind: ResponseKind::Accepted,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            exec_qty: 0,
            leaves_qty: qty,
        });

        let leaves_qty = self.match_aggressive(sink, client_id, client_order_id, side, price, qty, market_order_id);

        if leaves_qty > 0 {
            let level_idx = self.find_or_insert_level(side, price);
            let priority = self.next_priority(level_idx);
            let order_idx = self.orders.alloc();
            *self.orders.get_mut(order_idx) = BookOrder {
                client_id,
                client_order_id,
                market_order_id,
                side,
                price,
                qty: leaves_qty,
                priority,
                prev: NIL,
                next: NIL,
            };
            self.append_to_level(level_idx, order_idx);
            self.client_index.insert((client_id, client_order_id), order_idx);

            sink.market_update(MarketUpdate {
                kind: UpdateKind::Add,
                order_id: market_order_id,
                ticker_id: self.ticker_id,
                side,
                price,
                qty: leaves_qty,
                priority,
            });
        }

        self.refresh_bbo();
    }

    /// CANCEL request. A cancel naming no live order of this client is a
    /// business rejection: response only, no market update.
    pub fn cancel(&mut self, sink: &mut impl EngineSink, client_id: ClientId, client_order_id: OrderId) {
        let Some(&order_idx) = self.client_index.get(&(client_id, client_order_id)) else {
            sink.client_response(ClientResponse::cancel_rejected(client_id, self.ticker_id, client_order_id));
            return;
        };
        let order = *self.orders.get(order_idx);

        sink.client_response(ClientResponse {
            kind: ResponseKind::Canceled,
            client_id,
            ticker_id: self.ticker_id,
            client_order_id,
            market_order_id: order.market_order_id,
            side: order.side,
            price: order.price,
            exec_qty: QTY_INVALID,
            leaves_qty: order.qty,
        });
        sink.market_update(MarketUpdate {
            kind: UpdateKind::Cancel,
            order_id: order.market_order_id,
            ticker_id: self.ticker_id,
            side: order.side,
            price: order.price,
            qty: 0,
            priority: order.priority,
        });

        self.remove_order(order_idx, &order);
        self.refresh_bbo();
    }

    /// Aggressive-order core: consume the opposite side best-first while the
    /// prices cross, emitting one TRADE plus both FILLED responses per fill.
    /// Returns the unmatched remainder.
    #[allow(clippy::too_many_arguments)]
    fn match_aggressive(
        &mut self,
        sink: &mut impl EngineSink,
        client_id: ClientId,
        client_order_id: OrderId,
        side: Side,
        price: Price,
        mut qty: Qty,
        market_order_id: OrderId,
    ) -> Qty {
        while qty > 0 {
            let head = self.side_head(side.opposite());
            if head == NIL {
                break;
            }
            let level_price = self.levels.get(head).price;
            // sign folds the bid/ask comparison into one: the aggressor
            // crosses while its signed price reaches the resting level's.
            if price * side.sign() < level_price * side.sign() {
                break;
            }

            // Self-match is permitted; an opt-in ownership filter would hook in here.
            let resting_idx = self.levels.get(head).first_order;
            let resting = *self.orders.get(resting_idx);
            let fill_qty = qty.min(resting.qty);
            qty -= fill_qty;
            let resting_leaves = resting.qty - fill_qty;
            self.orders.get_mut(resting_idx).qty = resting_leaves;

            sink.market_update(MarketUpdate {
                kind: UpdateKind::Trade,
                order_id: market_order_id,
                ticker_id: self.ticker_id,
                side,
                price: resting.price,
                qty: fill_qty,
                priority: PRIORITY_INVALID,
            });
            sink.client_response(ClientResponse {
                kind: ResponseKind::Filled,
                client_id,
                ticker_id: self.ticker_id,
                client_order_id,
                market_order_id,
                side,
                price: resting.price,
                exec_qty: fill_qty,
                leaves_qty: qty,
            });
            sink.client_response(ClientResponse {
                kind: ResponseKind::Filled,
                client_id: resting.client_id,
                ticker_id: self.ticker_id,
                client_order_id: resting.client_order_id,
                market_order_id: resting.market_order_id,
                side: resting.side,
                price: resting.price,
                exec_qty: fill_qty,
                leaves_qty: resting_leaves,
            });

            if resting_leaves == 0 {
                sink.market_update(MarketUpdate {
                    kind: UpdateKind::Cancel,
                    order_id: resting.market_order_id,
                    ticker_id: self.ticker_id,
                    side: resting.side,
                    price: resting.price,
                    qty: 0,
                    priority: resting.priority,
                });
                self.remove_order(resting_idx, &resting);
            } else {
                sink.market_update(MarketUpdate {
                    kind: UpdateKind::Modify,
                    order_id: resting.market_order_id,
                    ticker_id: self.ticker_id,
                    side: resting.side,
                    price: resting.price,
                    qty: resting_leaves,
                    priority: resting.priority,
                });
            }
        }
        qty
    }

    // ----- intrusive list plumbing -----

    #[inline]
    fn side_head(&self, side: Side) -> SlotIndex {
        match side {
            Side::Buy => self.bids_head,
            Side::Sell => self.asks_head,
            Side::Invalid => unreachable!("side list for invalid side"),
        }
    }

    #[inline]
    fn set_side_head(&mut self, side: Side, idx: SlotIndex) {
        match side {
            Side::Buy => self.bids_head = idx,
            Side::Sell => self.asks_head = idx,
            Side::Invalid => unreachable!("side list for invalid side"),
        }
    }

    /// Closer to the top of `side`'s book: higher for bids, lower for asks.
    #[inline]
    fn price_better(side: Side, a: Price, b: Price) -> bool {
        a * side.sign() > b * side.sign()
    }

    fn alloc_level(&mut self, side: Side, price: Price) -> SlotIndex {
        let idx = self.levels.alloc();
        *self.levels.get_mut(idx) = BookLevel { side, price, first_order: NIL, prev: idx, next: idx };
        self.levels_by_price.insert((side, price), idx);
        idx
    }

    fn find_or_insert_level(&mut self, side: Side, price: Price) -> SlotIndex {
        if let Some(&idx) = self.levels_by_price.get(&(side, price)) {
            return idx;
        }
        let head = self.side_head(side);
        let idx = self.alloc_level(side, price);
        if head == NIL {
            self.set_side_head(side, idx);
            return idx;
        }
        let mut cur = head;
        loop {
            let (cur_price, cur_next) = {
                let level = self.levels.get(cur);
                (level.price, level.next)
            };
            if Self::price_better(side, price, cur_price) {
                self.link_level_before(idx, cur);
                if cur == head {
                    self.set_side_head(side, idx);
                }
                return idx;
            }
            cur = cur_next;
            if cur == head {
                // Worst price on the side: tail of the circular list.
                self.link_level_before(idx, head);
                return idx;
            }
        }
    }

    fn link_level_before(&mut self, idx: SlotIndex, at: SlotIndex) {
        let at_prev = self.levels.get(at).prev;
        {
            let level = self.levels.get_mut(idx);
            level.prev = at_prev;
            level.next = at;
        }
        self.levels.get_mut(at_prev).next = idx;
        self.levels.get_mut(at).prev = idx;
    }

    fn unlink_level(&mut self, side: Side, level_idx: SlotIndex) {
        let (prev, next, price) = {
            let level = self.levels.get(level_idx);
            (level.prev, level.next, level.price)
        };
        if next == level_idx {
            self.set_side_head(side, NIL);
        } else {
            self.levels.get_mut(prev).next = next;
            self.levels.get_mut(next).prev = prev;
            if self.side_head(side) == level_idx {
                self.set_side_head(side, next);
            }
        }
        self.levels_by_price.remove(&(side, price));
        self.levels.free(level_idx);
    }

    /// Next FIFO priority on a level: strictly increasing along the chain,
    /// resetting to 1 only when the level itself is recreated.
    fn next_priority(&self, level_idx: SlotIndex) -> Priority {
        let first = self.levels.get(level_idx).first_order;
        if first == NIL {
            1
        } else {
            let last = self.orders.get(first).prev;
            self.orders.get(last).priority + 1
        }
    }

    fn append_to_level(&mut self, level_idx: SlotIndex, order_idx: SlotIndex) {
        let first = self.levels.get(level_idx).first_order;
        if first == NIL {
            let order = self.orders.get_mut(order_idx);
            order.prev = order_idx;
            order.next = order_idx;
            self.levels.get_mut(level_idx).first_order = order_idx;
        } else {
            let last = self.orders.get(first).prev;
            {
                let order = self.orders.get_mut(order_idx);
                order.prev = last;
                order.next = first;
            }
            self.orders.get_mut(last).next = order_idx;
            self.orders.get_mut(first).prev = order_idx;
        }
    }

    fn unlink_order(&mut self, level_idx: SlotIndex, order_idx: SlotIndex) {
        let (prev, next) = {
            let order = self.orders.get(order_idx);
            (order.prev, order.next)
        };
        if next == order_idx {
            self.levels.get_mut(level_idx).first_order = NIL;
        } else {
            self.orders.get_mut(prev).next = next;
            self.orders.get_mut(next).prev = prev;
            let level = self.levels.get_mut(level_idx);
            if level.first_order == order_idx {
                level.first_order = next;
            }
        }
    }

    /// Unlink from the level FIFO, drop from the client index, return the
    /// slot, and collapse the level if it emptied.
    fn remove_order(&mut self, order_idx: SlotIndex, order: &BookOrder) {
        let level_idx = self.levels_by_price[&(order.side, order.price)];
        self.unlink_order(level_idx, order_idx);
        self.client_index.remove(&(order.client_id, order.client_order_id));
        self.orders.free(order_idx);
        if self.levels.get(level_idx).first_order == NIL {
            self.unlink_level(order.side, level_idx);
        }
    }

    fn level_qty(&self, level_idx: SlotIndex) -> Qty {
        let first = self.levels.get(level_idx).first_order;
        if first == NIL {
            return 0;
        }
        let mut total: Qty = 0;
        let mut cur = first;
        loop {
            let order = self.orders.get(cur);
            total += order.qty;
            cur = order.next;
            if cur == first {
                break;
            }
        }
        total
    }

    fn refresh_bbo(&mut self) {
        self.bbo = Bbo::default();
        if self.bids_head != NIL {
            self.bbo.bid_price = self.levels.get(self.bids_head).price;
            self.bbo.bid_qty = self.level_qty(self.bids_head);
        }
        if self.asks_head != NIL {
            self.bbo.ask_price = self.levels.get(self.asks_head).price;
            self.bbo.ask_qty = self.level_qty(self.asks_head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink {
        responses: Vec<ClientResponse>,
        updates: Vec<MarketUpdate>,
    }

    impl EngineSink for VecSink {
        fn client_response(&mut self, response: ClientResponse) {
            self.responses.push(response);
        }
        fn market_update(&mut self, update: MarketUpdate) {
            self.updates.push(update);
        }
    }

    fn book() -> TickerBook {
        TickerBook::new(1, 1024, 64)
    }

    fn assert_invariants(book: &TickerBook) {
        let mut seen = 0usize;
        for side in [Side::Buy, Side::Sell] {
            let head = book.side_head(side);
            if head == NIL {
                continue;
            }
            let mut cur = head;
            let mut last_price: Option<Price> = None;
            loop {
                let level = *book.levels.get(cur);
                assert_eq!(level.side, side);
                if let Some(lp) = last_price {
                    match side {
                        Side::Buy => assert!(level.price < lp, "bid prices must descend"),
                        Side::Sell => assert!(level.price > lp, "ask prices must ascend"),
                        Side::Invalid => unreachable!(),
                    }
                }
                last_price = Some(level.price);
                assert_eq!(book.levels_by_price[&(side, level.price)], cur);

                let first = level.first_order;
                assert_ne!(first, NIL, "empty level left linked at price {}", level.price);
                let mut order_cur = first;
                let mut last_priority: Option<Priority> = None;
                loop {
                    let order = *book.orders.get(order_cur);
                    assert_eq!(order.side, side);
                    assert_eq!(order.price, level.price);
                    assert!(order.qty > 0, "zero-qty order left resting");
                    if let Some(p) = last_priority {
                        assert!(order.priority > p, "priority must increase along the FIFO");
                    }
                    last_priority = Some(order.priority);
                    assert_eq!(
                        book.client_index.get(&(order.client_id, order.client_order_id)),
                        Some(&order_cur),
                        "order missing from client index"
                    );
                    seen += 1;
                    order_cur = order.next;
                    if order_cur == first {
                        break;
                    }
                }
                cur = level.next;
                if cur == head {
                    break;
                }
            }
        }
        assert_eq!(seen, book.client_index.len(), "client index holds an orphan");
        assert_eq!(seen, book.orders.in_use(), "order pool leaks a slot");

        let bbo = book.bbo();
        if book.bids_head == NIL {
            assert_eq!((bbo.bid_price, bbo.bid_qty), (PRICE_INVALID, 0));
        } else {
            assert_eq!(bbo.bid_price, book.levels.get(book.bids_head).price);
            assert_eq!(bbo.bid_qty, book.level_qty(book.bids_head));
        }
        if book.asks_head == NIL {
            assert_eq!((bbo.ask_price, bbo.ask_qty), (PRICE_INVALID, 0));
        } else {
            assert_eq!(bbo.ask_price, book.levels.get(book.asks_head).price);
            assert_eq!(bbo.ask_qty, book.level_qty(book.asks_head));
        }
    }

    #[test]
    fn full_size_cross_empties_both_sides() {
        let mut b = book();
        let mut sink = VecSink::default();

        b.add(&mut sink, 7, 100, Side::Buy, 100, 10);
        assert_eq!(sink.responses.len(), 1);
        assert_eq!(sink.responses[0].kind, ResponseKind::Accepted);
        assert_eq!(sink.updates.len(), 1);
        assert_eq!(sink.updates[0].kind, UpdateKind::Add);
        assert_eq!(sink.updates[0].order_id, 1);
        assert_eq!(sink.updates[0].priority, 1);

        sink = VecSink::default();
        b.add(&mut sink, 8, 200, Side::Sell, 100, 10);

        let kinds: Vec<_> = sink.responses.iter().map(|r| (r.kind, r.client_id)).collect();
        assert_eq!(
            kinds,
            vec![
                (ResponseKind::Accepted, 8),
                (ResponseKind::Filled, 8),
                (ResponseKind::Filled, 7),
            ]
        );
        assert_eq!(sink.responses[1].exec_qty, 10);
        assert_eq!(sink.responses[1].leaves_qty, 0);
        assert_eq!(sink.responses[2].exec_qty, 10);
        assert_eq!(sink.responses[2].leaves_qty, 0);

        let update_kinds: Vec<_> = sink.updates.iter().map(|u| u.kind).collect();
        assert_eq!(update_kinds, vec![UpdateKind::Trade, UpdateKind::Cancel]);
        assert_eq!(sink.updates[0].price, 100);
        assert_eq!(sink.updates[0].qty, 10);
        assert_eq!(sink.updates[1].order_id, 1);

        assert_eq!(b.bbo(), Bbo::default());
        assert_eq!(b.order_count(), 0);
        assert_invariants(&b);
    }

    #[test]
    fn partial_fill_leaves_residual_resting() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.add(&mut sink, 7, 100, Side::Buy, 100, 10);

        sink = VecSink::default();
        b.add(&mut sink, 8, 200, Side::Sell, 100, 6);

        let trade: Vec<_> = sink.updates.iter().filter(|u| u.kind == UpdateKind::Trade).collect();
        assert_eq!(trade.len(), 1);
        assert_eq!(trade[0].qty, 6);

        let fills: Vec<_> = sink.responses.iter().filter(|r| r.kind == ResponseKind::Filled).collect();
        assert_eq!(fills[0].client_id, 8);
        assert_eq!((fills[0].exec_qty, fills[0].leaves_qty), (6, 0));
        assert_eq!(fills[1].client_id, 7);
        assert_eq!((fills[1].exec_qty, fills[1].leaves_qty), (6, 4));

        let modify: Vec<_> = sink.updates.iter().filter(|u| u.kind == UpdateKind::Modify).collect();
        assert_eq!(modify.len(), 1);
        assert_eq!((modify[0].order_id, modify[0].qty, modify[0].priority), (1, 4, 1));

        // No ADD for the fully matched aggressor.
        assert!(sink.updates.iter().all(|u| u.kind != UpdateKind::Add));

        assert_eq!(b.bbo(), Bbo { bid_price: 100, bid_qty: 4, ask_price: PRICE_INVALID, ask_qty: 0 });
        assert_invariants(&b);
    }

    #[test]
    fn price_then_time_priority_drives_fill_order() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.add(&mut sink, 1, 10, Side::Buy, 100, 5); // moid 1, priority 1 at 100
        b.add(&mut sink, 2, 20, Side::Buy, 100, 5); // moid 2, priority 2 at 100
        b.add(&mut sink, 3, 30, Side::Buy, 101, 5); // moid 3, priority 1 at 101

        sink = VecSink::default();
        b.add(&mut sink, 9, 90, Side::Sell, 100, 12);

        let passive_fills: Vec<_> = sink
            .responses
            .iter()
            .filter(|r| r.kind == ResponseKind::Filled && r.client_id != 9)
            .map(|r| (r.market_order_id, r.exec_qty, r.leaves_qty))
            .collect();
        assert_eq!(passive_fills, vec![(3, 5, 0), (1, 5, 0), (2, 2, 3)]);

        // Trades print at the resting prices, best level first.
        let trades: Vec<_> = sink
            .updates
            .iter()
            .filter(|u| u.kind == UpdateKind::Trade)
            .map(|u| (u.price, u.qty))
            .collect();
        assert_eq!(trades, vec![(101, 5), (100, 5), (100, 2)]);

        assert_eq!(b.bbo(), Bbo { bid_price: 100, bid_qty: 3, ask_price: PRICE_INVALID, ask_qty: 0 });
        let idx = b.client_index[&(2, 20)];
        assert_eq!(b.orders.get(idx).priority, 2);
        assert_invariants(&b);
    }

    #[test]
    fn cancel_of_unknown_order_rejects_without_market_update() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.cancel(&mut sink, 7, 999);

        assert_eq!(sink.responses.len(), 1);
        let r = &sink.responses[0];
        assert_eq!(r.kind, ResponseKind::CancelRejected);
        assert_eq!(r.client_order_id, 999);
        assert_eq!(r.market_order_id, ORDER_ID_INVALID);
        assert_eq!(r.side, Side::Invalid);
        assert_eq!(r.price, PRICE_INVALID);
        assert!(sink.updates.is_empty());
    }

    #[test]
    fn cancel_of_last_order_removes_the_level() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.add(&mut sink, 7, 100, Side::Buy, 100, 10);
        assert_eq!(b.levels.in_use(), 1);

        sink = VecSink::default();
        b.cancel(&mut sink, 7, 100);
        assert_eq!(sink.responses[0].kind, ResponseKind::Canceled);
        assert_eq!(sink.responses[0].leaves_qty, 10);
        assert_eq!(sink.updates[0].kind, UpdateKind::Cancel);

        assert_eq!(b.levels.in_use(), 0);
        assert_eq!(b.orders.in_use(), 0);
        assert_eq!(b.bbo(), Bbo::default());
        assert_invariants(&b);
    }

    #[test]
    fn oversized_aggressor_rests_its_residual() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.add(&mut sink, 1, 10, Side::Sell, 100, 3);
        b.add(&mut sink, 2, 20, Side::Sell, 101, 4);

        sink = VecSink::default();
        b.add(&mut sink, 3, 30, Side::Buy, 101, 10);

        // Both ask levels sweep, then 3 rests as a bid at 101.
        let add: Vec<_> = sink.updates.iter().filter(|u| u.kind == UpdateKind::Add).collect();
        assert_eq!(add.len(), 1);
        assert_eq!((add[0].side, add[0].price, add[0].qty), (Side::Buy, 101, 3));
        assert_eq!(b.bbo(), Bbo { bid_price: 101, bid_qty: 3, ask_price: PRICE_INVALID, ask_qty: 0 });
        assert_invariants(&b);
    }

    #[test]
    fn priority_restarts_when_a_level_is_recreated() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.add(&mut sink, 1, 10, Side::Buy, 100, 5);
        b.add(&mut sink, 1, 11, Side::Buy, 100, 5);
        b.cancel(&mut sink, 1, 10);
        b.cancel(&mut sink, 1, 11);

        sink = VecSink::default();
        b.add(&mut sink, 1, 12, Side::Buy, 100, 5);
        assert_eq!(sink.updates[0].priority, 1);
        assert_invariants(&b);
    }

    #[test]
    fn self_match_fills_both_sides_of_one_client() {
        let mut b = book();
        let mut sink = VecSink::default();
        b.add(&mut sink, 4, 40, Side::Buy, 100, 5);

        sink = VecSink::default();
        b.add(&mut sink, 4, 41, Side::Sell, 100, 5);
        let fills: Vec<_> = sink.responses.iter().filter(|r| r.kind == ResponseKind::Filled).collect();
        assert_eq!(fills.len(), 2);
        assert!(fills.iter().all(|r| r.client_id == 4));
        assert_eq!(b.order_count(), 0);
    }

    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }
    }

    #[test]
    fn randomized_operations_hold_every_invariant() {
        let mut rng = XorShift(0x9e3779b97f4a7c15);
        let mut b = TickerBook::new(3, 4096, 64);
        let mut sink = VecSink::default();
        let mut next_coid: OrderId = 1;
        let mut live: Vec<(ClientId, OrderId)> = Vec::new();
        let mut original_qty: HashMap<(ClientId, OrderId), u64> = HashMap::new();
        let mut filled_qty: HashMap<(ClientId, OrderId), u64> = HashMap::new();

        for _ in 0..5_000 {
            let roll = rng.next() % 100;
            if roll < 70 || live.is_empty() {
                let client_id = (rng.next() % 5) as ClientId;
                let side = if rng.next() % 2 == 0 { Side::Buy } else { Side::Sell };
                let price = 90 + (rng.next() % 21) as Price;
                let qty = 1 + (rng.next() % 50) as Qty;
                let coid = next_coid;
                next_coid += 1;
                original_qty.insert((client_id, coid), qty as u64);
                b.add(&mut sink, client_id, coid, side, price, qty);
            } else if roll < 90 {
                let pick = (rng.next() as usize) % live.len();
                let (client_id, coid) = live[pick];
                b.cancel(&mut sink, client_id, coid);
            } else {
                // Cancel something that never existed.
                b.cancel(&mut sink, (rng.next() % 5) as ClientId, OrderId::MAX - (rng.next() % 7));
            }

            for r in sink.responses.drain(..) {
                if r.kind == ResponseKind::Filled {
                    *filled_qty.entry((r.client_id, r.client_order_id)).or_insert(0) += r.exec_qty as u64;
                }
            }
            sink.updates.clear();

            live = b.client_index.keys().copied().collect();
            live.sort_unstable();
            assert_invariants(&b);
        }

        // Cumulative fills never exceed an order's original size.
        for (key, filled) in &filled_qty {
            assert!(
                filled <= &original_qty[key],
                "order {key:?} overfilled: {filled} > {}",
                original_qty[key]
            );
        }
    }
}
