//! The per-pair order book
//!
//! Two priced sides plus a residency index `id → (side, price)` for O(1)
//! average cancellation. [`OrderBook::match_step`] is the single-step
//! matcher: it returns an event and mutates nothing; every mutation goes
//! through [`OrderBook::apply`], which is also the replay entry point.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::events::OrderBookEvent;
use types::numeric::Price;
use types::order::{LimitOrder, OrderId, Side};

use crate::book::{AskBook, BidBook};
use crate::crossing::crosses;

/// Most price levels ever returned per side in a depth view.
pub const MAX_DEPTH: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BidBook,
    asks: AskBook,
    residency: HashMap<OrderId, (Side, Price)>,
}

/// Aggregated depth per side, best price first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthView {
    pub bids: Vec<(Price, u64)>,
    pub asks: Vec<(Price, u64)>,
}

/// Serializable resident-order form; queue order is preserved per level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<LimitOrder>,
    pub asks: Vec<LimitOrder>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resident order at the tail of its price level.
    pub fn add(&mut self, order: LimitOrder) {
        self.residency
            .insert(order.id(), (order.side(), order.price()));
        match order.side() {
            Side::Buy => self.bids.insert(order),
            Side::Sell => self.asks.insert(order),
        }
    }

    /// Remove an order wherever it resides. Returns the cancellation
    /// event, or `None` if the id is not resident.
    pub fn cancel(&mut self, order_id: &OrderId) -> Option<OrderBookEvent> {
        let (side, price) = self.residency.remove(order_id)?;
        let removed = match side {
            Side::Buy => self.bids.remove(order_id, price),
            Side::Sell => self.asks.remove(order_id, price),
        }?;
        Some(OrderBookEvent::OrderCanceled { order: removed })
    }

    /// One matching step for an incoming order against the best opposite
    /// level. Mutates nothing; the caller persists the event and feeds it
    /// back through [`OrderBook::apply`].
    pub fn match_step(&self, incoming: &LimitOrder) -> OrderBookEvent {
        let best = match incoming.side() {
            Side::Buy => self.asks.best_order(),
            Side::Sell => self.bids.best_order(),
        };
        match best {
            Some(counter) if crosses(incoming.side(), incoming.price(), counter.price()) => {
                let executed_amount = incoming.remaining.min(counter.remaining);
                OrderBookEvent::OrderExecuted {
                    submitted: incoming.clone(),
                    counter: counter.clone(),
                    executed_amount,
                }
            }
            _ => OrderBookEvent::OrderAdded {
                order: incoming.clone(),
            },
        }
    }

    /// Apply an event. Used both live (after persistence) and on replay.
    pub fn apply(&mut self, event: &OrderBookEvent) {
        match event {
            OrderBookEvent::OrderAdded { order } => self.add(order.clone()),
            OrderBookEvent::OrderExecuted {
                counter,
                executed_amount,
                ..
            } => {
                // The counter is the head of its side's best level; the
                // submitted side is an incoming order and never resident.
                let popped = match counter.side() {
                    Side::Buy => self.bids.fill_best(*executed_amount),
                    Side::Sell => self.asks.fill_best(*executed_amount),
                };
                if let Some(order_id) = popped {
                    self.residency.remove(&order_id);
                }
            }
            OrderBookEvent::OrderCanceled { order } => {
                // Synthesized cancels of never-resident residuals are no-ops.
                self.cancel(&order.id());
            }
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn contains(&self, order_id: &OrderId) -> bool {
        self.residency.contains_key(order_id)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.residency.len()
    }

    /// Aggregated depth, truncated to `min(depth, MAX_DEPTH)` levels.
    pub fn depth(&self, depth: Option<usize>) -> DepthView {
        let depth = depth.unwrap_or(MAX_DEPTH).min(MAX_DEPTH);
        DepthView {
            bids: self.bids.depth(depth),
            asks: self.asks.depth(depth),
        }
    }

    /// Every resident order: bids then asks, best price first, queue
    /// order within a level.
    pub fn resident_orders(&self) -> Vec<LimitOrder> {
        let mut out = self.bids.orders();
        out.extend(self.asks.orders());
        out
    }

    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bids: self.bids.orders(),
            asks: self.asks.orders(),
        }
    }

    /// Rebuild from a snapshot, recomputing level totals and the
    /// residency index.
    pub fn from_snapshot(snapshot: BookSnapshot) -> Self {
        let mut book = OrderBook::new();
        for order in snapshot.bids.into_iter().chain(snapshot.asks) {
            book.add(order);
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use types::assets::{AssetId, AssetPair};
    use types::numeric::Amount;
    use types::order::Order;

    fn pair() -> AssetPair {
        AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native)
    }

    fn limit_order(seed: u8, side: Side, price: u64, amount: u64) -> LimitOrder {
        let key = SigningKey::from_bytes(&[seed; 32]);
        LimitOrder::new(Order::signed(
            &key,
            pair(),
            side,
            Price::new(price).unwrap(),
            Amount::new(amount).unwrap(),
            1_700_000_000_000 + seed as i64,
            1_700_000_060_000,
            300_000,
        ))
    }

    #[test]
    fn test_match_step_no_opposite_side_rests() {
        let book = OrderBook::new();
        let incoming = limit_order(1, Side::Buy, 100, 10);

        match book.match_step(&incoming) {
            OrderBookEvent::OrderAdded { order } => assert_eq!(order.id(), incoming.id()),
            other => panic!("expected OrderAdded, got {:?}", other),
        }
    }

    #[test]
    fn test_match_step_non_crossing_rests() {
        let mut book = OrderBook::new();
        book.add(limit_order(1, Side::Sell, 110, 10));

        let incoming = limit_order(2, Side::Buy, 100, 10);
        assert!(matches!(
            book.match_step(&incoming),
            OrderBookEvent::OrderAdded { .. }
        ));
    }

    #[test]
    fn test_match_step_does_not_mutate() {
        let mut book = OrderBook::new();
        let resting = limit_order(1, Side::Sell, 100, 10);
        book.add(resting.clone());

        let incoming = limit_order(2, Side::Buy, 100, 10);
        let _ = book.match_step(&incoming);

        assert!(book.contains(&resting.id()));
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn test_match_step_crossing_takes_min_amount() {
        let mut book = OrderBook::new();
        let resting = limit_order(1, Side::Sell, 100, 60);
        book.add(resting.clone());

        let incoming = limit_order(2, Side::Buy, 100, 40);
        match book.match_step(&incoming) {
            OrderBookEvent::OrderExecuted {
                submitted,
                counter,
                executed_amount,
            } => {
                assert_eq!(submitted.id(), incoming.id());
                assert_eq!(counter.id(), resting.id());
                assert_eq!(executed_amount, 40);
            }
            other => panic!("expected OrderExecuted, got {:?}", other),
        }
    }

    #[test]
    fn test_match_step_prefers_best_price() {
        let mut book = OrderBook::new();
        let cheap = limit_order(1, Side::Sell, 90, 10);
        book.add(limit_order(2, Side::Sell, 100, 10));
        book.add(cheap.clone());

        let incoming = limit_order(3, Side::Buy, 100, 5);
        match book.match_step(&incoming) {
            OrderBookEvent::OrderExecuted { counter, .. } => {
                assert_eq!(counter.id(), cheap.id());
            }
            other => panic!("expected OrderExecuted, got {:?}", other),
        }
    }

    #[test]
    fn test_match_step_fifo_within_level() {
        let mut book = OrderBook::new();
        let first = limit_order(1, Side::Sell, 100, 10);
        let second = limit_order(2, Side::Sell, 100, 10);
        book.add(first.clone());
        book.add(second);

        let incoming = limit_order(3, Side::Buy, 100, 5);
        match book.match_step(&incoming) {
            OrderBookEvent::OrderExecuted { counter, .. } => {
                assert_eq!(counter.id(), first.id());
            }
            other => panic!("expected OrderExecuted, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_executed_reduces_counter() {
        let mut book = OrderBook::new();
        let resting = limit_order(1, Side::Sell, 100, 60);
        book.add(resting.clone());

        let incoming = limit_order(2, Side::Buy, 100, 40);
        let event = book.match_step(&incoming);
        book.apply(&event);

        assert!(book.contains(&resting.id()));
        assert_eq!(book.depth(None).asks[0].1, 20);
    }

    #[test]
    fn test_apply_executed_pops_filled_counter() {
        let mut book = OrderBook::new();
        let resting = limit_order(1, Side::Sell, 100, 40);
        book.add(resting.clone());

        let incoming = limit_order(2, Side::Buy, 100, 40);
        let event = book.match_step(&incoming);
        book.apply(&event);

        assert!(!book.contains(&resting.id()));
        assert!(book.is_empty());
    }

    #[test]
    fn test_cancel_removes_and_excises_level() {
        let mut book = OrderBook::new();
        let order = limit_order(1, Side::Buy, 100, 10);
        book.add(order.clone());

        match book.cancel(&order.id()) {
            Some(OrderBookEvent::OrderCanceled { order: removed }) => {
                assert_eq!(removed.id(), order.id());
            }
            other => panic!("expected OrderCanceled, got {:?}", other),
        }
        assert!(book.is_empty());
        assert!(book.cancel(&order.id()).is_none());
    }

    #[test]
    fn test_no_duplicate_residency() {
        let mut book = OrderBook::new();
        let order = limit_order(1, Side::Buy, 100, 10);
        book.add(order.clone());

        let resident = book.resident_orders();
        let matches = resident.iter().filter(|lo| lo.id() == order.id()).count();
        assert_eq!(matches, 1);
    }

    #[test]
    fn test_books_stay_uncrossed_after_applies() {
        let mut book = OrderBook::new();
        book.add(limit_order(1, Side::Buy, 100, 10));
        book.add(limit_order(2, Side::Sell, 110, 10));

        // Drive an incoming buy at 110 through match/apply until it rests
        // or fills; afterwards best bid must stay below best ask.
        let mut incoming = limit_order(3, Side::Buy, 110, 15);
        loop {
            let event = book.match_step(&incoming);
            book.apply(&event);
            match event {
                OrderBookEvent::OrderExecuted {
                    submitted,
                    executed_amount,
                    ..
                } => {
                    let rest = submitted.remaining - executed_amount;
                    if rest == 0 {
                        break;
                    }
                    incoming = incoming.partial(rest);
                }
                _ => break,
            }
        }

        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            assert!(bid < ask, "book crossed: bid {} >= ask {}", bid, ask);
        }
    }

    #[test]
    fn test_depth_is_capped() {
        let mut book = OrderBook::new();
        for i in 0..60u8 {
            book.add(limit_order(i, Side::Buy, 100 + i as u64, 1));
        }
        let view = book.depth(Some(1000));
        assert_eq!(view.bids.len(), MAX_DEPTH);

        let shallow = book.depth(Some(3));
        assert_eq!(shallow.bids.len(), 3);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_queue_order() {
        let mut book = OrderBook::new();
        let first = limit_order(1, Side::Sell, 100, 10);
        let second = limit_order(2, Side::Sell, 100, 20);
        book.add(first.clone());
        book.add(second);
        book.add(limit_order(3, Side::Buy, 90, 5));

        let restored = OrderBook::from_snapshot(book.snapshot());
        assert_eq!(restored.order_count(), 3);
        assert_eq!(restored.best_bid(), book.best_bid());
        assert_eq!(restored.best_ask(), book.best_ask());

        // Time priority survives the roundtrip.
        let incoming = limit_order(4, Side::Buy, 100, 5);
        match restored.match_step(&incoming) {
            OrderBookEvent::OrderExecuted { counter, .. } => {
                assert_eq!(counter.id(), first.id());
            }
            other => panic!("expected OrderExecuted, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_canceled_for_non_resident_is_noop() {
        let mut book = OrderBook::new();
        book.add(limit_order(1, Side::Buy, 100, 10));

        let stranger = limit_order(2, Side::Buy, 100, 10);
        book.apply(&OrderBookEvent::OrderCanceled { order: stranger });
        assert_eq!(book.order_count(), 1);
    }
}
