//! Bid (buy) side
//!
//! Price levels in a `BTreeMap`; the best bid is the highest price, so
//! iteration for matching and depth runs back-to-front.

use std::collections::BTreeMap;
use types::numeric::Price;
use types::order::{LimitOrder, OrderId};

use super::price_level::PriceLevel;

#[derive(Debug, Clone, Default)]
pub struct BidBook {
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, order: LimitOrder) {
        self.levels
            .entry(order.price())
            .or_insert_with(PriceLevel::new)
            .push_back(order);
    }

    /// Remove by id at a known price; drops the level if it empties.
    pub fn remove(&mut self, order_id: &OrderId, price: Price) -> Option<LimitOrder> {
        let level = self.levels.get_mut(&price)?;
        let removed = level.remove(order_id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(removed)
    }

    pub fn best_price(&self) -> Option<Price> {
        self.levels.keys().next_back().copied()
    }

    pub fn best_order(&self) -> Option<&LimitOrder> {
        self.levels.values().next_back().and_then(|level| level.front())
    }

    /// Fill the head of the best level; drops the level if it empties.
    /// Returns the id of the popped order, if the head filled completely.
    pub fn fill_best(&mut self, executed: u64) -> Option<OrderId> {
        let (price, level) = self.levels.iter_mut().next_back()?;
        let price = *price;
        let popped = level.fill_front(executed);
        if level.is_empty() {
            self.levels.remove(&price);
        }
        popped
    }

    /// Top `depth` levels, best (highest) price first.
    pub fn depth(&self, depth: usize) -> Vec<(Price, u64)> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(price, level)| (*price, level.total_amount()))
            .collect()
    }

    /// Every resident order, best price first, queue order within a level.
    pub fn orders(&self) -> Vec<LimitOrder> {
        self.levels
            .values()
            .rev()
            .flat_map(|level| level.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use types::assets::{AssetId, AssetPair};
    use types::numeric::Amount;
    use types::order::{Order, Side};

    fn bid(seed: u8, price: u64, amount: u64) -> LimitOrder {
        let key = SigningKey::from_bytes(&[seed; 32]);
        LimitOrder::new(Order::signed(
            &key,
            AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native),
            Side::Buy,
            Price::new(price).unwrap(),
            Amount::new(amount).unwrap(),
            1_700_000_000_000,
            1_700_000_060_000,
            300_000,
        ))
    }

    #[test]
    fn test_best_bid_is_highest_price() {
        let mut book = BidBook::new();
        book.insert(bid(1, 100, 10));
        book.insert(bid(2, 120, 20));
        book.insert(bid(3, 90, 30));

        assert_eq!(book.best_price(), Some(Price::new(120).unwrap()));
        assert_eq!(book.best_order().unwrap().remaining, 20);
    }

    #[test]
    fn test_remove_drops_empty_level() {
        let mut book = BidBook::new();
        let order = bid(1, 100, 10);
        book.insert(order.clone());

        assert!(book.remove(&order.id(), order.price()).is_some());
        assert!(book.is_empty());
    }

    #[test]
    fn test_depth_orders_best_first() {
        let mut book = BidBook::new();
        book.insert(bid(1, 100, 10));
        book.insert(bid(2, 120, 20));
        book.insert(bid(3, 110, 15));
        book.insert(bid(4, 90, 5));

        let depth = book.depth(2);
        assert_eq!(depth.len(), 2);
        assert_eq!(depth[0], (Price::new(120).unwrap(), 20));
        assert_eq!(depth[1], (Price::new(110).unwrap(), 15));
    }

    #[test]
    fn test_fill_best_pops_and_excises() {
        let mut book = BidBook::new();
        let order = bid(1, 100, 10);
        book.insert(order.clone());

        assert_eq!(book.fill_best(10), Some(order.id()));
        assert!(book.is_empty());
    }

    #[test]
    fn test_same_price_aggregates_into_one_level() {
        let mut book = BidBook::new();
        book.insert(bid(1, 100, 10));
        book.insert(bid(2, 100, 20));

        assert_eq!(book.level_count(), 1);
        assert_eq!(book.depth(1)[0].1, 30);
    }
}
