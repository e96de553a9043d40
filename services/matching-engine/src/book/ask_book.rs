//! Ask (sell) side
//!
//! Mirror of the bid side with the opposite best: the lowest price wins,
//! so iteration runs front-to-back.

use std::collections::BTreeMap;
use types::numeric::Price;
use types::order::{LimitOrder, OrderId};

use super::price_level::PriceLevel;

#[derive(Debug, Clone, Default)]
pub struct AskBook {
    levels: BTreeMap<Price, PriceLevel>,
}

impl AskBook {
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
        self.levels.keys().next().copied()
    }

    pub fn best_order(&self) -> Option<&LimitOrder> {
        self.levels.values().next().and_then(|level| level.front())
    }

    /// Fill the head of the best level; drops the level if it empties.
    /// Returns the id of the popped order, if the head filled completely.
    pub fn fill_best(&mut self, executed: u64) -> Option<OrderId> {
        let (price, level) = self.levels.iter_mut().next()?;
        let price = *price;
        let popped = level.fill_front(executed);
        if level.is_empty() {
            self.levels.remove(&price);
        }
        popped
    }

    /// Top `depth` levels, best (lowest) price first.
    pub fn depth(&self, depth: usize) -> Vec<(Price, u64)> {
        self.levels
            .iter()
            .take(depth)
            .map(|(price, level)| (*price, level.total_amount()))
            .collect()
    }

    /// Every resident order, best price first, queue order within a level.
    pub fn orders(&self) -> Vec<LimitOrder> {
        self.levels
            .values()
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

    fn ask(seed: u8, price: u64, amount: u64) -> LimitOrder {
        let key = SigningKey::from_bytes(&[seed; 32]);
        LimitOrder::new(Order::signed(
            &key,
            AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native),
            Side::Sell,
            Price::new(price).unwrap(),
            Amount::new(amount).unwrap(),
            1_700_000_000_000,
            1_700_000_060_000,
            300_000,
        ))
    }

    #[test]
    fn test_best_ask_is_lowest_price() {
        let mut book = AskBook::new();
        book.insert(ask(1, 100, 10));
        book.insert(ask(2, 80, 20));
        book.insert(ask(3, 120, 30));

        assert_eq!(book.best_price(), Some(Price::new(80).unwrap()));
        assert_eq!(book.best_order().unwrap().remaining, 20);
    }

    #[test]
    fn test_depth_orders_best_first() {
        let mut book = AskBook::new();
        book.insert(ask(1, 100, 10));
        book.insert(ask(2, 80, 20));
        book.insert(ask(3, 90, 15));

        let depth = book.depth(2);
        assert_eq!(depth[0], (Price::new(80).unwrap(), 20));
        assert_eq!(depth[1], (Price::new(90).unwrap(), 15));
    }

    #[test]
    fn test_fill_best_partial_keeps_level() {
        let mut book = AskBook::new();
        book.insert(ask(1, 80, 20));

        assert_eq!(book.fill_best(5), None);
        assert_eq!(book.best_order().unwrap().remaining, 15);
        assert_eq!(book.level_count(), 1);
    }
}
