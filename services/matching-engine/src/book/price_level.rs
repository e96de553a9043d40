//! Price level with FIFO time priority
//!
//! A level owns every resident order at one price, in arrival order.
//! Empty levels are never kept; the owning side deletes them as soon as
//! the last order leaves.

use std::collections::VecDeque;
use types::order::{LimitOrder, OrderId};

#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    orders: VecDeque<LimitOrder>,
    total_amount: u64,
}

impl PriceLevel {
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_amount: 0,
        }
    }

    /// Append at the tail: latest arrival, lowest time priority.
    pub fn push_back(&mut self, order: LimitOrder) {
        self.total_amount += order.remaining;
        self.orders.push_back(order);
    }

    /// Remove an order by id, wherever it sits in the queue.
    pub fn remove(&mut self, order_id: &OrderId) -> Option<LimitOrder> {
        let position = self.orders.iter().position(|lo| lo.id() == *order_id)?;
        let removed = self.orders.remove(position)?;
        self.total_amount -= removed.remaining;
        Some(removed)
    }

    /// The order with the best time priority.
    pub fn front(&self) -> Option<&LimitOrder> {
        self.orders.front()
    }

    pub fn pop_front(&mut self) -> Option<LimitOrder> {
        let removed = self.orders.pop_front()?;
        self.total_amount -= removed.remaining;
        Some(removed)
    }

    /// Reduce the front order's remainder by `executed`; pops it when it
    /// fills completely. Returns the id of the popped order, if any.
    pub fn fill_front(&mut self, executed: u64) -> Option<OrderId> {
        let front = self.orders.front_mut()?;
        let executed = executed.min(front.remaining);
        front.remaining -= executed;
        self.total_amount -= executed;
        if front.is_filled() {
            self.orders.pop_front().map(|lo| lo.id())
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LimitOrder> {
        self.orders.iter()
    }
}
