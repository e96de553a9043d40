//! Order-status and open-volume accounting
//!
//! [`OrderInfo`] and the per-address portfolio both form commutative
//! monoids under `combine`; the history projection reduces event deltas
//! into the stored values, which makes replay and recovery idempotent in
//! effect (re-derived deltas fold to the same totals).

use crate::assets::AssetId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated fill state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub amount: u64,
    pub filled: u64,
    pub canceled: bool,
}

impl OrderInfo {
    pub fn empty() -> Self {
        Self {
            amount: 0,
            filled: 0,
            canceled: false,
        }
    }

    /// Delta recorded when an order enters a book.
    pub fn added(amount: u64) -> Self {
        Self {
            amount,
            filled: 0,
            canceled: false,
        }
    }

    /// Delta recorded for one execution step.
    pub fn executed(amount: u64, filled: u64) -> Self {
        Self {
            amount,
            filled,
            canceled: false,
        }
    }

    /// Delta recorded on cancellation.
    pub fn canceled(amount: u64) -> Self {
        Self {
            amount,
            filled: 0,
            canceled: true,
        }
    }

    /// Monoid combine: amounts take the max, fills add, cancellation is
    /// sticky. Associative and commutative.
    pub fn combine(&self, other: &OrderInfo) -> OrderInfo {
        OrderInfo {
            amount: self.amount.max(other.amount),
            filled: self.filled + other.filled,
            canceled: self.canceled || other.canceled,
        }
    }

    pub fn status(&self) -> OrderStatus {
        if self.filled >= self.amount && self.amount > 0 {
            OrderStatus::Filled
        } else if self.canceled {
            OrderStatus::Cancelled {
                filled: self.filled,
            }
        } else if self.filled == 0 {
            OrderStatus::Accepted
        } else {
            OrderStatus::PartiallyFilled {
                filled: self.filled,
            }
        }
    }
}

/// Derived order status served to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "filled")]
pub enum OrderStatus {
    Accepted,
    PartiallyFilled { filled: u64 },
    Filled,
    Cancelled { filled: u64 },
}

impl OrderStatus {
    /// Terminal statuses admit no further transitions and make the order
    /// eligible for history deletion and index eviction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderStatus::Accepted => "Accepted",
            OrderStatus::PartiallyFilled { .. } => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled { .. } => "Cancelled",
        }
    }
}

/// Signed reservation deltas per asset for one address.
///
/// Deltas may be negative while combining (a release); the projection
/// clamps stored values at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioDelta(pub BTreeMap<AssetId, i64>);

impl PortfolioDelta {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, asset: AssetId, delta: i64) -> Self {
        self.add(asset, delta);
        self
    }

    pub fn add(&mut self, asset: AssetId, delta: i64) {
        *self.0.entry(asset).or_insert(0) += delta;
    }

    /// Asset-wise sum. Associative and commutative.
    pub fn combine(&self, other: &PortfolioDelta) -> PortfolioDelta {
        let mut out = self.clone();
        for (asset, delta) in &other.0 {
            out.add(*asset, *delta);
        }
        out
    }

    pub fn negate(&self) -> PortfolioDelta {
        PortfolioDelta(self.0.iter().map(|(a, d)| (*a, -d)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
