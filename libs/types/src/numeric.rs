//! Integer fixed-point numerics for prices and amounts
//!
//! All matching arithmetic is exact integer math. A price is expressed in
//! price-asset base units per amount-asset unit, scaled by [`PRICE_SCALE`];
//! an amount is expressed in amount-asset base units. Both are strictly
//! positive at construction. Serialized as plain integers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale for prices: one whole amount-asset unit.
pub const PRICE_SCALE: u64 = 100_000_000;

/// A limit price in scaled price-asset base units.
///
/// Ordering is plain integer ordering, which makes `BTreeMap<Price, _>`
/// iteration deterministic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u64", into = "u64")]
pub struct Price(u64);

impl Price {
    /// Create a price, returning `None` unless it is positive.
    pub fn new(value: u64) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Price {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Price::new(value).ok_or_else(|| "price must be positive".to_string())
    }
}

impl From<Price> for u64 {
    fn from(price: Price) -> u64 {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An order amount in amount-asset base units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    /// Create an amount, returning `None` unless it is positive.
    pub fn new(value: u64) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Amount::new(value).ok_or_else(|| "amount must be positive".to_string())
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> u64 {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Price-asset value of trading `amount` at `price`, in price-asset base
/// units. Exact only when [`is_settleable`] holds; callers that need the
/// exactness guarantee must check it first.
pub fn spend_value(amount: u64, price: Price) -> u64 {
    ((amount as u128 * price.value() as u128) / PRICE_SCALE as u128) as u64
}

/// Whether `amount` at `price` settles to a whole number of price-asset
/// base units. A residual that fails this check cannot be represented on
/// the settlement layer and is cancelled as dust.
pub fn is_settleable(amount: u64, price: Price) -> bool {
    amount > 0 && (amount as u128 * price.value() as u128) % PRICE_SCALE as u128 == 0
}

/// Fee share proportional to the executed fraction of an order.
pub fn prorated_fee(total_fee: u64, executed: u64, order_amount: u64) -> u64 {
    if order_amount == 0 {
        return 0;
    }
    ((total_fee as u128 * executed as u128) / order_amount as u128) as u64
}
