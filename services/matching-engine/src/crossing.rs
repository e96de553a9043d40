//! Crossing detection
//!
//! An incoming buy crosses when its price reaches the best ask; an
//! incoming sell crosses when its price reaches down to the best bid.
//! Comparisons are exact integer.

use types::numeric::Price;
use types::order::Side;

/// Whether an incoming order at `incoming_price` can trade against the
/// best opposite level at `best_price`.
pub fn crosses(incoming_side: Side, incoming_price: Price, best_price: Price) -> bool {
    match incoming_side {
        Side::Buy => incoming_price >= best_price,
        Side::Sell => incoming_price <= best_price,
    }
}
