//! Domain error taxonomy
//!
//! Errors reported to order submitters and routing callers. These are
//! domain errors, not transport errors; the REST layer maps them onto
//! status codes.

use crate::assets::{AssetId, AssetPair};
use crate::order::OrderId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("Order signature is invalid")]
    InvalidSignature,

    #[error("Order expired at {expiration}")]
    OrderExpired { expiration: i64 },

    #[error("Order timestamp {timestamp} is outside the allowed window")]
    TimestampOutOfWindow { timestamp: i64 },

    #[error("Order amount must be positive")]
    NonPositiveAmount,

    #[error("Order price must be positive")]
    NonPositivePrice,

    #[error("Order fee {fee} is below the minimum {min}")]
    FeeTooLow { fee: u64, min: u64 },

    #[error("Asset {0} is blacklisted")]
    BlacklistedAsset(AssetId),

    #[error("Unknown asset {0}")]
    UnknownAsset(AssetId),

    #[error("Insufficient tradable balance for asset {asset}: required {required}, tradable {tradable}")]
    InsufficientTradableBalance {
        asset: AssetId,
        required: u64,
        tradable: u64,
    },

    #[error("Invalid AssetPair ordering, should be reversed: {0}")]
    InvalidPairOrdering(AssetPair),

    #[error("Invalid asset pair {0}")]
    InvalidPair(AssetPair),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Cancel request signature does not match the order sender")]
    CancelSignatureMismatch,

    #[error("Validation timed out")]
    ValidationTimeout,

    #[error("Settlement layer rejected the exchange transaction")]
    SettlementRejected,

    #[error("Residual amount is not settleable at this price")]
    DustResidual,

    #[error("Order couldn't be deleted")]
    OrderNotDeletable,

    #[error("Too many open orders: limit {0}")]
    TooManyOpenOrders(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetId;

    #[test]
    fn test_pair_ordering_message() {
        let pair = AssetPair::new(AssetId::Issued([1u8; 32]), AssetId::Native);
        let err = MatcherError::InvalidPairOrdering(pair.reverse());
        assert!(err
            .to_string()
            .starts_with("Invalid AssetPair ordering, should be reversed:"));
        assert!(err.to_string().contains("NATIVE"));
    }

    #[test]
    fn test_balance_message_names_the_asset() {
        let err = MatcherError::InsufficientTradableBalance {
            asset: AssetId::Native,
            required: 1000,
            tradable: 10,
        };
        let text = err.to_string();
        assert!(text.contains("NATIVE"));
        assert!(text.contains("1000"));
    }

    #[test]
    fn test_delete_rejection_message() {
        assert_eq!(
            MatcherError::OrderNotDeletable.to_string(),
            "Order couldn't be deleted"
        );
    }
}
