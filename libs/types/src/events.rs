//! Order book events and exchange transactions
//!
//! Events are the unit of journal persistence, book mutation, and history
//! projection. An execution additionally produces a matcher-signed
//! [`ExchangeTransaction`] for the settlement layer.

use crate::assets::{AssetPair, PublicKey};
use crate::numeric::Price;
use crate::order::{LimitOrder, Order, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single state transition of one pair's order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBookEvent {
    /// The order rested in the book without matching.
    OrderAdded { order: LimitOrder },
    /// One matching step: `submitted` traded `executed_amount` against the
    /// resident `counter` at the counter's price.
    OrderExecuted {
        submitted: LimitOrder,
        counter: LimitOrder,
        executed_amount: u64,
    },
    /// The order left the book unfilled (user cancel, settlement
    /// rejection of the counter, or dust residual).
    OrderCanceled { order: LimitOrder },
}

impl OrderBookEvent {
    /// Stable tag recorded alongside the journal payload.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderBookEvent::OrderAdded { .. } => "OrderAdded",
            OrderBookEvent::OrderExecuted { .. } => "OrderExecuted",
            OrderBookEvent::OrderCanceled { .. } => "OrderCanceled",
        }
    }
}

/// Identifier of an exchange transaction (content hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for TxId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("tx id must be 32 bytes"))?;
        Ok(TxId(arr))
    }
}

/// A settlement-layer transaction binding both sides of one execution.
///
/// Signed by the matcher; the embedded orders carry the participants' own
/// signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTransaction {
    pub id: TxId,
    pub buy_order: Order,
    pub sell_order: Order,
    pub price: Price,
    pub amount: u64,
    pub buy_matcher_fee: u64,
    pub sell_matcher_fee: u64,
    pub fee: u64,
    pub timestamp: i64,
    pub matcher: PublicKey,
    pub signature: Signature,
}

impl ExchangeTransaction {
    /// Deterministic byte encoding of the signed fields.
    pub fn content_bytes(
        buy_order: &Order,
        sell_order: &Order,
        price: Price,
        amount: u64,
        buy_matcher_fee: u64,
        sell_matcher_fee: u64,
        fee: u64,
        timestamp: i64,
        matcher: &PublicKey,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160);
        buf.extend_from_slice(&buy_order.id.0);
        buf.extend_from_slice(&sell_order.id.0);
        buf.extend_from_slice(&price.value().to_le_bytes());
        buf.extend_from_slice(&amount.to_le_bytes());
        buf.extend_from_slice(&buy_matcher_fee.to_le_bytes());
        buf.extend_from_slice(&sell_matcher_fee.to_le_bytes());
        buf.extend_from_slice(&fee.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&matcher.to_bytes());
        buf
    }

    pub fn content_hash(content: &[u8]) -> TxId {
        TxId(Sha256::digest(content).into())
    }

    pub fn verify_signature(&self) -> bool {
        use ed25519_dalek::Verifier;
        let content = Self::content_bytes(
            &self.buy_order,
            &self.sell_order,
            self.price,
            self.amount,
            self.buy_matcher_fee,
            self.sell_matcher_fee,
            self.fee,
            self.timestamp,
            &self.matcher,
        );
        self.matcher.0.verify(&content, &self.signature.0).is_ok()
    }
}

/// Dispatcher log record: a pair became known and got a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookCreated {
    pub pair: AssetPair,
    pub timestamp: i64,
}
