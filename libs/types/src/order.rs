//! Signed limit orders
//!
//! An [`Order`] is immutable: its id is the SHA-256 hash of the signed
//! content, and the signature binds every matched field to the sender's
//! key. A [`LimitOrder`] is the book-resident view of an order together
//! with its remaining unfilled amount.

use crate::assets::{Address, AssetPair, PublicKey};
use crate::numeric::{Amount, Price};
use ed25519_dalek::{Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest allowed distance between an order's timestamp and expiration.
pub const MAX_ORDER_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Content hash identifying an order. Serialized as 64 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderId(pub [u8; 32]);

impl OrderId {
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        bytes.try_into().ok().map(OrderId)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for OrderId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OrderId::parse(&s).ok_or_else(|| serde::de::Error::custom("invalid order id"))
    }
}

/// An ed25519 signature. Serialized as 128 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub ed25519_dalek::Signature);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.to_bytes()))
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Signature(ed25519_dalek::Signature::from_bytes(&arr)))
    }
}

/// An immutable signed limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub sender: PublicKey,
    pub pair: AssetPair,
    pub side: Side,
    pub price: Price,
    pub amount: Amount,
    pub timestamp: i64,
    pub expiration: i64,
    pub matcher_fee: u64,
    pub signature: Signature,
}

impl Order {
    /// Assemble an order from its parts, deriving the content-hash id.
    /// The signature is taken as given; call [`Order::verify_signature`]
    /// to check it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender: PublicKey,
        pair: AssetPair,
        side: Side,
        price: Price,
        amount: Amount,
        timestamp: i64,
        expiration: i64,
        matcher_fee: u64,
        signature: Signature,
    ) -> Self {
        let content = Self::content_bytes(
            &sender,
            &pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            matcher_fee,
        );
        let id = OrderId(Sha256::digest(&content).into());
        Self {
            id,
            sender,
            pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            matcher_fee,
            signature,
        }
    }

    /// Build and sign an order with the sender's key.
    #[allow(clippy::too_many_arguments)]
    pub fn signed(
        key: &SigningKey,
        pair: AssetPair,
        side: Side,
        price: Price,
        amount: Amount,
        timestamp: i64,
        expiration: i64,
        matcher_fee: u64,
    ) -> Self {
        let sender = PublicKey(key.verifying_key());
        let content = Self::content_bytes(
            &sender,
            &pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            matcher_fee,
        );
        let signature = Signature(key.sign(&content));
        Self::new(
            sender,
            pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            matcher_fee,
            signature,
        )
    }

    /// Deterministic byte encoding of the signed fields.
    #[allow(clippy::too_many_arguments)]
    fn content_bytes(
        sender: &PublicKey,
        pair: &AssetPair,
        side: Side,
        price: Price,
        amount: Amount,
        timestamp: i64,
        expiration: i64,
        matcher_fee: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&sender.to_bytes());
        buf.extend_from_slice(&pair.amount_asset.content_bytes());
        buf.extend_from_slice(&pair.price_asset.content_bytes());
        buf.push(match side {
            Side::Buy => 0,
            Side::Sell => 1,
        });
        buf.extend_from_slice(&price.value().to_le_bytes());
        buf.extend_from_slice(&amount.value().to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&expiration.to_le_bytes());
        buf.extend_from_slice(&matcher_fee.to_le_bytes());
        buf
    }

    /// Check the signature against the sender's key, and that the stored
    /// id matches the content.
    pub fn verify_signature(&self) -> bool {
        let content = Self::content_bytes(
            &self.sender,
            &self.pair,
            self.side,
            self.price,
            self.amount,
            self.timestamp,
            self.expiration,
            self.matcher_fee,
        );
        let id_ok = OrderId(Sha256::digest(&content).into()) == self.id;
        id_ok && self.sender.0.verify(&content, &self.signature.0).is_ok()
    }

    pub fn sender_address(&self) -> Address {
        self.sender.address()
    }
}

/// A signed request to cancel a resident order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub sender: PublicKey,
    pub order_id: OrderId,
    pub signature: Signature,
}

impl CancelOrderRequest {
    pub fn signed(key: &SigningKey, order_id: OrderId) -> Self {
        let sender = PublicKey(key.verifying_key());
        let signature = Signature(key.sign(&order_id.0));
        Self {
            sender,
            order_id,
            signature,
        }
    }

    pub fn verify_signature(&self) -> bool {
        self.sender.0.verify(&self.order_id.0, &self.signature.0).is_ok()
    }
}

/// A book-resident view of an order and its unfilled remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub order: Order,
    pub remaining: u64,
}

impl LimitOrder {
    pub fn new(order: Order) -> Self {
        let remaining = order.amount.value();
        Self { order, remaining }
    }

    /// The same order with a smaller remainder, after a partial fill.
    pub fn partial(&self, remaining: u64) -> Self {
        debug_assert!(remaining <= self.order.amount.value());
        Self {
            order: self.order.clone(),
            remaining,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.remaining == 0
    }

    pub fn id(&self) -> OrderId {
        self.order.id
    }

    pub fn price(&self) -> Price {
        self.order.price
    }

    pub fn side(&self) -> Side {
        self.order.side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetId;

    fn test_pair() -> AssetPair {
        AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native)
    }

    fn test_order(seed: u8, side: Side, price: u64, amount: u64) -> Order {
        let key = SigningKey::from_bytes(&[seed; 32]);
        Order::signed(
            &key,
            test_pair(),
            side,
            Price::new(price).unwrap(),
            Amount::new(amount).unwrap(),
            1_700_000_000_000,
            1_700_000_060_000,
            300_000,
        )
    }

    #[test]
    fn test_signed_order_verifies() {
        let order = test_order(1, Side::Buy, 10, 100);
        assert!(order.verify_signature());
    }

    #[test]
    fn test_tampered_order_fails_verification() {
        let mut order = test_order(1, Side::Buy, 10, 100);
        order.matcher_fee += 1;
        assert!(!order.verify_signature());
    }

    #[test]
    fn test_wrong_signer_fails_verification() {
        let order = test_order(1, Side::Buy, 10, 100);
        let other = SigningKey::from_bytes(&[2u8; 32]);
        let forged = Order::new(
            PublicKey(other.verifying_key()),
            order.pair,
            order.side,
            order.price,
            order.amount,
            order.timestamp,
            order.expiration,
            order.matcher_fee,
            order.signature,
        );
        assert!(!forged.verify_signature());
    }

    #[test]
    fn test_id_is_content_hash() {
        let a = test_order(1, Side::Buy, 10, 100);
        let b = test_order(1, Side::Buy, 10, 100);
        assert_eq!(a.id, b.id);
        let c = test_order(1, Side::Buy, 11, 100);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_limit_order_partial() {
        let order = test_order(1, Side::Sell, 10, 100);
        let lo = LimitOrder::new(order);
        assert_eq!(lo.remaining, 100);
        assert!(!lo.is_filled());

        let rest = lo.partial(40);
        assert_eq!(rest.remaining, 40);
        assert_eq!(rest.id(), lo.id());

        let done = lo.partial(0);
        assert!(done.is_filled());
    }

    #[test]
    fn test_cancel_request_signature() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let order = test_order(3, Side::Buy, 10, 100);
        let req = CancelOrderRequest::signed(&key, order.id);
        assert!(req.verify_signature());

        let other = SigningKey::from_bytes(&[4u8; 32]);
        let forged = CancelOrderRequest {
            sender: PublicKey(other.verifying_key()),
            ..req
        };
        assert!(!forged.verify_signature());
    }

    #[test]
    fn test_order_serde_roundtrip() {
        let order = test_order(5, Side::Sell, 25, 400);
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
        assert!(back.verify_signature());
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
