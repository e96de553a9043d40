//! Assets, addresses, and trading pairs
//!
//! An asset is either the native chain asset or a 32-byte issued asset id.
//! Addresses are derived from ed25519 public keys. A trading pair is the
//! unordered `{amount asset, price asset}` combination; its canonical
//! orientation is decided by the dispatcher, not here.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of a tradable asset.
///
/// The native asset sorts before any issued asset; issued assets compare
/// by their id bytes. Serialized as the string `"NATIVE"` or 64 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetId {
    Native,
    Issued([u8; 32]),
}

impl AssetId {
    /// Parse from the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "NATIVE" {
            return Some(AssetId::Native);
        }
        let bytes = hex::decode(s).ok()?;
        let id: [u8; 32] = bytes.try_into().ok()?;
        Some(AssetId::Issued(id))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, AssetId::Native)
    }

    /// Bytes fed into order and transaction content hashes.
    pub fn content_bytes(&self) -> Vec<u8> {
        match self {
            AssetId::Native => vec![0u8],
            AssetId::Issued(id) => {
                let mut out = Vec::with_capacity(33);
                out.push(1u8);
                out.extend_from_slice(id);
                out
            }
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => write!(f, "NATIVE"),
            AssetId::Issued(id) => write!(f, "{}", hex::encode(id)),
        }
    }
}

impl Serialize for AssetId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AssetId::parse(&s).ok_or_else(|| serde::de::Error::custom("invalid asset id"))
    }
}

/// An account's ed25519 verifying key. Serialized as 64 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        VerifyingKey::from_bytes(bytes).ok().map(PublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The address derived from this key.
    pub fn address(&self) -> Address {
        let digest = Sha256::digest(self.0.as_bytes());
        Address(digest.into())
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state);
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.as_bytes()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        PublicKey::from_bytes(&arr)
            .ok_or_else(|| serde::de::Error::custom("invalid ed25519 public key"))
    }
}

/// A 32-byte account address (SHA-256 of the public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        bytes.try_into().ok().map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).ok_or_else(|| serde::de::Error::custom("invalid address"))
    }
}

/// A trading pair: `amount_asset` priced in `price_asset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub amount_asset: AssetId,
    pub price_asset: AssetId,
}

impl AssetPair {
    pub fn new(amount_asset: AssetId, price_asset: AssetId) -> Self {
        Self {
            amount_asset,
            price_asset,
        }
    }

    /// Both assets of a pair must be distinct.
    pub fn is_well_formed(&self) -> bool {
        self.amount_asset != self.price_asset
    }

    pub fn reverse(&self) -> Self {
        Self {
            amount_asset: self.price_asset,
            price_asset: self.amount_asset,
        }
    }

    pub fn contains(&self, asset: &AssetId) -> bool {
        &self.amount_asset == asset || &self.price_asset == asset
    }

    /// Filesystem-safe identifier used for journal and snapshot directories.
    pub fn key(&self) -> String {
        format!("{}-{}", self.amount_asset, self.price_asset)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.amount_asset, self.price_asset)
    }
}

/// Issue metadata of an asset as reported by the settlement state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueMetadata {
    pub name: String,
    pub decimals: u8,
    pub total_supply: u64,
    pub issued_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn test_key(seed: u8) -> PublicKey {
        let signing = SigningKey::from_bytes(&[seed; 32]);
        PublicKey(signing.verifying_key())
    }

    #[test]
    fn test_native_sorts_before_issued() {
        let native = AssetId::Native;
        let issued = AssetId::Issued([0u8; 32]);
        assert!(native < issued);
    }

    #[test]
    fn test_issued_assets_sort_by_bytes() {
        let a = AssetId::Issued([1u8; 32]);
        let b = AssetId::Issued([2u8; 32]);
        assert!(a < b);
    }

    #[test]
    fn test_asset_id_roundtrip() {
        let issued = AssetId::Issued([7u8; 32]);
        assert_eq!(AssetId::parse(&issued.to_string()), Some(issued));
        assert_eq!(AssetId::parse("NATIVE"), Some(AssetId::Native));
        assert_eq!(AssetId::parse("xyz"), None);
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let key = test_key(1);
        assert_eq!(key.address(), key.address());
        assert_ne!(key.address(), test_key(2).address());
    }

    #[test]
    fn test_pair_reverse() {
        let pair = AssetPair::new(AssetId::Issued([9u8; 32]), AssetId::Native);
        let rev = pair.reverse();
        assert_eq!(rev.amount_asset, AssetId::Native);
        assert_eq!(rev.reverse(), pair);
    }

    #[test]
    fn test_pair_well_formed() {
        assert!(!AssetPair::new(AssetId::Native, AssetId::Native).is_well_formed());
        assert!(AssetPair::new(AssetId::Issued([1u8; 32]), AssetId::Native).is_well_formed());
    }

    #[test]
    fn test_pair_key_is_filesystem_safe() {
        let pair = AssetPair::new(AssetId::Issued([3u8; 32]), AssetId::Native);
        let key = pair.key();
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_public_key_serde_roundtrip() {
        let key = test_key(5);
        let json = serde_json::to_string(&key).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
