//! Settlement-layer contract
//!
//! The engine consumes the settlement layer through this trait: balance
//! and asset lookups during validation, and transaction submission during
//! matching. The submission channel is concurrency-safe; implementations
//! must not require external serialization.

use crate::assets::{Address, AssetId, IssueMetadata};
use crate::events::ExchangeTransaction;

pub trait SettlementBridge: Send + Sync {
    /// Validate and broadcast; `true` means the transaction was accepted
    /// into the pending pool.
    fn submit_exchange_transaction(&self, tx: &ExchangeTransaction) -> bool;

    /// Confirmed balance of an address in an asset.
    fn balance_of(&self, address: &Address, asset: &AssetId) -> u64;

    /// Total issued supply; zero means the asset does not exist.
    fn total_supply(&self, asset: &AssetId) -> u64;

    /// Issue metadata, if the asset exists.
    fn asset_info(&self, asset: &AssetId) -> Option<IssueMetadata>;
}
