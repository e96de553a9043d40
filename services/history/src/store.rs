//! The durable history projection
//!
//! Four logical maps: raw orders, order infos, per-address portfolios,
//! and the bounded per-(pair, address) order index. A fifth map records
//! the live reservation held for each resident order, so releases can
//! never eat into another order's reserve. Everything lives in
//! `BTreeMap`s and persists as one integrity-hashed file with an atomic
//! tmp-file + rename write.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use thiserror::Error;
use types::assets::{Address, AssetId};
use types::errors::MatcherError;
use types::info::{OrderInfo, OrderStatus};
use types::numeric::{prorated_fee, spend_value};
use types::order::{LimitOrder, Order, OrderId, Side};

pub const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Integrity check failed for history database")]
    IntegrityFailure,

    #[error("Unsupported history database version: {0}")]
    UnsupportedVersion(u32),
}

/// A release of previously reserved balance, applied against one order's
/// reservation record (possibly after a settlement-confirmation delay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRelease {
    pub order_id: OrderId,
    pub address: Address,
    pub assets: Vec<(AssetId, u64)>,
    /// The order filled completely: release whatever the record still
    /// holds. Per-execution releases are floored, so the floors of a
    /// multi-step fill can sum below the reserved total; the remainder
    /// must not stay stranded in the record.
    pub drain_remaining: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct HistoryState {
    orders: BTreeMap<OrderId, Order>,
    infos: BTreeMap<OrderId, OrderInfo>,
    portfolios: BTreeMap<Address, BTreeMap<AssetId, u64>>,
    pair_index: BTreeMap<(String, Address), VecDeque<OrderId>>,
    reserves: BTreeMap<OrderId, (Address, BTreeMap<AssetId, u64>)>,
}

#[derive(Serialize, Deserialize)]
struct StoredHistory {
    version: u32,
    checksum: String,
    state: HistoryState,
}

pub struct HistoryStore {
    path: PathBuf,
    max_orders_per_address: usize,
    state: HistoryState,
}

impl HistoryStore {
    /// Open the database file, verifying integrity; absent file means an
    /// empty projection.
    pub fn open(
        path: impl Into<PathBuf>,
        max_orders_per_address: usize,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            let stored: StoredHistory =
                bincode::deserialize(&data).map_err(|e| StoreError::Encoding(e.to_string()))?;
            if stored.version > STORE_VERSION {
                return Err(StoreError::UnsupportedVersion(stored.version));
            }
            if stored.checksum != Self::state_hash(&stored.state) {
                return Err(StoreError::IntegrityFailure);
            }
            stored.state
        } else {
            HistoryState::default()
        };
        Ok(Self {
            path,
            max_orders_per_address,
            state,
        })
    }

    fn state_hash(state: &HistoryState) -> String {
        let bytes = bincode::serialize(state).expect("history state encoding cannot fail");
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Persist atomically: encode, hash, write tmp, fsync, rename.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredHistory {
            version: STORE_VERSION,
            checksum: Self::state_hash(&self.state),
            state: self.state.clone(),
        };
        let data =
            bincode::serialize(&stored).map_err(|e| StoreError::Encoding(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    // ── Event application ───────────────────────────────────────────

    /// Apply an `OrderAdded`: store the raw order, fold the info delta,
    /// reserve the resident remainder, and index the order. A replayed
    /// add for an already-known order is a no-op, which is what makes
    /// book-driven recovery idempotent.
    pub fn apply_order_added(&mut self, pair_key: &str, lo: &LimitOrder) {
        let order_id = lo.id();
        if self.state.orders.contains_key(&order_id) {
            return;
        }
        let address = lo.order.sender_address();

        self.state.orders.insert(order_id, lo.order.clone());
        self.combine_info(order_id, OrderInfo::added(lo.order.amount.value()));

        let reserve = reservation_for(lo);
        for (asset, amount) in &reserve {
            *self
                .state
                .portfolios
                .entry(address)
                .or_default()
                .entry(*asset)
                .or_insert(0) += amount;
        }
        self.state
            .reserves
            .insert(order_id, (address, reserve.into_iter().collect()));

        self.index_append(pair_key, address, order_id);
    }

    /// Apply an `OrderExecuted`: fold both participants' info deltas and
    /// return the proportional reserve releases for the caller to apply,
    /// now or on a delay. A release that completes its order drains the
    /// record instead.
    pub fn apply_order_executed(
        &mut self,
        submitted: &LimitOrder,
        counter: &LimitOrder,
        executed_amount: u64,
    ) -> Vec<ReserveRelease> {
        let mut releases = Vec::with_capacity(2);
        for lo in [submitted, counter] {
            let order = &lo.order;
            self.combine_info(
                order.id,
                OrderInfo::executed(order.amount.value(), executed_amount),
            );
            let filled = self
                .state
                .infos
                .get(&order.id)
                .map(|info| info.status() == OrderStatus::Filled)
                .unwrap_or(false);
            releases.push(ReserveRelease {
                order_id: order.id,
                address: order.sender_address(),
                assets: release_for(order, executed_amount),
                drain_remaining: filled,
            });
        }
        releases
    }

    /// Apply an `OrderCanceled`: fold the cancellation delta and release
    /// whatever reservation the order still holds.
    pub fn apply_order_canceled(&mut self, lo: &LimitOrder) {
        self.combine_info(lo.id(), OrderInfo::canceled(lo.order.amount.value()));
        if let Some((address, remaining)) = self.state.reserves.remove(&lo.id()) {
            let assets: Vec<(AssetId, u64)> = remaining.into_iter().collect();
            self.release_from_portfolio(&address, &assets);
        }
    }

    /// Apply a reserve release against the order's reservation record.
    /// Amounts are capped by what the record still holds; an order with
    /// no record (it never rested, or was already cancelled) releases
    /// nothing. A draining release empties the record.
    pub fn apply_release(&mut self, release: &ReserveRelease) {
        if release.drain_remaining {
            if let Some((address, record)) = self.state.reserves.remove(&release.order_id) {
                let assets: Vec<(AssetId, u64)> = record.into_iter().collect();
                self.release_from_portfolio(&address, &assets);
            }
            return;
        }
        let Some((address, record)) = self.state.reserves.get_mut(&release.order_id) else {
            return;
        };
        let address = *address;
        let mut taken = Vec::with_capacity(release.assets.len());
        for (asset, amount) in &release.assets {
            if let Some(held) = record.get_mut(asset) {
                let take = (*held).min(*amount);
                *held -= take;
                if *held == 0 {
                    record.remove(asset);
                }
                taken.push((*asset, take));
            }
        }
        if record.is_empty() {
            self.state.reserves.remove(&release.order_id);
        }
        self.release_from_portfolio(&address, &taken);
    }

    fn release_from_portfolio(&mut self, address: &Address, assets: &[(AssetId, u64)]) {
        let Some(portfolio) = self.state.portfolios.get_mut(address) else {
            return;
        };
        for (asset, amount) in assets {
            if let Some(held) = portfolio.get_mut(asset) {
                *held = held.saturating_sub(*amount);
                if *held == 0 {
                    portfolio.remove(asset);
                }
            }
        }
        if portfolio.is_empty() {
            self.state.portfolios.remove(address);
        }
    }

    fn combine_info(&mut self, order_id: OrderId, delta: OrderInfo) {
        let entry = self
            .state
            .infos
            .entry(order_id)
            .or_insert_with(OrderInfo::empty);
        *entry = entry.combine(&delta);
    }

    /// Append to the bounded (pair, address) index. At capacity, the
    /// oldest terminal order is dropped first; with no terminal order,
    /// the oldest regardless.
    fn index_append(&mut self, pair_key: &str, address: Address, order_id: OrderId) {
        let queue = self
            .state
            .pair_index
            .entry((pair_key.to_string(), address))
            .or_default();
        if queue.len() >= self.max_orders_per_address {
            let evict_at = queue
                .iter()
                .position(|id| {
                    self.state
                        .infos
                        .get(id)
                        .map(|info| info.status().is_terminal())
                        .unwrap_or(true)
                })
                .unwrap_or(0);
            queue.remove(evict_at);
        }
        queue.push_back(order_id);
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.state.orders.get(order_id)
    }

    pub fn status(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.state.infos.get(order_id).map(|info| info.status())
    }

    /// Orders for one (pair, address), timestamp ascending.
    pub fn history(&self, pair_key: &str, address: &Address) -> Vec<(Order, OrderInfo)> {
        let Some(queue) = self
            .state
            .pair_index
            .get(&(pair_key.to_string(), *address))
        else {
            return Vec::new();
        };
        let mut out: Vec<(Order, OrderInfo)> = queue
            .iter()
            .filter_map(|id| {
                let order = self.state.orders.get(id)?.clone();
                let info = self.state.infos.get(id).copied()?;
                Some((order, info))
            })
            .collect();
        out.sort_by_key(|(order, _)| order.timestamp);
        out
    }

    /// Orders for an address across every pair, timestamp ascending.
    pub fn all_history(&self, address: &Address) -> Vec<(Order, OrderInfo)> {
        let mut out: Vec<(Order, OrderInfo)> = self
            .state
            .pair_index
            .iter()
            .filter(|((_, addr), _)| addr == address)
            .flat_map(|(_, queue)| queue.iter())
            .filter_map(|id| {
                let order = self.state.orders.get(id)?.clone();
                let info = self.state.infos.get(id).copied()?;
                Some((order, info))
            })
            .collect();
        out.sort_by_key(|(order, _)| order.timestamp);
        out
    }

    /// Reserved (non-tradable) balance of an address in an asset.
    pub fn open_volume(&self, address: &Address, asset: &AssetId) -> u64 {
        self.state
            .portfolios
            .get(address)
            .and_then(|portfolio| portfolio.get(asset))
            .copied()
            .unwrap_or(0)
    }

    /// Count of non-terminal indexed orders for one (pair, address).
    pub fn active_order_count(&self, pair_key: &str, address: &Address) -> usize {
        self.state
            .pair_index
            .get(&(pair_key.to_string(), *address))
            .map(|queue| {
                queue
                    .iter()
                    .filter(|id| {
                        self.state
                            .infos
                            .get(id)
                            .map(|info| !info.status().is_terminal())
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop a terminal order from the (pair, address) index.
    pub fn delete_order(
        &mut self,
        pair_key: &str,
        address: &Address,
        order_id: &OrderId,
    ) -> Result<(), MatcherError> {
        let terminal = self
            .status(order_id)
            .map(|status| status.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return Err(MatcherError::OrderNotDeletable);
        }
        let Some(queue) = self
            .state
            .pair_index
            .get_mut(&(pair_key.to_string(), *address))
        else {
            return Err(MatcherError::OrderNotDeletable);
        };
        let Some(position) = queue.iter().position(|id| id == order_id) else {
            return Err(MatcherError::OrderNotDeletable);
        };
        queue.remove(position);
        if queue.is_empty() {
            self.state
                .pair_index
                .remove(&(pair_key.to_string(), *address));
        }
        Ok(())
    }
}

/// What a resident order keeps out of its sender's tradable balance: the
/// unfilled spend plus the matcher fee share for that remainder.
pub fn reservation_for(lo: &LimitOrder) -> Vec<(AssetId, u64)> {
    release_for(&lo.order, lo.remaining)
}

/// Reserve movement proportional to `amount` of an order's total.
fn release_for(order: &Order, amount: u64) -> Vec<(AssetId, u64)> {
    let fee_share = prorated_fee(order.matcher_fee, amount, order.amount.value());
    let mut out: BTreeMap<AssetId, u64> = BTreeMap::new();
    match order.side {
        Side::Buy => {
            *out.entry(order.pair.price_asset).or_insert(0) +=
                spend_value(amount, order.price);
        }
        Side::Sell => {
            *out.entry(order.pair.amount_asset).or_insert(0) += amount;
        }
    }
    *out.entry(AssetId::Native).or_insert(0) += fee_share;
    out.into_iter().filter(|(_, v)| *v > 0).collect()
}
