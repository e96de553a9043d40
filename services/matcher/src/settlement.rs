//! Settlement bridge and exchange transaction construction
//!
//! The matcher holds one signing key; every execution becomes an
//! [`ExchangeTransaction`] binding both orders at the counter's price,
//! with each side's matcher fee pro-rated by the executed amount. The
//! in-memory bridge backs tests and standalone boots; a production
//! deployment implements [`SettlementBridge`] against the chain node.

use dashmap::DashMap;
use ed25519_dalek::{Signer, SigningKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use types::assets::{Address, AssetId, IssueMetadata, PublicKey};
use types::events::{ExchangeTransaction, TxId};
use types::numeric::prorated_fee;
use types::order::{LimitOrder, Order, Side, Signature};
use types::settlement::SettlementBridge;

/// The matcher's signing identity.
pub struct MatcherKeys {
    signing: SigningKey,
    public: PublicKey,
}

impl MatcherKeys {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let public = PublicKey(signing.verifying_key());
        Self { signing, public }
    }

    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut seed);
        Self::from_seed(&seed)
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }
}

/// Bind one execution step into a matcher-signed transaction. The price
/// is the counter's (price-time priority executes at the resident
/// order's price).
pub fn build_exchange_transaction(
    keys: &MatcherKeys,
    submitted: &LimitOrder,
    counter: &LimitOrder,
    executed_amount: u64,
    timestamp: i64,
    tx_fee: u64,
) -> ExchangeTransaction {
    let (buy, sell): (&Order, &Order) = match submitted.side() {
        Side::Buy => (&submitted.order, &counter.order),
        Side::Sell => (&counter.order, &submitted.order),
    };
    let price = counter.price();
    let buy_matcher_fee = prorated_fee(buy.matcher_fee, executed_amount, buy.amount.value());
    let sell_matcher_fee = prorated_fee(sell.matcher_fee, executed_amount, sell.amount.value());

    let content = ExchangeTransaction::content_bytes(
        buy,
        sell,
        price,
        executed_amount,
        buy_matcher_fee,
        sell_matcher_fee,
        tx_fee,
        timestamp,
        &keys.public,
    );
    let signature = Signature(keys.signing.sign(&content));

    ExchangeTransaction {
        id: ExchangeTransaction::content_hash(&content),
        buy_order: buy.clone(),
        sell_order: sell.clone(),
        price,
        amount: executed_amount,
        buy_matcher_fee,
        sell_matcher_fee,
        fee: tx_fee,
        timestamp,
        matcher: keys.public,
        signature,
    }
}

/// In-memory settlement state: balances, issued assets, and a record of
/// accepted transactions. Concurrency-safe; shared between the history
/// actor, the controllers, and test drivers.
#[derive(Default)]
pub struct InMemorySettlement {
    balances: DashMap<(Address, AssetId), u64>,
    assets: DashMap<AssetId, IssueMetadata>,
    accepted: Mutex<Vec<ExchangeTransaction>>,
    reject_submissions: AtomicBool,
}

impl InMemorySettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, address: Address, asset: AssetId, amount: u64) {
        *self.balances.entry((address, asset)).or_insert(0) += amount;
    }

    pub fn issue(&self, asset: AssetId, info: IssueMetadata) {
        self.assets.insert(asset, info);
    }

    /// Flip submission acceptance; used to drive rejection paths.
    pub fn set_reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    pub fn accepted_transactions(&self) -> Vec<ExchangeTransaction> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn accepted_tx_ids(&self) -> Vec<TxId> {
        self.accepted.lock().unwrap().iter().map(|tx| tx.id).collect()
    }
}

impl SettlementBridge for InMemorySettlement {
    fn submit_exchange_transaction(&self, tx: &ExchangeTransaction) -> bool {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return false;
        }
        if !tx.verify_signature() {
            return false;
        }
        self.accepted.lock().unwrap().push(tx.clone());
        true
    }

    fn balance_of(&self, address: &Address, asset: &AssetId) -> u64 {
        self.balances
            .get(&(*address, *asset))
            .map(|v| *v)
            .unwrap_or(0)
    }

    fn total_supply(&self, asset: &AssetId) -> u64 {
        match asset {
            AssetId::Native => u64::MAX,
            issued => self.assets.get(issued).map(|i| i.total_supply).unwrap_or(0),
        }
    }

    fn asset_info(&self, asset: &AssetId) -> Option<IssueMetadata> {
        self.assets.get(asset).map(|i| i.clone())
    }
}
