//! Pre-trade validation
//!
//! Runs inside the history actor against its own projection and the
//! settlement reader: authenticity, clock window, expiration, fee floor,
//! asset checks, open-order cap, and the tradable-balance reservation
//! check. A failure reaches the submitter as an order rejection and
//! leaves the book untouched.

use crate::store::{reservation_for, HistoryStore};
use std::collections::HashSet;
use types::assets::AssetId;
use types::errors::MatcherError;
use types::order::{CancelOrderRequest, LimitOrder, Order, OrderId, MAX_ORDER_TTL_MS};
use types::settlement::SettlementBridge;

/// Static limits the validator enforces.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    /// Largest allowed |now − order.timestamp| in milliseconds.
    pub max_timestamp_diff_ms: i64,
    /// Smallest accepted matcher fee.
    pub min_order_fee: u64,
    /// Cap on non-terminal orders per (pair, address).
    pub max_open_orders: usize,
    pub blacklisted_assets: HashSet<AssetId>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_timestamp_diff_ms: 3 * 60 * 1000,
            min_order_fee: 300_000,
            max_open_orders: 1000,
            blacklisted_assets: HashSet::new(),
        }
    }
}

pub fn validate_order(
    order: &Order,
    now: i64,
    store: &HistoryStore,
    settlement: &dyn SettlementBridge,
    limits: &ValidationLimits,
) -> Result<(), MatcherError> {
    if !order.verify_signature() {
        return Err(MatcherError::InvalidSignature);
    }

    if (now - order.timestamp).abs() > limits.max_timestamp_diff_ms {
        return Err(MatcherError::TimestampOutOfWindow {
            timestamp: order.timestamp,
        });
    }
    if order.expiration <= now || order.expiration <= order.timestamp {
        return Err(MatcherError::OrderExpired {
            expiration: order.expiration,
        });
    }
    if order.expiration - order.timestamp > MAX_ORDER_TTL_MS {
        return Err(MatcherError::OrderExpired {
            expiration: order.expiration,
        });
    }

    if order.matcher_fee < limits.min_order_fee {
        return Err(MatcherError::FeeTooLow {
            fee: order.matcher_fee,
            min: limits.min_order_fee,
        });
    }

    for asset in [order.pair.amount_asset, order.pair.price_asset] {
        if limits.blacklisted_assets.contains(&asset) {
            return Err(MatcherError::BlacklistedAsset(asset));
        }
        if !asset.is_native() && settlement.total_supply(&asset) == 0 {
            return Err(MatcherError::UnknownAsset(asset));
        }
    }

    let address = order.sender_address();
    if store.active_order_count(&order.pair.key(), &address) >= limits.max_open_orders {
        return Err(MatcherError::TooManyOpenOrders(limits.max_open_orders));
    }

    // The new reservation must fit into what is tradable right now:
    // settlement balance minus already-reserved open volume.
    let required = reservation_for(&LimitOrder::new(order.clone()));
    for (asset, amount) in required {
        let balance = settlement.balance_of(&address, &asset) as i128;
        let open = store.open_volume(&address, &asset) as i128;
        let tradable = balance - open;
        if tradable < amount as i128 {
            return Err(MatcherError::InsufficientTradableBalance {
                asset,
                required: amount,
                tradable: tradable.max(0) as u64,
            });
        }
    }

    Ok(())
}

/// A cancellation is valid when the order is known and the request is
/// signed by the order's own sender.
pub fn validate_cancel(
    request: &CancelOrderRequest,
    store: &HistoryStore,
) -> Result<OrderId, MatcherError> {
    let order = store
        .order(&request.order_id)
        .ok_or(MatcherError::OrderNotFound(request.order_id))?;
    if order.sender != request.sender || !request.verify_signature() {
        return Err(MatcherError::CancelSignatureMismatch);
    }
    Ok(request.order_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use types::assets::{Address, AssetPair, IssueMetadata};
    use types::events::ExchangeTransaction;
    use types::numeric::{Amount, Price, PRICE_SCALE};
    use types::order::Side;

    struct FakeSettlement {
        balances: Mutex<HashMap<(Address, AssetId), u64>>,
        supplies: Mutex<HashMap<AssetId, u64>>,
    }

    impl FakeSettlement {
        fn new() -> Self {
            Self {
                balances: Mutex::new(HashMap::new()),
                supplies: Mutex::new(HashMap::new()),
            }
        }

        fn credit(&self, address: Address, asset: AssetId, amount: u64) {
            *self
                .balances
                .lock()
                .unwrap()
                .entry((address, asset))
                .or_insert(0) += amount;
        }

        fn issue(&self, asset: AssetId, supply: u64) {
            self.supplies.lock().unwrap().insert(asset, supply);
        }
    }

    impl SettlementBridge for FakeSettlement {
        fn submit_exchange_transaction(&self, _tx: &ExchangeTransaction) -> bool {
            true
        }

        fn balance_of(&self, address: &Address, asset: &AssetId) -> u64 {
            self.balances
                .lock()
                .unwrap()
                .get(&(*address, *asset))
                .copied()
                .unwrap_or(0)
        }

        fn total_supply(&self, asset: &AssetId) -> u64 {
            self.supplies
                .lock()
                .unwrap()
                .get(asset)
                .copied()
                .unwrap_or(0)
        }

        fn asset_info(&self, asset: &AssetId) -> Option<IssueMetadata> {
            let supply = self.total_supply(asset);
            (supply > 0).then(|| IssueMetadata {
                name: "asset".into(),
                decimals: 8,
                total_supply: supply,
                issued_at: 0,
            })
        }
    }

    const NOW: i64 = 1_700_000_000_000;
    const FEE: u64 = 300_000;

    fn asset() -> AssetId {
        AssetId::Issued([7u8; 32])
    }

    fn pair() -> AssetPair {
        AssetPair::new(asset(), AssetId::Native)
    }

    fn order(key: &SigningKey, side: Side, amount: u64) -> Order {
        Order::signed(
            key,
            pair(),
            side,
            Price::new(10 * PRICE_SCALE).unwrap(),
            Amount::new(amount).unwrap(),
            NOW,
            NOW + 60_000,
            FEE,
        )
    }

    fn funded_setup(tmp: &TempDir) -> (HistoryStore, FakeSettlement, SigningKey) {
        let store = HistoryStore::open(tmp.path().join("history.db"), 1000).unwrap();
        let settlement = FakeSettlement::new();
        settlement.issue(asset(), 1_000_000_000);

        let key = SigningKey::from_bytes(&[1u8; 32]);
        let address = types::assets::PublicKey(key.verifying_key()).address();
        settlement.credit(address, AssetId::Native, 10_000_000);
        settlement.credit(address, asset(), 10_000_000);
        (store, settlement, key)
    }

    #[test]
    fn test_valid_order_passes() {
        let tmp = TempDir::new().unwrap();
        let (store, settlement, key) = funded_setup(&tmp);
        let order = order(&key, Side::Buy, 100);
        let limits = ValidationLimits::default();

        assert!(validate_order(&order, NOW, &store, &settlement, &limits).is_ok());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let tmp = TempDir::new().unwrap();
        let (store, settlement, key) = funded_setup(&tmp);
        let mut order = order(&key, Side::Buy, 100);
        order.matcher_fee += 1;
        let limits = ValidationLimits::default();

        assert_eq!(
            validate_order(&order, NOW, &store, &settlement, &limits),
            Err(MatcherError::InvalidSignature)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let tmp = TempDir::new().unwrap();
        let (store, settlement, key) = funded_setup(&tmp);
        let order = order(&key, Side::Buy, 100);
        let limits = ValidationLimits::default();

        let late = NOW + limits.max_timestamp_diff_ms + 1;
        assert!(matches!(
            validate_order(&order, late, &store, &settlement, &limits),
            Err(MatcherError::TimestampOutOfWindow { .. })
        ));
    }

    #[test]
    fn test_expired_order_rejected() {
        let tmp = TempDir::new().unwrap();
        let (store, settlement, key) = funded_setup(&tmp);
        let limits = ValidationLimits {
            max_timestamp_diff_ms: i64::MAX / 2,
            ..ValidationLimits::default()
        };
        let order = Order::signed(
            &key,
            pair(),
            Side::Buy,
            Price::new(10 * PRICE_SCALE).unwrap(),
            Amount::new(100).unwrap(),
            NOW - 120_000,
            NOW - 60_000,
            FEE,
        );

        assert!(matches!(
            validate_order(&order, NOW, &store, &settlement, &limits),
            Err(MatcherError::OrderExpired { .. })
        ));
    }

    #[test]
    fn test_low_fee_rejected() {
        let tmp = TempDir::new().unwrap();
        let (store, settlement, key) = funded_setup(&tmp);
        let order = Order::signed(
            &key,
            pair(),
            Side::Buy,
            Price::new(10 * PRICE_SCALE).unwrap(),
            Amount::new(100).unwrap(),
            NOW,
            NOW + 60_000,
            FEE - 1,
        );
        let limits = ValidationLimits::default();

        assert!(matches!(
            validate_order(&order, NOW, &store, &settlement, &limits),
            Err(MatcherError::FeeTooLow { .. })
        ));
    }

    #[test]
    fn test_unknown_asset_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::open(tmp.path().join("history.db"), 1000).unwrap();
        let settlement = FakeSettlement::new();
        let key = SigningKey::from_bytes(&[1u8; 32]);
        let order = order(&key, Side::Buy, 100);
        let limits = ValidationLimits::default();

        assert_eq!(
            validate_order(&order, NOW, &store, &settlement, &limits),
            Err(MatcherError::UnknownAsset(asset()))
        );
    }

    #[test]
    fn test_blacklisted_asset_rejected() {
        let tmp = TempDir::new().unwrap();
        let (store, settlement, key) = funded_setup(&tmp);
        let order = order(&key, Side::Buy, 100);
        let limits = ValidationLimits {
            blacklisted_assets: [asset()].into_iter().collect(),
            ..ValidationLimits::default()
        };

        assert_eq!(
            validate_order(&order, NOW, &store, &settlement, &limits),
            Err(MatcherError::BlacklistedAsset(asset()))
        );
    }

    #[test]
    fn test_insufficient_tradable_balance_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = HistoryStore::open(tmp.path().join("history.db"), 1000).unwrap();
        let settlement = FakeSettlement::new();
        settlement.issue(asset(), 1_000_000_000);
        let key = SigningKey::from_bytes(&[1u8; 32]);
        // Funded with exactly one base unit less than the reservation.
        let address = types::assets::PublicKey(key.verifying_key()).address();
        settlement.credit(address, AssetId::Native, 1000 + FEE - 1);

        let order = order(&key, Side::Buy, 100);
        let limits = ValidationLimits::default();

        assert!(matches!(
            validate_order(&order, NOW, &store, &settlement, &limits),
            Err(MatcherError::InsufficientTradableBalance { .. })
        ));
    }

    #[test]
    fn test_open_volume_reduces_tradable_balance() {
        let tmp = TempDir::new().unwrap();
        let (mut store, settlement, key) = funded_setup(&tmp);
        let limits = ValidationLimits::default();

        // Reserve almost everything with a resident sell, then try to
        // sell the remainder plus one.
        let resident = LimitOrder::new(order(&key, Side::Sell, 9_999_000));
        store.apply_order_added(&pair().key(), &resident);

        let over = order(&key, Side::Sell, 1_001);
        assert!(matches!(
            validate_order(&over, NOW, &store, &settlement, &limits),
            Err(MatcherError::InsufficientTradableBalance { .. })
        ));

        let fits = order(&key, Side::Sell, 1_000);
        assert!(validate_order(&fits, NOW, &store, &settlement, &limits).is_ok());
    }

    #[test]
    fn test_open_order_cap() {
        let tmp = TempDir::new().unwrap();
        let (mut store, settlement, key) = funded_setup(&tmp);
        let limits = ValidationLimits {
            max_open_orders: 1,
            ..ValidationLimits::default()
        };

        store.apply_order_added(&pair().key(), &LimitOrder::new(order(&key, Side::Buy, 10)));
        let next = order(&key, Side::Buy, 20);
        assert_eq!(
            validate_order(&next, NOW, &store, &settlement, &limits),
            Err(MatcherError::TooManyOpenOrders(1))
        );
    }

    #[test]
    fn test_cancel_validation() {
        let tmp = TempDir::new().unwrap();
        let (mut store, _settlement, key) = funded_setup(&tmp);

        let resident = LimitOrder::new(order(&key, Side::Buy, 100));
        store.apply_order_added(&pair().key(), &resident);

        let ok = CancelOrderRequest::signed(&key, resident.id());
        assert_eq!(validate_cancel(&ok, &store), Ok(resident.id()));

        let stranger = SigningKey::from_bytes(&[9u8; 32]);
        let forged = CancelOrderRequest::signed(&stranger, resident.id());
        assert_eq!(
            validate_cancel(&forged, &store),
            Err(MatcherError::CancelSignatureMismatch)
        );

        let unknown = CancelOrderRequest::signed(&key, LimitOrder::new(order(&key, Side::Sell, 5)).id());
        assert!(matches!(
            validate_cancel(&unknown, &store),
            Err(MatcherError::OrderNotFound(_))
        ));
    }
}
