//! The order history service actor
//!
//! Single consumer over a bounded mailbox. Controllers push their event
//! streams here; clients query status, history, and balances; the
//! per-pair controllers request pre-trade validation. Portfolio releases
//! for executions are applied on a configurable delay, giving the
//! settlement layer time to confirm the exchange transaction.

use crate::store::{HistoryStore, ReserveRelease, StoreError};
use crate::validator::{validate_cancel, validate_order, ValidationLimits};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use types::assets::{Address, AssetId, AssetPair};
use types::errors::MatcherError;
use types::events::OrderBookEvent;
use types::info::{OrderInfo, OrderStatus};
use types::order::{CancelOrderRequest, LimitOrder, Order, OrderId};
use types::settlement::SettlementBridge;
use types::time::now_millis;

/// Requests older than this are dropped unanswered.
pub const REQUEST_TTL_MS: i64 = 5_000;

const MAILBOX_CAPACITY: usize = 512;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub db_path: PathBuf,
    pub request_ttl_ms: i64,
    /// Delay before an execution's reserve release is applied.
    pub release_delay: Duration,
    pub save_interval: Duration,
    pub max_orders_per_address: usize,
    pub limits: ValidationLimits,
}

impl HistoryConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            request_ttl_ms: REQUEST_TTL_MS,
            release_delay: Duration::from_secs(30),
            save_interval: Duration::from_secs(60),
            max_orders_per_address: 1000,
            limits: ValidationLimits::default(),
        }
    }
}

pub enum HistoryCommand {
    ApplyEvent {
        pair_key: String,
        event: OrderBookEvent,
    },
    ApplyRelease {
        release: ReserveRelease,
    },
    ValidateOrder {
        order: Order,
        timestamp: i64,
        reply: oneshot::Sender<Result<(), MatcherError>>,
    },
    ValidateCancel {
        request: CancelOrderRequest,
        timestamp: i64,
        reply: oneshot::Sender<Result<OrderId, MatcherError>>,
    },
    OrderStatus {
        order_id: OrderId,
        timestamp: i64,
        reply: oneshot::Sender<Option<OrderStatus>>,
    },
    OrderHistory {
        pair_key: Option<String>,
        address: Address,
        timestamp: i64,
        reply: oneshot::Sender<Vec<(Order, OrderInfo)>>,
    },
    OpenVolume {
        address: Address,
        asset: AssetId,
        timestamp: i64,
        reply: oneshot::Sender<u64>,
    },
    TradableBalance {
        address: Address,
        pair: AssetPair,
        timestamp: i64,
        reply: oneshot::Sender<(u64, u64)>,
    },
    DeleteOrder {
        pair_key: String,
        address: Address,
        order_id: OrderId,
        timestamp: i64,
        reply: oneshot::Sender<Result<OrderId, MatcherError>>,
    },
    RecoverFromOrderBook {
        pair_key: String,
        resident: Vec<LimitOrder>,
    },
}

/// Cheap cloneable handle to the history actor.
#[derive(Clone)]
pub struct HistoryHandle {
    tx: mpsc::Sender<HistoryCommand>,
}

impl HistoryHandle {
    pub async fn apply_event(&self, pair_key: String, event: OrderBookEvent) {
        // Projection events must not be dropped; await mailbox capacity.
        let _ = self
            .tx
            .send(HistoryCommand::ApplyEvent { pair_key, event })
            .await;
    }

    pub async fn validate_order(&self, order: Order) -> Option<Result<(), MatcherError>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HistoryCommand::ValidateOrder {
                order,
                timestamp: now_millis(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn validate_cancel(
        &self,
        request: CancelOrderRequest,
    ) -> Option<Result<OrderId, MatcherError>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HistoryCommand::ValidateCancel {
                request,
                timestamp: now_millis(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HistoryCommand::OrderStatus {
                order_id,
                timestamp: now_millis(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn order_history(
        &self,
        pair_key: Option<String>,
        address: Address,
    ) -> Vec<(Order, OrderInfo)> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryCommand::OrderHistory {
                pair_key,
                address,
                timestamp: now_millis(),
                reply,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn open_volume(&self, address: Address, asset: AssetId) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryCommand::OpenVolume {
                address,
                asset,
                timestamp: now_millis(),
                reply,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn tradable_balance(&self, address: Address, pair: AssetPair) -> (u64, u64) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HistoryCommand::TradableBalance {
                address,
                pair,
                timestamp: now_millis(),
                reply,
            })
            .await
            .is_err()
        {
            return (0, 0);
        }
        rx.await.unwrap_or((0, 0))
    }

    pub async fn delete_order(
        &self,
        pair_key: String,
        address: Address,
        order_id: OrderId,
    ) -> Result<OrderId, MatcherError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HistoryCommand::DeleteOrder {
                pair_key,
                address,
                order_id,
                timestamp: now_millis(),
                reply,
            })
            .await
            .map_err(|_| MatcherError::OrderNotDeletable)?;
        rx.await.unwrap_or(Err(MatcherError::OrderNotDeletable))
    }

    pub async fn recover_from_order_book(&self, pair_key: String, resident: Vec<LimitOrder>) {
        let _ = self
            .tx
            .send(HistoryCommand::RecoverFromOrderBook { pair_key, resident })
            .await;
    }
}

pub struct HistoryService {
    store: HistoryStore,
    settlement: Arc<dyn SettlementBridge>,
    config: HistoryConfig,
    tx: mpsc::Sender<HistoryCommand>,
}

impl HistoryService {
    /// Open the database and start the actor. Returns the handle used by
    /// controllers, the dispatcher, and the REST layer.
    pub fn spawn(
        config: HistoryConfig,
        settlement: Arc<dyn SettlementBridge>,
    ) -> Result<HistoryHandle, StoreError> {
        let store = HistoryStore::open(&config.db_path, config.max_orders_per_address)?;
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let service = HistoryService {
            store,
            settlement,
            config,
            tx: tx.clone(),
        };
        tokio::spawn(service.run(rx));
        Ok(HistoryHandle { tx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HistoryCommand>) {
        info!("order history service started");
        let mut save_timer = tokio::time::interval(self.config.save_interval);
        save_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        save_timer.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = save_timer.tick() => {
                    if let Err(e) = self.store.save() {
                        warn!(error = %e, "history database save failed, will retry");
                    }
                }
            }
        }

        if let Err(e) = self.store.save() {
            error!(error = %e, "final history database save failed");
        }
        info!("order history service stopped");
    }

    fn is_stale(&self, timestamp: i64) -> bool {
        now_millis() - timestamp > self.config.request_ttl_ms
    }

    fn handle(&mut self, command: HistoryCommand) {
        match command {
            HistoryCommand::ApplyEvent { pair_key, event } => self.apply(&pair_key, event),
            HistoryCommand::ApplyRelease { release } => self.store.apply_release(&release),
            HistoryCommand::ValidateOrder {
                order,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    debug!(order_id = %order.id, "dropping stale validation request");
                    return;
                }
                let result = validate_order(
                    &order,
                    now_millis(),
                    &self.store,
                    self.settlement.as_ref(),
                    &self.config.limits,
                );
                let _ = reply.send(result);
            }
            HistoryCommand::ValidateCancel {
                request,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    return;
                }
                let _ = reply.send(validate_cancel(&request, &self.store));
            }
            HistoryCommand::OrderStatus {
                order_id,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    return;
                }
                let _ = reply.send(self.store.status(&order_id));
            }
            HistoryCommand::OrderHistory {
                pair_key,
                address,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    return;
                }
                let result = match pair_key {
                    Some(pair_key) => self.store.history(&pair_key, &address),
                    None => self.store.all_history(&address),
                };
                let _ = reply.send(result);
            }
            HistoryCommand::OpenVolume {
                address,
                asset,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    return;
                }
                let _ = reply.send(self.store.open_volume(&address, &asset));
            }
            HistoryCommand::TradableBalance {
                address,
                pair,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    return;
                }
                let _ = reply.send((
                    self.tradable(&address, &pair.amount_asset),
                    self.tradable(&address, &pair.price_asset),
                ));
            }
            HistoryCommand::DeleteOrder {
                pair_key,
                address,
                order_id,
                timestamp,
                reply,
            } => {
                if self.is_stale(timestamp) {
                    return;
                }
                let result = self
                    .store
                    .delete_order(&pair_key, &address, &order_id)
                    .map(|_| order_id);
                let _ = reply.send(result);
            }
            HistoryCommand::RecoverFromOrderBook { pair_key, resident } => {
                info!(pair = %pair_key, orders = resident.len(), "seeding projection from order book");
                for lo in &resident {
                    self.store.apply_order_added(&pair_key, lo);
                }
            }
        }
    }

    fn apply(&mut self, pair_key: &str, event: OrderBookEvent) {
        match event {
            OrderBookEvent::OrderAdded { order } => {
                self.store.apply_order_added(pair_key, &order);
            }
            OrderBookEvent::OrderExecuted {
                submitted,
                counter,
                executed_amount,
            } => {
                let releases =
                    self.store
                        .apply_order_executed(&submitted, &counter, executed_amount);
                if self.config.release_delay.is_zero() {
                    for release in &releases {
                        self.store.apply_release(release);
                    }
                } else {
                    // Hold the reserve until the settlement layer has had
                    // time to confirm the exchange transaction.
                    for release in releases {
                        let tx = self.tx.clone();
                        let delay = self.config.release_delay;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(HistoryCommand::ApplyRelease { release }).await;
                        });
                    }
                }
            }
            OrderBookEvent::OrderCanceled { order } => {
                self.store.apply_order_canceled(&order);
            }
        }
    }

    fn tradable(&self, address: &Address, asset: &AssetId) -> u64 {
        let balance = self.settlement.balance_of(address, asset) as i128;
        let open = self.store.open_volume(address, asset) as i128;
        (balance - open).max(0) as u64
    }
}
