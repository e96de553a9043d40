//! The matcher dispatcher
//!
//! Owns the known-pairs set and routes every request to the controller
//! of its pair. Accepts a pair only in canonical orientation; controllers
//! are created lazily on the first accepted submission, with an
//! `OrderBookCreated` record persisted to the registry journal before
//! the controller exists. On startup the registry is replayed to respawn
//! controllers, then predefined pairs are instantiated.

use crate::controller::{ControllerConfig, ControllerHandle, OrderBookController, SpawnError};
use crate::protocol::{
    CancelOutcome, DispatcherRequest, MarketInfo, MarketsView, OrderBookRequest, OrderBookView,
    SubmitOutcome,
};
use crate::settlement::MatcherKeys;
use history::HistoryHandle;
use persistence::journal::{EventLog, JournalConfig, JournalError};
use persistence::reader::{EventLogReader, ReaderError};
use persistence::recovery::purge_book_storage;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use types::assets::{AssetId, AssetPair};
use types::errors::MatcherError;
use types::events::OrderBookCreated;
use types::order::{CancelOrderRequest, Order};
use types::settlement::SettlementBridge;
use types::time::now_millis;

const MAILBOX_CAPACITY: usize = 512;
const REGISTRY_DIR: &str = "_registry";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub journal_data_dir: PathBuf,
    pub snapshots_data_dir: PathBuf,
    /// Assets preferred as the price side, in priority order.
    pub price_assets: Vec<AssetId>,
    pub predefined_pairs: Vec<AssetPair>,
    pub snapshot_interval: Duration,
    pub validation_timeout: Duration,
    pub order_match_tx_fee: u64,
    pub cancel_counter_on_reject: bool,
}

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("registry replay error: {0}")]
    Replay(#[from] ReaderError),

    #[error("controller spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("predefined pair {pair} conflicts with known reverse pair {reverse}")]
    PairConflict { pair: AssetPair, reverse: AssetPair },
}

/// Cheap cloneable handle to the dispatcher actor.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherRequest>,
}

impl DispatcherHandle {
    fn send(&self, body: DispatcherRequest) {
        if let Err(e) = self.tx.try_send(body) {
            warn!(error = %e, "dispatcher mailbox overflow, dropping request");
        }
    }

    pub async fn submit(&self, order: Order) -> Option<Result<SubmitOutcome, MatcherError>> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherRequest::Submit { order, reply });
        rx.await.ok()
    }

    pub async fn cancel(
        &self,
        pair: AssetPair,
        request: CancelOrderRequest,
    ) -> Option<Result<CancelOutcome, MatcherError>> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherRequest::Cancel {
            pair,
            request,
            reply,
        });
        rx.await.ok()
    }

    pub async fn depth(
        &self,
        pair: AssetPair,
        depth: Option<usize>,
    ) -> Option<Result<OrderBookView, MatcherError>> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherRequest::Depth { pair, depth, reply });
        rx.await.ok()
    }

    pub async fn delete_book(
        &self,
        pair: AssetPair,
    ) -> Option<Result<OrderBookView, MatcherError>> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherRequest::DeleteBook { pair, reply });
        rx.await.ok()
    }

    pub async fn markets(&self) -> Option<MarketsView> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatcherRequest::Markets { reply });
        rx.await.ok()
    }
}

pub struct MatcherDispatcher {
    config: DispatcherConfig,
    registry: EventLog,
    known: BTreeMap<AssetPair, MarketInfo>,
    controllers: HashMap<AssetPair, ControllerHandle>,
    history: HistoryHandle,
    settlement: Arc<dyn SettlementBridge>,
    keys: Arc<MatcherKeys>,
}

impl MatcherDispatcher {
    /// Replay the registry, respawn controllers, instantiate predefined
    /// pairs, and start the actor.
    pub fn spawn(
        config: DispatcherConfig,
        history: HistoryHandle,
        settlement: Arc<dyn SettlementBridge>,
        keys: Arc<MatcherKeys>,
    ) -> Result<DispatcherHandle, DispatcherError> {
        let registry_dir = config.journal_data_dir.join(REGISTRY_DIR);

        // Replay the known-pairs log.
        let mut recorded: Vec<OrderBookCreated> = Vec::new();
        let mut last_sequence = 0;
        {
            let mut reader = EventLogReader::open(&registry_dir)?;
            while let Some(record) = reader.next_record()? {
                last_sequence = record.sequence;
                match bincode::deserialize::<OrderBookCreated>(&record.payload) {
                    Ok(created) => recorded.push(created),
                    Err(e) => warn!(
                        sequence = record.sequence,
                        error = %e,
                        "skipping undecodable registry record"
                    ),
                }
            }
        }

        let mut registry = EventLog::open(JournalConfig::new(&registry_dir))?;
        registry.set_next_sequence(last_sequence + 1);

        let mut dispatcher = MatcherDispatcher {
            config,
            registry,
            known: BTreeMap::new(),
            controllers: HashMap::new(),
            history,
            settlement,
            keys,
        };

        for created in recorded {
            if dispatcher.known.contains_key(&created.pair) {
                continue;
            }
            let market = dispatcher.market_info(created.pair, created.timestamp);
            dispatcher.known.insert(created.pair, market);
            dispatcher.ensure_controller(created.pair)?;
        }

        for pair in dispatcher.config.predefined_pairs.clone() {
            if dispatcher.known.contains_key(&pair) {
                continue;
            }
            if dispatcher.known.contains_key(&pair.reverse()) {
                return Err(DispatcherError::PairConflict {
                    pair,
                    reverse: pair.reverse(),
                });
            }
            dispatcher.create_book(pair)?;
        }

        info!(pairs = dispatcher.known.len(), "matcher dispatcher started");

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(dispatcher.run(rx));
        Ok(DispatcherHandle { tx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<DispatcherRequest>) {
        while let Some(request) = rx.recv().await {
            self.handle(request);
        }
        info!("matcher dispatcher stopped");
    }

    fn handle(&mut self, request: DispatcherRequest) {
        match request {
            DispatcherRequest::Submit { order, reply } => {
                let pair = order.pair;
                if let Err(e) = self.accept_pair(&pair) {
                    let _ = reply.send(Err(e));
                    return;
                }
                if !self.known.contains_key(&pair) {
                    if let Err(e) = self.create_book(pair) {
                        warn!(pair = %pair, error = %e, "order book creation failed");
                        return;
                    }
                } else if let Err(e) = self.ensure_controller(pair) {
                    warn!(pair = %pair, error = %e, "controller spawn failed");
                    return;
                }

                let controller = self.controllers[&pair].clone();
                let (fwd, fwd_rx) = oneshot::channel();
                controller.route(OrderBookRequest::Submit { order, reply: fwd });
                tokio::spawn(async move {
                    if let Ok(outcome) = fwd_rx.await {
                        let _ = reply.send(Ok(outcome));
                    }
                });
            }
            DispatcherRequest::Cancel {
                pair,
                request,
                reply,
            } => {
                if let Err(e) = self.accept_pair(&pair) {
                    let _ = reply.send(Err(e));
                    return;
                }
                if !self.known.contains_key(&pair) {
                    let _ = reply.send(Ok(CancelOutcome::OrderCancelRejected {
                        message: "Order not found".to_string(),
                    }));
                    return;
                }
                if let Err(e) = self.ensure_controller(pair) {
                    warn!(pair = %pair, error = %e, "controller spawn failed");
                    return;
                }
                let controller = self.controllers[&pair].clone();
                let (fwd, fwd_rx) = oneshot::channel();
                controller.route(OrderBookRequest::Cancel {
                    request,
                    reply: fwd,
                });
                tokio::spawn(async move {
                    if let Ok(outcome) = fwd_rx.await {
                        let _ = reply.send(Ok(outcome));
                    }
                });
            }
            DispatcherRequest::Depth { pair, depth, reply } => {
                if let Err(e) = self.accept_pair(&pair) {
                    let _ = reply.send(Err(e));
                    return;
                }
                // Reads never create controllers; an unknown or dormant
                // pair is simply an empty book.
                match self.controllers.get(&pair) {
                    Some(controller) => {
                        let controller = controller.clone();
                        let (fwd, fwd_rx) = oneshot::channel();
                        controller.route(OrderBookRequest::Depth { depth, reply: fwd });
                        tokio::spawn(async move {
                            if let Ok(view) = fwd_rx.await {
                                let _ = reply.send(Ok(view));
                            }
                        });
                    }
                    None => {
                        let _ = reply.send(Ok(OrderBookView::empty(pair)));
                    }
                }
            }
            DispatcherRequest::DeleteBook { pair, reply } => {
                if let Err(e) = self.accept_pair(&pair) {
                    let _ = reply.send(Err(e));
                    return;
                }
                match self.controllers.remove(&pair) {
                    Some(controller) => {
                        let (fwd, fwd_rx) = oneshot::channel();
                        controller.route(OrderBookRequest::Delete { reply: fwd });
                        tokio::spawn(async move {
                            if let Ok(view) = fwd_rx.await {
                                let _ = reply.send(Ok(view));
                            }
                        });
                    }
                    None => {
                        let journal_dir = self.config.journal_data_dir.join(pair.key());
                        let snapshot_dir = self.config.snapshots_data_dir.join(pair.key());
                        if let Err(e) = purge_book_storage(&snapshot_dir, &journal_dir) {
                            warn!(pair = %pair, error = %e, "failed to purge book storage");
                        }
                        let _ = reply.send(Ok(OrderBookView::empty(pair)));
                    }
                }
            }
            DispatcherRequest::Markets { reply } => {
                let _ = reply.send(MarketsView {
                    matcher_public_key: self.keys.public().to_string(),
                    markets: self.known.values().cloned().collect(),
                });
            }
        }
    }

    /// Structural validation plus the canonical orientation rules.
    fn accept_pair(&self, pair: &AssetPair) -> Result<(), MatcherError> {
        if !pair.is_well_formed() {
            return Err(MatcherError::InvalidPair(*pair));
        }
        for asset in [pair.amount_asset, pair.price_asset] {
            if !asset.is_native() && self.settlement.total_supply(&asset) == 0 {
                return Err(MatcherError::UnknownAsset(asset));
            }
        }

        if self.known.contains_key(pair) {
            return Ok(());
        }
        if self.known.contains_key(&pair.reverse()) {
            return Err(MatcherError::InvalidPairOrdering(pair.reverse()));
        }

        let amount_listed = self.config.price_assets.contains(&pair.amount_asset);
        let price_listed = self.config.price_assets.contains(&pair.price_asset);
        match (price_listed, amount_listed) {
            (true, false) => Ok(()),
            (false, true) => Err(MatcherError::InvalidPairOrdering(pair.reverse())),
            // Neither (or both) listed: the native asset sorts first, and
            // issued assets compare by id bytes; the smaller asset prices.
            _ => {
                if pair.price_asset < pair.amount_asset {
                    Ok(())
                } else {
                    Err(MatcherError::InvalidPairOrdering(pair.reverse()))
                }
            }
        }
    }

    /// Persist `OrderBookCreated`, record market metadata, and spawn the
    /// controller.
    fn create_book(&mut self, pair: AssetPair) -> Result<(), DispatcherError> {
        let timestamp = now_millis();
        let created = OrderBookCreated { pair, timestamp };
        let payload = bincode::serialize(&created)
            .map_err(|e| JournalError::Encoding(e.to_string()))?;
        self.registry
            .append_raw("OrderBookCreated".to_string(), payload, timestamp)?;

        let market = self.market_info(pair, timestamp);
        self.known.insert(pair, market);
        self.ensure_controller(pair)?;
        info!(pair = %pair, "order book created");
        Ok(())
    }

    fn ensure_controller(&mut self, pair: AssetPair) -> Result<(), SpawnError> {
        if self.controllers.contains_key(&pair) {
            return Ok(());
        }
        let controller_config = ControllerConfig {
            journal_dir: self.config.journal_data_dir.join(pair.key()),
            snapshot_dir: self.config.snapshots_data_dir.join(pair.key()),
            snapshot_interval: self.config.snapshot_interval,
            validation_timeout: self.config.validation_timeout,
            order_match_tx_fee: self.config.order_match_tx_fee,
            cancel_counter_on_reject: self.config.cancel_counter_on_reject,
        };
        let handle = OrderBookController::spawn(
            pair,
            controller_config,
            self.history.clone(),
            self.settlement.clone(),
            self.keys.clone(),
        )?;
        self.controllers.insert(pair, handle);
        Ok(())
    }

    fn market_info(&self, pair: AssetPair, created_at: i64) -> MarketInfo {
        MarketInfo {
            pair,
            amount_asset_name: self.asset_name(&pair.amount_asset),
            price_asset_name: self.asset_name(&pair.price_asset),
            created_at,
            amount_asset_info: self.settlement.asset_info(&pair.amount_asset),
            price_asset_info: self.settlement.asset_info(&pair.price_asset),
        }
    }

    fn asset_name(&self, asset: &AssetId) -> String {
        match asset {
            AssetId::Native => "NATIVE".to_string(),
            issued => self
                .settlement
                .asset_info(issued)
                .map(|info| info.name)
                .unwrap_or_else(|| issued.to_string()),
        }
    }
}
