//! Per-pair order book controller
//!
//! One tokio task per pair, single consumer over a bounded mailbox. Two
//! states: ready, and awaiting validation. While a validation is in
//! flight, reads are served immediately and writes are stashed, drained
//! FIFO on return to ready. The matching loop persists every event to
//! the pair's journal before applying it to the book and publishing it
//! to the history service; a journal write failure stops the controller
//! so recovery rebuilds from the last snapshot.

use crate::protocol::{CancelOutcome, LevelView, OrderBookRequest, OrderBookView, SubmitOutcome};
use crate::settlement::{build_exchange_transaction, MatcherKeys};
use matching_engine::OrderBook;
use persistence::journal::{EventLog, JournalConfig, JournalError};
use persistence::recovery::{purge_book_storage, recover_book, RecoveryError};
use persistence::snapshot::{BookSnapshotFile, SnapshotWriter};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use types::assets::AssetPair;
use types::errors::MatcherError;
use types::events::OrderBookEvent;
use types::numeric::is_settleable;
use types::order::{CancelOrderRequest, LimitOrder, Order};
use types::settlement::SettlementBridge;
use types::time::now_millis;

use history::HistoryHandle;

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub journal_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub snapshot_interval: Duration,
    pub validation_timeout: Duration,
    /// Fee attached to every exchange transaction.
    pub order_match_tx_fee: u64,
    /// On settlement rejection: cancel the resident counter (true) or
    /// the submitted order (false).
    pub cancel_counter_on_reject: bool,
}

/// Handle to one pair's controller.
#[derive(Clone)]
pub struct ControllerHandle {
    pair: AssetPair,
    tx: mpsc::Sender<OrderBookRequest>,
}

impl ControllerHandle {
    /// Route a request; overflow of the bounded mailbox drops the
    /// request with a warning, leaving the caller's reply channel to
    /// time out. Routing happens on the dispatcher's own task so the
    /// controller sees requests in dispatcher arrival order.
    pub fn route(&self, request: OrderBookRequest) {
        if let Err(e) = self.tx.try_send(request) {
            warn!(pair = %self.pair, error = %e, "controller mailbox overflow, dropping request");
        }
    }
}

pub struct OrderBookController {
    pair: AssetPair,
    book: OrderBook,
    journal: EventLog,
    stash: VecDeque<OrderBookRequest>,
    history: HistoryHandle,
    settlement: Arc<dyn SettlementBridge>,
    keys: Arc<MatcherKeys>,
    config: ControllerConfig,
}

impl OrderBookController {
    /// Recover the book from storage and start the controller task.
    pub fn spawn(
        pair: AssetPair,
        config: ControllerConfig,
        history: HistoryHandle,
        settlement: Arc<dyn SettlementBridge>,
        keys: Arc<MatcherKeys>,
    ) -> Result<ControllerHandle, SpawnError> {
        let recovered = recover_book(&config.snapshot_dir, &config.journal_dir)?;
        let mut journal = EventLog::open(JournalConfig::new(&config.journal_dir))?;
        journal.set_next_sequence(recovered.last_sequence + 1);

        info!(
            pair = %pair,
            resident = recovered.book.order_count(),
            replayed = recovered.replayed,
            "order book controller starting"
        );

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let controller = OrderBookController {
            pair,
            book: recovered.book,
            journal,
            stash: VecDeque::new(),
            history,
            settlement,
            keys,
            config,
        };
        tokio::spawn(controller.run(rx));
        Ok(ControllerHandle { pair, tx })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<OrderBookRequest>) {
        // Re-seed the projection with the recovered residents; the
        // history store applies already-known orders as no-ops.
        if !self.book.is_empty() {
            self.history
                .recover_from_order_book(self.pair.key(), self.book.resident_orders())
                .await;
        }

        let mut snapshot_timer = tokio::time::interval(self.config.snapshot_interval);
        snapshot_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        snapshot_timer.tick().await; // immediate first tick

        loop {
            let request = if let Some(stashed) = self.stash.pop_front() {
                stashed
            } else {
                tokio::select! {
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                    _ = snapshot_timer.tick() => {
                        self.save_snapshot();
                        continue;
                    }
                }
            };

            match request {
                OrderBookRequest::Submit { order, reply } => {
                    if !self.on_submit(order, reply, &mut rx).await {
                        break;
                    }
                }
                OrderBookRequest::Cancel { request, reply } => {
                    if !self.on_cancel(request, reply, &mut rx).await {
                        break;
                    }
                }
                OrderBookRequest::Depth { depth, reply } => {
                    let _ = reply.send(self.view(depth));
                }
                OrderBookRequest::Delete { reply } => {
                    self.on_delete(reply);
                    break;
                }
            }
        }
        info!(pair = %self.pair, "order book controller stopped");
    }

    /// Await a validation result, serving reads and stashing writes.
    /// `None` means the deadline passed; the pending request is dropped.
    async fn await_validation<T>(
        &mut self,
        mut validation: std::pin::Pin<Box<dyn std::future::Future<Output = Option<T>> + Send>>,
        rx: &mut mpsc::Receiver<OrderBookRequest>,
    ) -> Option<T> {
        let deadline = tokio::time::sleep(self.config.validation_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                result = &mut validation => return result,
                _ = &mut deadline => {
                    warn!(pair = %self.pair, "{}, dropping request", MatcherError::ValidationTimeout);
                    return None;
                }
                request = rx.recv() => match request {
                    Some(OrderBookRequest::Depth { depth, reply }) => {
                        let _ = reply.send(self.view(depth));
                    }
                    Some(write) => self.stash.push_back(write),
                    None => return None,
                }
            }
        }
    }

    /// Returns `false` when the controller must stop (journal failure).
    async fn on_submit(
        &mut self,
        order: Order,
        reply: oneshot::Sender<SubmitOutcome>,
        rx: &mut mpsc::Receiver<OrderBookRequest>,
    ) -> bool {
        let history = self.history.clone();
        let to_validate = order.clone();
        let validation = Box::pin(async move { history.validate_order(to_validate).await });

        match self.await_validation(validation, rx).await {
            None => true, // timeout or history gone; silence
            Some(Err(e)) => {
                let _ = reply.send(SubmitOutcome::OrderRejected {
                    message: e.to_string(),
                });
                true
            }
            Some(Ok(())) => {
                let _ = reply.send(SubmitOutcome::OrderAccepted {
                    order: order.clone(),
                });
                match self.match_loop(order).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(pair = %self.pair, error = %e, "journal write failed, stopping controller");
                        false
                    }
                }
            }
        }
    }

    /// The matching loop: drive `match_step` until the incoming order
    /// rests, fills, or cancels as dust.
    async fn match_loop(&mut self, order: Order) -> Result<(), JournalError> {
        let mut incoming = LimitOrder::new(order);
        loop {
            match self.book.match_step(&incoming) {
                added @ OrderBookEvent::OrderAdded { .. } => {
                    self.persist_apply_publish(added).await?;
                    return Ok(());
                }
                OrderBookEvent::OrderExecuted {
                    submitted,
                    counter,
                    executed_amount,
                } => {
                    let tx = build_exchange_transaction(
                        &self.keys,
                        &submitted,
                        &counter,
                        executed_amount,
                        now_millis(),
                        self.config.order_match_tx_fee,
                    );
                    if self.settlement.submit_exchange_transaction(&tx) {
                        info!(pair = %self.pair, tx_id = %tx.id, amount = executed_amount, "exchange transaction accepted");
                        self.persist_apply_publish(OrderBookEvent::OrderExecuted {
                            submitted: submitted.clone(),
                            counter,
                            executed_amount,
                        })
                        .await?;

                        let remaining = incoming.remaining - executed_amount;
                        if remaining == 0 {
                            return Ok(());
                        }
                        let residual = incoming.partial(remaining);
                        if !is_settleable(remaining, residual.price()) {
                            warn!(
                                pair = %self.pair,
                                order_id = %residual.id(),
                                remaining,
                                "{}", MatcherError::DustResidual
                            );
                            self.persist_apply_publish(OrderBookEvent::OrderCanceled {
                                order: residual,
                            })
                            .await?;
                            return Ok(());
                        }
                        incoming = residual;
                    } else {
                        // The counter went stale (e.g. its owner's balance
                        // moved). Cancel per policy; a cancelled counter
                        // refunds the traded amount to the incoming order,
                        // which retries against the next-best level.
                        warn!(
                            pair = %self.pair,
                            counter_id = %counter.id(),
                            "{}", MatcherError::SettlementRejected
                        );
                        if self.config.cancel_counter_on_reject {
                            self.persist_apply_publish(OrderBookEvent::OrderCanceled {
                                order: counter,
                            })
                            .await?;
                        } else {
                            self.persist_apply_publish(OrderBookEvent::OrderCanceled {
                                order: incoming.clone(),
                            })
                            .await?;
                            return Ok(());
                        }
                    }
                }
                OrderBookEvent::OrderCanceled { .. } => {
                    unreachable!("match_step never yields a cancellation")
                }
            }
        }
    }

    async fn on_cancel(
        &mut self,
        request: CancelOrderRequest,
        reply: oneshot::Sender<CancelOutcome>,
        rx: &mut mpsc::Receiver<OrderBookRequest>,
    ) -> bool {
        let history = self.history.clone();
        let to_validate = request.clone();
        let validation = Box::pin(async move { history.validate_cancel(to_validate).await });

        match self.await_validation(validation, rx).await {
            None => true,
            Some(Err(e)) => {
                let _ = reply.send(CancelOutcome::OrderCancelRejected {
                    message: e.to_string(),
                });
                true
            }
            Some(Ok(order_id)) => match self.book.cancel(&order_id) {
                Some(event) => {
                    let result = self.persist_apply_publish(event).await;
                    let _ = reply.send(CancelOutcome::OrderCanceled { order_id });
                    match result {
                        Ok(()) => true,
                        Err(e) => {
                            error!(pair = %self.pair, error = %e, "journal write failed, stopping controller");
                            false
                        }
                    }
                }
                None => {
                    let _ = reply.send(CancelOutcome::OrderCancelRejected {
                        message: "Order not found".to_string(),
                    });
                    true
                }
            },
        }
    }

    /// Journal first, then mutate the book, then feed the projection.
    async fn persist_apply_publish(&mut self, event: OrderBookEvent) -> Result<(), JournalError> {
        self.journal.append_event(&event, now_millis())?;
        self.book.apply(&event);
        self.history.apply_event(self.pair.key(), event).await;
        Ok(())
    }

    /// Write a snapshot off the controller thread; failures are logged
    /// and the next interval retries.
    fn save_snapshot(&self) {
        if self.journal.next_sequence() <= 1 {
            return; // nothing journaled yet
        }
        let sequence = self.journal.next_sequence() - 1;
        let snapshot = BookSnapshotFile::new(sequence, now_millis(), self.book.snapshot());
        let writer = SnapshotWriter::new(&self.config.snapshot_dir, false);
        let pair = self.pair;
        tokio::task::spawn_blocking(move || {
            match writer
                .write(&snapshot)
                .and_then(|_| writer.prune_others(sequence))
            {
                Ok(_) => info!(pair = %pair, sequence, "book snapshot saved"),
                Err(e) => warn!(pair = %pair, error = %e, "book snapshot failed, will retry"),
            }
        });
    }

    /// Delete this book's storage and stop; responds with an empty book.
    fn on_delete(&mut self, reply: oneshot::Sender<OrderBookView>) {
        if let Err(e) = purge_book_storage(&self.config.snapshot_dir, &self.config.journal_dir) {
            warn!(pair = %self.pair, error = %e, "failed to purge book storage");
        }
        info!(pair = %self.pair, "order book deleted");
        let _ = reply.send(OrderBookView::empty(self.pair));
    }

    fn view(&self, depth: Option<usize>) -> OrderBookView {
        let view = self.book.depth(depth);
        OrderBookView {
            pair: self.pair,
            bids: view
                .bids
                .into_iter()
                .map(|(price, amount)| LevelView {
                    price: price.value(),
                    amount,
                })
                .collect(),
            asks: view
                .asks
                .into_iter()
                .map(|(price, amount)| LevelView {
                    price: price.value(),
                    amount,
                })
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("journal open failed: {0}")]
    Journal(#[from] JournalError),
}
