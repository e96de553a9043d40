//! Request/response protocol
//!
//! The transport-agnostic message set of the engine. Controllers answer
//! submissions, cancellations, and book reads; the dispatcher answers
//! routing-level requests and the markets listing. The REST facade maps
//! these onto HTTP.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use types::assets::{AssetPair, IssueMetadata};
use types::errors::MatcherError;
use types::order::{CancelOrderRequest, Order, OrderId};

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum SubmitOutcome {
    OrderAccepted { order: Order },
    OrderRejected { message: String },
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum CancelOutcome {
    OrderCanceled { order_id: OrderId },
    OrderCancelRejected { message: String },
}

/// One aggregated price level in a depth view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelView {
    pub price: u64,
    pub amount: u64,
}

/// A depth-truncated view of one pair's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookView {
    pub pair: AssetPair,
    pub bids: Vec<LevelView>,
    pub asks: Vec<LevelView>,
}

impl OrderBookView {
    pub fn empty(pair: AssetPair) -> Self {
        Self {
            pair,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }
}

/// One row of an order history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHistoryEntry {
    pub id: OrderId,
    #[serde(rename = "type")]
    pub order_type: String,
    pub amount: u64,
    pub price: u64,
    pub timestamp: i64,
    pub filled: u64,
    pub status: String,
    pub asset_pair: AssetPair,
}

/// Tradable balance of both assets of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradableBalanceView {
    pub amount_asset: u64,
    pub price_asset: u64,
}

/// Per-market metadata served by the markets listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub pair: AssetPair,
    pub amount_asset_name: String,
    pub price_asset_name: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_asset_info: Option<IssueMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_asset_info: Option<IssueMetadata>,
}

/// The markets listing: matcher identity plus open markets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketsView {
    pub matcher_public_key: String,
    pub markets: Vec<MarketInfo>,
}

/// Controller mailbox messages. Reads are always served; writes go
/// through validation first.
pub enum OrderBookRequest {
    Submit {
        order: Order,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    Cancel {
        request: CancelOrderRequest,
        reply: oneshot::Sender<CancelOutcome>,
    },
    Depth {
        depth: Option<usize>,
        reply: oneshot::Sender<OrderBookView>,
    },
    Delete {
        reply: oneshot::Sender<OrderBookView>,
    },
}

/// Dispatcher mailbox messages. Pair validation and orientation checks
/// happen here before anything reaches a controller.
pub enum DispatcherRequest {
    Submit {
        order: Order,
        reply: oneshot::Sender<Result<SubmitOutcome, MatcherError>>,
    },
    Cancel {
        pair: AssetPair,
        request: CancelOrderRequest,
        reply: oneshot::Sender<Result<CancelOutcome, MatcherError>>,
    },
    Depth {
        pair: AssetPair,
        depth: Option<usize>,
        reply: oneshot::Sender<Result<OrderBookView, MatcherError>>,
    },
    DeleteBook {
        pair: AssetPair,
        reply: oneshot::Sender<Result<OrderBookView, MatcherError>>,
    },
    Markets {
        reply: oneshot::Sender<MarketsView>,
    },
}
