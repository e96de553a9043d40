//! REST facade
//!
//! Maps the request/response protocol onto HTTP. Unknown assets and
//! pairs are 404s; a reversed pair answers with a redirect-style 302
//! carrying the canonical orientation in the message; validation
//! rejections are plain 200 envelopes with a rejection status, the way
//! submitters expect to consume them.

use crate::dispatcher::DispatcherHandle;
use crate::protocol::{
    CancelOutcome, OrderBookView, OrderHistoryEntry, SubmitOutcome, TradableBalanceView,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use history::HistoryHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use types::assets::{Address, AssetId, AssetPair, PublicKey};
use types::errors::MatcherError;
use types::numeric::{Amount, Price};
use types::order::{CancelOrderRequest, Order, OrderId, Side, Signature};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: DispatcherHandle,
    pub history: HistoryHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/matcher/orderbook", post(submit_order))
        .route(
            "/matcher/orderbook/:amount/:price",
            get(get_order_book).delete(delete_order_book),
        )
        .route("/matcher/orderbook/:amount/:price/cancel", post(cancel_order))
        .route(
            "/matcher/orderbook/:amount/:price/status/:order_id",
            get(order_status),
        )
        .route(
            "/matcher/orderbook/:amount/:price/address/:address",
            get(pair_order_history),
        )
        .route(
            "/matcher/orderbook/:amount/:price/address/:address/:order_id",
            delete(delete_order_from_history),
        )
        .route("/matcher/orders/:address", get(all_order_history))
        .route("/matcher/balance/:amount/:price/:address", get(tradable_balance))
        .route("/matcher/markets", get(markets))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    Domain(MatcherError),
    BadRequest(String),
    Unavailable,
}

impl From<MatcherError> for AppError {
    fn from(e: MatcherError) -> Self {
        AppError::Domain(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Domain(e) => {
                let status = match &e {
                    MatcherError::UnknownAsset(_)
                    | MatcherError::InvalidPair(_)
                    | MatcherError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                    MatcherError::InvalidPairOrdering(_) => StatusCode::FOUND,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string())
            }
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Matcher is overloaded".to_string(),
            ),
        };
        let body = Json(json!({ "message": message }));
        (status, body).into_response()
    }
}

// ── Wire models ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitOrderBody {
    pub sender: PublicKey,
    pub amount_asset: AssetId,
    pub price_asset: AssetId,
    pub side: String,
    pub price: u64,
    pub amount: u64,
    pub timestamp: i64,
    pub expiration: i64,
    pub matcher_fee: u64,
    pub signature: Signature,
}

impl SubmitOrderBody {
    fn into_order(self) -> Result<Order, AppError> {
        let side = match self.side.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => {
                return Err(AppError::BadRequest(format!("invalid side: {}", other)));
            }
        };
        let price =
            Price::new(self.price).ok_or(AppError::Domain(MatcherError::NonPositivePrice))?;
        let amount =
            Amount::new(self.amount).ok_or(AppError::Domain(MatcherError::NonPositiveAmount))?;
        Ok(Order::new(
            self.sender,
            AssetPair::new(self.amount_asset, self.price_asset),
            side,
            price,
            amount,
            self.timestamp,
            self.expiration,
            self.matcher_fee,
            self.signature,
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderBody {
    pub sender: PublicKey,
    pub order_id: OrderId,
    pub signature: Signature,
}

#[derive(Debug, Deserialize)]
pub struct DepthParams {
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled: Option<u64>,
}

// ── Handlers ────────────────────────────────────────────────────────

fn parse_pair(amount: &str, price: &str) -> Result<AssetPair, AppError> {
    let amount_asset = AssetId::parse(amount)
        .ok_or_else(|| AppError::BadRequest(format!("invalid asset: {}", amount)))?;
    let price_asset = AssetId::parse(price)
        .ok_or_else(|| AppError::BadRequest(format!("invalid asset: {}", price)))?;
    Ok(AssetPair::new(amount_asset, price_asset))
}

fn parse_address(s: &str) -> Result<Address, AppError> {
    Address::parse(s).ok_or_else(|| AppError::BadRequest(format!("invalid address: {}", s)))
}

fn parse_order_id(s: &str) -> Result<OrderId, AppError> {
    OrderId::parse(s).ok_or_else(|| AppError::BadRequest(format!("invalid order id: {}", s)))
}

async fn submit_order(
    State(state): State<AppState>,
    Json(body): Json<SubmitOrderBody>,
) -> Result<Json<SubmitOutcome>, AppError> {
    let order = body.into_order()?;
    let outcome = state
        .dispatcher
        .submit(order)
        .await
        .ok_or(AppError::Unavailable)??;
    Ok(Json(outcome))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path((amount, price)): Path<(String, String)>,
    Json(body): Json<CancelOrderBody>,
) -> Result<Json<CancelOutcome>, AppError> {
    let pair = parse_pair(&amount, &price)?;
    let request = CancelOrderRequest {
        sender: body.sender,
        order_id: body.order_id,
        signature: body.signature,
    };
    let outcome = state
        .dispatcher
        .cancel(pair, request)
        .await
        .ok_or(AppError::Unavailable)??;
    Ok(Json(outcome))
}

async fn get_order_book(
    State(state): State<AppState>,
    Path((amount, price)): Path<(String, String)>,
    Query(params): Query<DepthParams>,
) -> Result<Json<OrderBookView>, AppError> {
    let pair = parse_pair(&amount, &price)?;
    let view = state
        .dispatcher
        .depth(pair, params.depth)
        .await
        .ok_or(AppError::Unavailable)??;
    Ok(Json(view))
}

async fn delete_order_book(
    State(state): State<AppState>,
    Path((amount, price)): Path<(String, String)>,
) -> Result<Json<OrderBookView>, AppError> {
    let pair = parse_pair(&amount, &price)?;
    let view = state
        .dispatcher
        .delete_book(pair)
        .await
        .ok_or(AppError::Unavailable)??;
    Ok(Json(view))
}

async fn order_status(
    State(state): State<AppState>,
    Path((_amount, _price, order_id)): Path<(String, String, String)>,
) -> Result<Json<StatusResponse>, AppError> {
    let order_id = parse_order_id(&order_id)?;
    let response = match state.history.order_status(order_id).await {
        None => StatusResponse {
            status: "NotFound",
            filled: None,
        },
        Some(status) => StatusResponse {
            status: status.name(),
            filled: match status {
                types::info::OrderStatus::PartiallyFilled { filled }
                | types::info::OrderStatus::Cancelled { filled } => Some(filled),
                types::info::OrderStatus::Filled => None,
                types::info::OrderStatus::Accepted => None,
            },
        },
    };
    Ok(Json(response))
}

fn history_entries(rows: Vec<(Order, types::info::OrderInfo)>) -> Vec<OrderHistoryEntry> {
    rows.into_iter()
        .map(|(order, info)| OrderHistoryEntry {
            id: order.id,
            order_type: order.side.to_string(),
            amount: order.amount.value(),
            price: order.price.value(),
            timestamp: order.timestamp,
            filled: info.filled,
            status: info.status().name().to_string(),
            asset_pair: order.pair,
        })
        .collect()
}

async fn pair_order_history(
    State(state): State<AppState>,
    Path((amount, price, address)): Path<(String, String, String)>,
) -> Result<Json<Vec<OrderHistoryEntry>>, AppError> {
    let pair = parse_pair(&amount, &price)?;
    let address = parse_address(&address)?;
    let rows = state
        .history
        .order_history(Some(pair.key()), address)
        .await;
    Ok(Json(history_entries(rows)))
}

async fn all_order_history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<OrderHistoryEntry>>, AppError> {
    let address = parse_address(&address)?;
    let rows = state.history.order_history(None, address).await;
    Ok(Json(history_entries(rows)))
}

async fn tradable_balance(
    State(state): State<AppState>,
    Path((amount, price, address)): Path<(String, String, String)>,
) -> Result<Json<TradableBalanceView>, AppError> {
    let pair = parse_pair(&amount, &price)?;
    let address = parse_address(&address)?;
    let (amount_asset, price_asset) = state.history.tradable_balance(address, pair).await;
    Ok(Json(TradableBalanceView {
        amount_asset,
        price_asset,
    }))
}

async fn delete_order_from_history(
    State(state): State<AppState>,
    Path((amount, price, address, order_id)): Path<(String, String, String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let pair = parse_pair(&amount, &price)?;
    let address = parse_address(&address)?;
    let order_id = parse_order_id(&order_id)?;
    let deleted = state
        .history
        .delete_order(pair.key(), address, order_id)
        .await?;
    Ok(Json(
        json!({ "status": "OrderDeleted", "order_id": deleted.to_string() }),
    ))
}

async fn markets(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let view = state.dispatcher.markets().await.ok_or(AppError::Unavailable)?;
    Ok(Json(view))
}
