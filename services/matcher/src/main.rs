use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use history::validator::ValidationLimits;
use history::{HistoryConfig, HistoryService};
use matcher::dispatcher::{DispatcherConfig, MatcherDispatcher};
use matcher::rest::{router, AppState};
use matcher::settings::MatcherSettings;
use matcher::settlement::{InMemorySettlement, MatcherKeys};
use tokio::net::TcpListener;
use types::assets::AssetId;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let settings = MatcherSettings::load().context("loading matcher settings")?;
    if !settings.enable {
        tracing::info!("matcher is disabled, exiting");
        return Ok(());
    }

    let journal_data_dir = PathBuf::from(&settings.journal_data_dir);
    let snapshots_data_dir = PathBuf::from(&settings.snapshots_data_dir);
    std::fs::create_dir_all(&journal_data_dir).context("creating journal directory")?;
    std::fs::create_dir_all(&snapshots_data_dir).context("creating snapshots directory")?;

    let keys = if settings.account.is_empty() {
        tracing::warn!("no matcher account configured, generating an ephemeral signing key");
        Arc::new(MatcherKeys::generate())
    } else {
        let seed: [u8; 32] = hex::decode(&settings.account)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .context("matcher account must be a 32-byte hex seed")?;
        Arc::new(MatcherKeys::from_seed(&seed))
    };
    tracing::info!(matcher_public_key = %keys.public(), "matcher identity loaded");

    // Standalone boots run against the in-memory settlement state; a
    // production deployment wires the chain node in here.
    let settlement = Arc::new(InMemorySettlement::new());

    let blacklisted: HashSet<AssetId> = settings
        .parsed_blacklist()
        .context("parsing blacklisted assets")?
        .into_iter()
        .collect();

    let history = HistoryService::spawn(
        HistoryConfig {
            db_path: PathBuf::from(&settings.order_history_file),
            request_ttl_ms: 5_000,
            release_delay: Duration::from_secs(settings.portfolio_release_delay_secs),
            save_interval: Duration::from_secs(60),
            max_orders_per_address: settings.max_orders_per_address,
            limits: ValidationLimits {
                max_timestamp_diff_ms: settings.max_timestamp_diff_ms,
                min_order_fee: settings.min_order_fee,
                max_open_orders: settings.max_open_orders,
                blacklisted_assets: blacklisted,
            },
        },
        settlement.clone(),
    )
    .context("opening the order history database")?;

    let dispatcher = MatcherDispatcher::spawn(
        DispatcherConfig {
            journal_data_dir,
            snapshots_data_dir,
            price_assets: settings.parsed_price_assets().context("parsing price assets")?,
            predefined_pairs: settings
                .parsed_predefined_pairs()
                .context("parsing predefined pairs")?,
            snapshot_interval: Duration::from_secs(settings.snapshots_interval_secs),
            validation_timeout: Duration::from_millis(settings.validation_timeout_ms),
            order_match_tx_fee: settings.order_match_tx_fee,
            cancel_counter_on_reject: settings.cancel_counter_on_reject,
        },
        history.clone(),
        settlement,
        keys,
    )
    .context("starting the matcher dispatcher")?;

    let app = router(AppState {
        dispatcher,
        history,
    });

    let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.port)
        .parse()
        .context("parsing bind address")?;
    let listener = TcpListener::bind(addr).await.context("binding listener")?;
    tracing::info!("matcher listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
