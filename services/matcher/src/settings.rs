//! Matcher configuration
//!
//! Defaults, an optional `matcher.toml`, and environment overrides
//! prefixed with `MATCHER_` (nested fields separated with `__`). Pairs
//! and assets use the wire representation: `"NATIVE"` or 64 hex chars,
//! pairs as `"<amount>-<price>"`.

use serde::Deserialize;
use types::assets::{AssetId, AssetPair};

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherSettings {
    pub enable: bool,
    /// Hex seed of the matcher signing key; empty generates an ephemeral
    /// key on boot.
    pub account: String,
    pub bind_address: String,
    pub port: u16,
    pub min_order_fee: u64,
    pub order_match_tx_fee: u64,
    pub journal_data_dir: String,
    pub snapshots_data_dir: String,
    pub snapshots_interval_secs: u64,
    pub max_open_orders: usize,
    pub max_orders_per_address: usize,
    /// Assets preferred as the price side, in priority order.
    pub price_assets: Vec<String>,
    pub predefined_pairs: Vec<String>,
    pub max_timestamp_diff_ms: i64,
    pub order_history_file: String,
    pub blacklisted_assets: Vec<String>,
    pub cancel_counter_on_reject: bool,
    pub validation_timeout_ms: u64,
    pub portfolio_release_delay_secs: u64,
}

impl MatcherSettings {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("enable", true)?
            .set_default("account", "")?
            .set_default("bind_address", "127.0.0.1")?
            .set_default("port", 6886)?
            .set_default("min_order_fee", 300_000)?
            .set_default("order_match_tx_fee", 300_000)?
            .set_default("journal_data_dir", "matcher/journal")?
            .set_default("snapshots_data_dir", "matcher/snapshots")?
            .set_default("snapshots_interval_secs", 60)?
            .set_default("max_open_orders", 1000)?
            .set_default("max_orders_per_address", 1000)?
            .set_default("price_assets", Vec::<String>::new())?
            .set_default("predefined_pairs", Vec::<String>::new())?
            .set_default("max_timestamp_diff_ms", 3 * 60 * 1000)?
            .set_default("order_history_file", "matcher/history.db")?
            .set_default("blacklisted_assets", Vec::<String>::new())?
            .set_default("cancel_counter_on_reject", true)?
            .set_default("validation_timeout_ms", 5_000)?
            .set_default("portfolio_release_delay_secs", 30)?
            .add_source(config::File::with_name("matcher").required(false))
            .add_source(
                config::Environment::with_prefix("MATCHER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        config.try_deserialize()
    }

    pub fn parsed_price_assets(&self) -> Result<Vec<AssetId>, config::ConfigError> {
        self.price_assets
            .iter()
            .map(|s| {
                AssetId::parse(s).ok_or_else(|| {
                    config::ConfigError::Message(format!("invalid price asset: {}", s))
                })
            })
            .collect()
    }

    pub fn parsed_predefined_pairs(&self) -> Result<Vec<AssetPair>, config::ConfigError> {
        self.predefined_pairs.iter().map(|s| parse_pair(s)).collect()
    }

    pub fn parsed_blacklist(&self) -> Result<Vec<AssetId>, config::ConfigError> {
        self.blacklisted_assets
            .iter()
            .map(|s| {
                AssetId::parse(s).ok_or_else(|| {
                    config::ConfigError::Message(format!("invalid blacklisted asset: {}", s))
                })
            })
            .collect()
    }
}

/// Parse `"<amount>-<price>"` into a pair.
pub fn parse_pair(s: &str) -> Result<AssetPair, config::ConfigError> {
    let (amount, price) = s
        .split_once('-')
        .ok_or_else(|| config::ConfigError::Message(format!("invalid pair: {}", s)))?;
    let amount_asset = AssetId::parse(amount)
        .ok_or_else(|| config::ConfigError::Message(format!("invalid asset: {}", amount)))?;
    let price_asset = AssetId::parse(price)
        .ok_or_else(|| config::ConfigError::Message(format!("invalid asset: {}", price)))?;
    Ok(AssetPair::new(amount_asset, price_asset))
}
