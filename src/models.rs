//! Shared data types for the quoting engine.
//!
//! Transient per-cycle market candidates, persistent positions/PnL, and
//! the append-only trade log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Side of a two-sided quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// How a market's mid-price was derived, kept for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidSource {
    Orderbook,
    LastTrade,
    BidOnly,
    AskOnly,
    Empty,
}

/// How a sponsor pool value was discovered, kept for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SponsorMethod {
    Catalog,
    RewardsByCondition,
    RewardsByToken,
    RewardsMarketsScan,
    KeywordFallback,
    None,
}

/// Category label assigned by the keyword classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tier1,
    Tier2,
    Sponsored,
    LongTerm,
    Other,
}

/// Raw catalog row as returned by `GET /markets`, parsed once at the
/// enricher boundary. Downstream code never re-parses this, it only reads
/// typed fields off `MarketCandidate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogMarket {
    #[serde(rename = "conditionId")]
    pub condition_id: String,
    #[serde(default, rename = "clobTokenIds")]
    pub clob_token_ids: Option<serde_json::Value>,
    pub question: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, rename = "volume24hr")]
    pub volume_24hr: Option<f64>,
    #[serde(default)]
    pub liquidity: Option<f64>,
    #[serde(default, rename = "negRisk")]
    pub neg_risk: Option<bool>,
    #[serde(default, rename = "rewardsMinSize")]
    pub rewards_min_size: Option<f64>,
    #[serde(default, rename = "rewardsMaxSpread")]
    pub rewards_max_spread: Option<f64>,
    /// Union of sponsor-pool field names observed across catalog revisions;
    /// the enricher tries each in turn.
    #[serde(default)]
    pub sponsor_pool: Option<f64>,
    #[serde(default, rename = "rewardsDailyRate")]
    pub rewards_daily_rate: Option<f64>,
}

/// A candidate market, transient for the duration of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MarketCandidate {
    pub condition_id: String,
    pub token_id: String,
    pub neg_risk: Option<bool>,
    pub title: String,
    pub volume_24h: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub bid_size: f64,
    pub ask_size: f64,
    pub mid: f64,
    pub mid_source: MidSource,
    /// Normalized bid-ask spread, `(ask - bid) / mid`.
    pub range1h: f64,
    pub tick_size: f64,
    pub liquidity_depth: f64,
    pub sponsor_pool: f64,
    pub sponsor_method: SponsorMethod,
    pub category: Category,
    pub category_label: &'static str,
    pub tier1: bool,
    pub score: f64,
}

/// Signed on-chain inventory, persisted keyed by market (condition) id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRow {
    pub market_id: String,
    pub position: f64,
    pub updated_at: DateTime<Utc>,
}

/// One row per UTC calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnlRow {
    pub date: NaiveDate,
    pub realized_pnl: f64,
    pub total_capital: f64,
    pub trade_count: u64,
    pub circuit_breaker_triggered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Place,
    Cancel,
    Error,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Place => "place",
            TradeAction::Cancel => "cancel",
            TradeAction::Error => "error",
        }
    }
}

/// Structured note payload attached to every trade-log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeNote {
    pub event_type: String,
    pub order_id: Option<String>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// An append-only trade-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub id: Option<i64>,
    pub ts: DateTime<Utc>,
    pub market_id: String,
    pub market_name: String,
    pub action: TradeAction,
    pub side: Option<Side>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub paper: bool,
    pub note: TradeNote,
}

/// One resting order fetched from the venue for a single `(token_id, side)`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestingOrder {
    pub id: String,
    pub asset_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

/// The target quote the quoter produces for a single market.
#[derive(Debug, Clone, Serialize)]
pub struct TargetQuote {
    pub condition_id: String,
    pub token_id: String,
    pub tick_size: f64,
    pub buy_price: f64,
    pub buy_size: f64,
    pub buy_paused: bool,
    pub sell_price: f64,
    pub sell_size: f64,
    pub sell_paused: bool,
    pub spread_bp: u32,
    pub skew_label: Option<&'static str>,
}

/// Result of a single `run_cycle` invocation, returned by the control API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub logs: Vec<String>,
    pub orders_placed: u64,
    pub circuit_breaker: bool,
    pub sponsored_markets: u64,
    pub total_markets: u64,
    pub avg_sponsor: f64,
}
