//! Engine configuration, loaded from the environment with an
//! `unwrap_or_else` / `parse().unwrap_or(default)` cascade, plus a
//! `sanitize()` pass applying the required clamps.

use serde::Deserialize;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Engine-wide configuration. Every field here can be overridden per-request
/// by the control API's `run_cycle` action (see `api::control`), so the
/// struct also derives `Deserialize` with every field optional via
/// `RunCycleOverrides`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,

    /// USDC notional quoted per side, before the risk governor's clamp.
    pub order_size_usd: f64,
    /// Base half-spread in basis points before dynamic widening.
    pub base_spread_bp: u32,
    /// Seconds between cycle ticks.
    pub cycle_interval_secs: u64,
    /// Upper bound on markets quoted simultaneously.
    pub max_markets: usize,
    /// Upper bound on absolute shares held in a single market.
    pub max_position: f64,
    /// Minimum sponsor-pool USDC a market must carry to be eligible.
    pub min_sponsor_pool: f64,
    /// Minimum combined bid+ask depth, in USDC, required at enrichment.
    pub min_liquidity_depth: f64,
    /// Minimum rolling 24h volume, in USDC, required to survive pre-filter.
    pub min_volume_24h: f64,
    /// Total capital allocated to this engine instance.
    pub total_capital: f64,

    /// When true, no live orders are placed; `paper::PaperSimulator` fills
    /// synthetically instead.
    pub paper_mode: bool,
    /// When true, the external-oracle advisory hook is consulted and
    /// logged; it never overrides the quoting formula.
    pub external_oracle_enabled: bool,
    /// When true, near-certain markets (mid outside the near-certain band)
    /// get the aggressive short-horizon spread treatment.
    pub aggressive_short_term: bool,

    pub venue_base_url: String,
    pub venue_signer_key: Option<String>,
    pub venue_funder_address: Option<String>,
    /// Polymarket CLOB signature type: "0" (EOA), "1" (poly proxy), "2"
    /// (Gnosis Safe). Passed through to the venue client's auth headers
    /// but never validated here — the venue rejects an unsupported value.
    pub venue_signature_type: String,

    pub catalog_base_url: String,
    pub rewards_base_url: String,
    pub oracle_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self {
            database_path: env_string("DATABASE_PATH", "./market_maker.db"),
            port: env_or("PORT", 8080u16),

            order_size_usd: env_or("ORDER_SIZE_USD", 50.0),
            base_spread_bp: env_or("BASE_SPREAD_BP", 150u32),
            cycle_interval_secs: env_or("CYCLE_INTERVAL_SECS", 30u64),
            max_markets: env_or("MAX_MARKETS", 15usize),
            max_position: env_or("MAX_POSITION", 500.0),
            min_sponsor_pool: env_or("MIN_SPONSOR_POOL", 100.0),
            min_liquidity_depth: env_or("MIN_LIQUIDITY_DEPTH", 200.0),
            min_volume_24h: env_or("MIN_VOLUME_24H", 1000.0),
            total_capital: env_or("TOTAL_CAPITAL", 5000.0),

            paper_mode: env_or("PAPER_MODE", true),
            external_oracle_enabled: env_or("EXTERNAL_ORACLE_ENABLED", false),
            aggressive_short_term: env_or("AGGRESSIVE_SHORT_TERM", false),

            venue_base_url: env_string("VENUE_BASE_URL", "https://clob.polymarket.com"),
            venue_signer_key: std::env::var("VENUE_SIGNER_KEY").ok(),
            venue_funder_address: std::env::var("VENUE_FUNDER_ADDRESS").ok(),
            venue_signature_type: env_string("VENUE_SIGNATURE_TYPE", "0"),

            catalog_base_url: env_string("CATALOG_BASE_URL", "https://gamma-api.polymarket.com"),
            rewards_base_url: env_string(
                "REWARDS_BASE_URL",
                "https://clob.polymarket.com",
            ),
            oracle_base_url: std::env::var("ORACLE_BASE_URL").ok(),
        };
        config.sanitize();
        Ok(config)
    }

    /// Clamps order size and max position against total capital. The risk
    /// governor re-applies the same clamps every cycle; this pass just
    /// keeps a misconfigured `.env` from ever taking effect in the first
    /// place.
    pub fn sanitize(&mut self) {
        let order_cap = self.total_capital * 0.08;
        if self.order_size_usd > order_cap {
            self.order_size_usd = order_cap;
        }
        let position_cap = self.total_capital * 0.48;
        if self.max_position > position_cap {
            self.max_position = position_cap;
        }
        if self.max_markets == 0 {
            self.max_markets = 1;
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RunCycleOverrides) {
        if let Some(v) = overrides.order_size_usd {
            self.order_size_usd = v;
        }
        if let Some(v) = overrides.base_spread_bp {
            self.base_spread_bp = v;
        }
        if let Some(v) = overrides.max_markets {
            self.max_markets = v;
        }
        if let Some(v) = overrides.max_position {
            self.max_position = v;
        }
        if let Some(v) = overrides.paper_mode {
            self.paper_mode = v;
        }
        self.sanitize();
    }
}

/// Per-request override of `Config`, accepted as the JSON body of the
/// control API's `run_cycle` action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunCycleOverrides {
    pub order_size_usd: Option<f64>,
    pub base_spread_bp: Option<u32>,
    pub max_markets: Option<usize>,
    pub max_position: Option<f64>,
    pub paper_mode: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_order_size_to_capital_fraction() {
        let mut config = Config {
            database_path: String::new(),
            port: 0,
            order_size_usd: 1000.0,
            base_spread_bp: 100,
            cycle_interval_secs: 30,
            max_markets: 10,
            max_position: 100.0,
            min_sponsor_pool: 0.0,
            min_liquidity_depth: 0.0,
            min_volume_24h: 0.0,
            total_capital: 1000.0,
            paper_mode: true,
            external_oracle_enabled: false,
            aggressive_short_term: false,
            venue_base_url: String::new(),
            venue_signer_key: None,
            venue_funder_address: None,
            venue_signature_type: "0".to_string(),
            catalog_base_url: String::new(),
            rewards_base_url: String::new(),
            oracle_base_url: None,
        };
        config.sanitize();
        assert_eq!(config.order_size_usd, 80.0);
    }

    #[test]
    fn sanitize_clamps_max_position_to_capital_fraction() {
        let mut config = Config {
            database_path: String::new(),
            port: 0,
            order_size_usd: 10.0,
            base_spread_bp: 100,
            cycle_interval_secs: 30,
            max_markets: 10,
            max_position: 5000.0,
            min_sponsor_pool: 0.0,
            min_liquidity_depth: 0.0,
            min_volume_24h: 0.0,
            total_capital: 1000.0,
            paper_mode: true,
            external_oracle_enabled: false,
            aggressive_short_term: false,
            venue_base_url: String::new(),
            venue_signer_key: None,
            venue_funder_address: None,
            venue_signature_type: "0".to_string(),
            catalog_base_url: String::new(),
            rewards_base_url: String::new(),
            oracle_base_url: None,
        };
        config.sanitize();
        assert_eq!(config.max_position, 480.0);
    }
}
