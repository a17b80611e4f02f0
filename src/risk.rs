//! Risk governor: circuit breaker, order-size/position clamps, and
//! position auto-repair. A struct of clamped calculator methods producing
//! a small decision/guardrail-flags bundle, with an inline test module
//! exercising each threshold.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::store::Store;

/// Fraction of total capital beyond which the daily realized-PnL loss
/// latches the circuit breaker for the remainder of the calendar day.
const CIRCUIT_BREAKER_LOSS_FRACTION: f64 = 0.03;
const ORDER_SIZE_CAP_FRACTION: f64 = 0.08;
const MAX_POSITION_CAP_FRACTION: f64 = 0.48;
const POSITION_DRIFT_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub can_quote: bool,
    pub circuit_breaker: bool,
    pub order_size: f64,
    pub max_position: f64,
    pub guardrail_flags: Vec<String>,
}

/// Cached circuit-breaker state the dashboard-facing `get_stats` action
/// reads concurrently with an in-flight cycle. `parking_lot`
/// keeps this lock cheap since the critical section never awaits.
#[derive(Default)]
pub struct CircuitBreakerCache {
    tripped: RwLock<bool>,
}

impl CircuitBreakerCache {
    pub fn set(&self, tripped: bool) {
        *self.tripped.write() = tripped;
    }

    pub fn get(&self) -> bool {
        *self.tripped.read()
    }
}

/// Evaluates the circuit breaker and clamps before any quoting work runs.
/// Also auto-repairs any stored position whose magnitude has drifted past
/// `1.5 * max_position`.
pub async fn evaluate(store: &Store, config: &Config) -> anyhow::Result<RiskDecision> {
    let mut guardrail_flags = Vec::new();
    let today = Utc::now().date_naive();
    let row = store.get_or_create_daily_pnl(today, config.total_capital).await?;

    if row.circuit_breaker_triggered {
        warn!(date = %today, "circuit breaker already latched today, skipping cycle");
        return Ok(RiskDecision {
            can_quote: false,
            circuit_breaker: true,
            order_size: 0.0,
            max_position: 0.0,
            guardrail_flags: vec!["circuit_breaker_already_latched".to_string()],
        });
    }

    let loss_floor = -(CIRCUIT_BREAKER_LOSS_FRACTION * config.total_capital);
    if row.realized_pnl < loss_floor {
        store.latch_circuit_breaker(today).await?;
        warn!(
            realized_pnl = row.realized_pnl,
            loss_floor, "circuit breaker latched: daily loss limit breached"
        );
        return Ok(RiskDecision {
            can_quote: false,
            circuit_breaker: true,
            order_size: 0.0,
            max_position: 0.0,
            guardrail_flags: vec!["circuit_breaker_latched_this_cycle".to_string()],
        });
    }

    let order_size_cap = (ORDER_SIZE_CAP_FRACTION * config.total_capital).floor().max(1.0);
    let order_size = if config.order_size_usd > order_size_cap {
        guardrail_flags.push("order_size_clamped".to_string());
        order_size_cap
    } else {
        config.order_size_usd
    };

    let max_position_cap = (MAX_POSITION_CAP_FRACTION * config.total_capital).floor();
    let max_position = if config.max_position > max_position_cap {
        guardrail_flags.push("max_position_clamped".to_string());
        max_position_cap
    } else {
        config.max_position
    };

    let drift_threshold = POSITION_DRIFT_MULTIPLIER * max_position;
    for position in store.list_positions().await? {
        if position.position.abs() > drift_threshold {
            info!(
                market_id = %position.market_id,
                position = position.position,
                drift_threshold,
                "auto-repairing drifted position"
            );
            store.zero_position(&position.market_id).await?;
            guardrail_flags.push(format!("position_repaired:{}", position.market_id));
        }
    }

    Ok(RiskDecision {
        can_quote: true,
        circuit_breaker: false,
        order_size,
        max_position,
        guardrail_flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(total_capital: f64, order_size: f64, max_position: f64) -> Config {
        Config {
            database_path: String::new(),
            port: 0,
            order_size_usd: order_size,
            base_spread_bp: 100,
            cycle_interval_secs: 30,
            max_markets: 10,
            max_position,
            min_sponsor_pool: 0.0,
            min_liquidity_depth: 0.0,
            min_volume_24h: 0.0,
            total_capital,
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
        }
    }

    #[tokio::test]
    async fn circuit_breaker_trips_on_daily_loss() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        store.get_or_create_daily_pnl(today, 65.0).await.unwrap();
        store.apply_pnl_delta(today, -2.0, 1).await.unwrap();

        let decision = evaluate(&store, &config(65.0, 5.0, 30.0)).await.unwrap();
        assert!(decision.circuit_breaker);
        assert!(!decision.can_quote);

        let row = store.get_daily_pnl(today).await.unwrap().unwrap();
        assert!(row.circuit_breaker_triggered);
    }

    #[tokio::test]
    async fn already_latched_breaker_short_circuits_without_reevaluating() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        store.get_or_create_daily_pnl(today, 1000.0).await.unwrap();
        store.latch_circuit_breaker(today).await.unwrap();

        let decision = evaluate(&store, &config(1000.0, 50.0, 100.0)).await.unwrap();
        assert!(decision.circuit_breaker);
        assert!(!decision.can_quote);
    }

    #[tokio::test]
    async fn order_size_and_max_position_are_clamped() {
        let store = Store::open_in_memory().unwrap();
        let decision = evaluate(&store, &config(1000.0, 200.0, 900.0)).await.unwrap();
        assert_eq!(decision.order_size, 80.0);
        assert_eq!(decision.max_position, 480.0);
        assert!(decision.guardrail_flags.contains(&"order_size_clamped".to_string()));
        assert!(decision.guardrail_flags.contains(&"max_position_clamped".to_string()));
    }

    #[tokio::test]
    async fn drifted_position_is_auto_repaired() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_position("m1", 1000.0).await.unwrap();
        let decision = evaluate(&store, &config(1000.0, 10.0, 100.0)).await.unwrap();
        assert_eq!(store.get_position("m1").await.unwrap(), 0.0);
        assert!(decision
            .guardrail_flags
            .iter()
            .any(|f| f.starts_with("position_repaired")));
    }
}
