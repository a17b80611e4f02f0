//! Control API: a single action-dispatch endpoint, `{action, ...params}`
//! over JSON, with typed `Json` extractors and `StatusCode`-mapped errors.

use std::sync::Arc;

use axum::{
    extract::State as AxumState,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::RunCycleOverrides;
use crate::cycle::Engine;

pub type ApiState = Arc<Engine>;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    DeriveCreds,
    GetMarkets {
        #[serde(default = "default_markets_limit")]
        limit: usize,
    },
    GetStats,
    GetPositions,
    GetPnlHistory,
    CancelAll,
    ResetPositions,
    RunCycle {
        #[serde(flatten)]
        overrides: RunCycleOverrides,
    },
    Whoami,
    Start,
    Stop,
}

fn default_markets_limit() -> usize {
    50
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, crate::error::normalize_error(&e))
    }
}

/// Single dispatch handler for every control action. All responses are
/// JSON; errors return `{error: string}` with 4xx/5xx (enforced by
/// `ApiError`'s `IntoResponse`).
pub async fn dispatch(
    AxumState(state): AxumState<ApiState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Value>, ApiError> {
    let body = match request {
        ControlRequest::DeriveCreds => json!({
            "apiKeyPrefix": state.creds_prefix().unwrap_or_default(),
        }),
        ControlRequest::GetMarkets { limit } => {
            let rows = state.catalog().fetch_top_markets(limit).await?;
            json!({ "markets": rows })
        }
        ControlRequest::GetStats => {
            let positions = state.store().list_positions().await?;
            let open_positions = positions.iter().filter(|p| p.position != 0.0).count();
            let total_value: f64 = positions.iter().map(|p| p.position).sum();
            let today = chrono::Utc::now().date_naive();
            let pnl_row = state.store().get_daily_pnl(today).await?;
            let cumulative_pnl = state
                .store()
                .recent_pnl_history(1)
                .await?
                .first()
                .map(|(_, cumulative)| *cumulative)
                .unwrap_or(0.0);
            json!({
                "openOrders": state.open_orders_sample().await.len(),
                "totalValue": total_value,
                "pnl": pnl_row.as_ref().map(|r| r.realized_pnl).unwrap_or(0.0),
                "cumulativePnl": cumulative_pnl,
                "openPositions": open_positions,
                "positions": positions,
                "circuitBreaker": state.circuit_breaker_tripped(),
            })
        }
        ControlRequest::GetPositions => {
            let rows = state.store().list_positions().await?;
            json!({ "positions": rows })
        }
        ControlRequest::GetPnlHistory => {
            let rows = state.store().recent_pnl_history(30).await?;
            let history: Vec<Value> = rows
                .into_iter()
                .map(|(row, cumulative)| {
                    json!({
                        "date": row.date.to_string(),
                        "realizedPnl": row.realized_pnl,
                        "totalCapital": row.total_capital,
                        "tradeCount": row.trade_count,
                        "circuitBreakerTriggered": row.circuit_breaker_triggered,
                        "cumulativePnl": cumulative,
                    })
                })
                .collect();
            json!({ "history": history })
        }
        ControlRequest::CancelAll => {
            let canceled = state.cancel_all().await?;
            json!({ "canceled": canceled })
        }
        ControlRequest::ResetPositions => {
            state.store().reset_positions().await?;
            json!({ "reset": true })
        }
        ControlRequest::RunCycle { overrides } => {
            match state.tick(Some(overrides)).await {
                Some(report) => json!({
                    "logs": report.logs,
                    "ordersPlaced": report.orders_placed,
                    "circuitBreaker": report.circuit_breaker,
                    "sponsoredMarkets": report.sponsored_markets,
                    "totalMarkets": report.total_markets,
                    "avgSponsor": report.avg_sponsor,
                }),
                None => json!({
                    "logs": ["cycle dropped: previous cycle still in flight"],
                    "ordersPlaced": 0,
                    "circuitBreaker": state.circuit_breaker_tripped(),
                    "sponsoredMarkets": 0,
                    "totalMarkets": 0,
                    "avgSponsor": 0.0,
                }),
            }
        }
        ControlRequest::Whoami => {
            let geoblocked = state.probe_geoblock().await?;
            let open_orders = state.open_orders_sample().await;
            let recent_actions = state.store().recent_trade_log(10).await?;
            json!({
                "identity": state.creds_prefix().unwrap_or_default(),
                "geoblocked": geoblocked,
                "openOrders": open_orders,
                "recentActions": recent_actions,
            })
        }
        ControlRequest::Start => {
            state.start();
            json!({ "started": true })
        }
        ControlRequest::Stop => {
            let canceled = state.stop().await?;
            json!({ "stopped": true, "canceled": canceled })
        }
    };
    Ok(Json(body))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub cycles: u64,
    pub last_cycle: Option<chrono::DateTime<chrono::Utc>>,
    pub total_orders: u64,
    pub uptime: u64,
}

/// `GET /`
pub async fn health_index(AxumState(state): AxumState<ApiState>) -> Json<HealthResponse> {
    let config = state.config_snapshot();
    Json(HealthResponse {
        status: if state.is_enabled() { "running" } else { "stopped" },
        mode: if config.paper_mode { "paper" } else { "live" },
        cycles: state.cycles_completed(),
        last_cycle: state.last_cycle_at(),
        total_orders: state.total_orders(),
        uptime: state.uptime_secs(),
    })
}

/// `GET /health`
pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_request_parses_action_tagged_json() {
        let req: ControlRequest = serde_json::from_str(r#"{"action": "get_stats"}"#).unwrap();
        matches!(req, ControlRequest::GetStats);
    }

    #[test]
    fn run_cycle_request_accepts_flattened_overrides() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"action": "run_cycle", "paper_mode": true}"#).unwrap();
        match req {
            ControlRequest::RunCycle { overrides } => assert_eq!(overrides.paper_mode, Some(true)),
            _ => panic!("expected RunCycle"),
        }
    }

    #[test]
    fn get_markets_defaults_limit_when_absent() {
        let req: ControlRequest = serde_json::from_str(r#"{"action": "get_markets"}"#).unwrap();
        match req {
            ControlRequest::GetMarkets { limit } => assert_eq!(limit, 50),
            _ => panic!("expected GetMarkets"),
        }
    }
}
