//! Market catalog and sponsor-rewards HTTP clients. Same `RateLimiter` +
//! `execute_with_retry` shape as the venue client, one limiter per
//! logical endpoint group.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::models::CatalogMarket;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct RateLimiter {
    requests_per_10s: u32,
    current_requests: u32,
    window_start: std::time::Instant,
}

impl RateLimiter {
    fn new(requests_per_10s: u32) -> Self {
        Self {
            requests_per_10s,
            current_requests: 0,
            window_start: std::time::Instant::now(),
        }
    }

    async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(10) {
            self.current_requests = 0;
            self.window_start = std::time::Instant::now();
        }
        if self.current_requests >= self.requests_per_10s {
            let wait_time = Duration::from_secs(10).saturating_sub(elapsed);
            if wait_time > Duration::ZERO {
                sleep(wait_time).await;
                self.current_requests = 0;
                self.window_start = std::time::Instant::now();
            }
        }
        self.current_requests += 1;
    }
}

pub struct CatalogClient {
    client: Client,
    catalog_base_url: String,
    rewards_base_url: String,
    markets_limiter: tokio::sync::Mutex<RateLimiter>,
    rewards_limiter: tokio::sync::Mutex<RateLimiter>,
}

impl CatalogClient {
    pub fn new(catalog_base_url: &str, rewards_base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            catalog_base_url: catalog_base_url.trim_end_matches('/').to_string(),
            rewards_base_url: rewards_base_url.trim_end_matches('/').to_string(),
            markets_limiter: tokio::sync::Mutex::new(RateLimiter::new(75)),
            rewards_limiter: tokio::sync::Mutex::new(RateLimiter::new(75)),
        }
    }

    async fn get(&self, base: &str, path: &str, params: &HashMap<&str, String>) -> Result<reqwest::Response> {
        let url = format!("{}{}", base, path);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            let request = self.client.get(&url).query(params);
            match timeout(REQUEST_TIMEOUT, request.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        return Ok(response);
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt = attempt + 1, "catalog rate limited, backing off");
                        sleep(Duration::from_millis(backoff * 10)).await;
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        bail!("catalog error {}: {}", status, text);
                    }
                }
                Ok(Err(e)) => warn!(attempt = attempt + 1, error = %e, "catalog request failed"),
                Err(_) => warn!(attempt = attempt + 1, "catalog request timed out"),
            }
            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }
        bail!("max retries exceeded for {}", path)
    }

    /// Fetches up to 90 active markets ordered by 24h volume descending. If
    /// the ordered request fails, retries once without the ordering
    /// parameter.
    pub async fn fetch_top_markets(&self, limit: usize) -> Result<Vec<CatalogMarket>> {
        self.markets_limiter.lock().await.acquire().await;

        let mut params = HashMap::new();
        params.insert("limit", limit.to_string());
        params.insert("active", "true".to_string());
        params.insert("closed", "false".to_string());
        params.insert("order", "volume24hr".to_string());
        params.insert("ascending", "false".to_string());

        match self.get(&self.catalog_base_url, "/markets", &params).await {
            Ok(response) => response
                .json::<Vec<CatalogMarket>>()
                .await
                .context("failed to parse catalog markets"),
            Err(ordered_err) => {
                warn!(error = %ordered_err, "ordered catalog fetch failed, retrying without ordering");
                params.remove("order");
                params.remove("ascending");
                let response = self.get(&self.catalog_base_url, "/markets", &params).await?;
                response
                    .json::<Vec<CatalogMarket>>()
                    .await
                    .context("failed to parse catalog markets (unordered)")
            }
        }
    }

    pub async fn fetch_rewards_by_condition(&self, condition_id: &str) -> Result<Option<f64>> {
        self.rewards_limiter.lock().await.acquire().await;
        let mut params = HashMap::new();
        params.insert("conditionId", condition_id.to_string());
        let response = self.get(&self.rewards_base_url, "/rewards", &params).await?;
        let body: RewardsShape = response.json().await.context("failed to parse rewards")?;
        Ok(body.sponsor_amount())
    }

    pub async fn fetch_rewards_by_token(&self, token_id: &str) -> Result<Option<f64>> {
        self.rewards_limiter.lock().await.acquire().await;
        let mut params = HashMap::new();
        params.insert("token_id", token_id.to_string());
        let response = self.get(&self.rewards_base_url, "/rewards", &params).await?;
        let body: RewardsShape = response.json().await.context("failed to parse rewards")?;
        Ok(body.sponsor_amount())
    }

    /// Scans the bulk `/rewards/markets` listing for a row matching either
    /// id, the last-resort lookup before the keyword fallback.
    pub async fn fetch_rewards_markets_scan(
        &self,
        condition_id: &str,
        token_id: &str,
    ) -> Result<Option<f64>> {
        self.rewards_limiter.lock().await.acquire().await;
        let params = HashMap::new();
        let response = self
            .get(&self.rewards_base_url, "/rewards/markets", &params)
            .await?;
        let rows: Vec<RewardsShape> = response
            .json()
            .await
            .context("failed to parse rewards markets scan")?;
        Ok(rows
            .into_iter()
            .find(|row| {
                row.condition_id.as_deref() == Some(condition_id)
                    || row.token_id.as_deref() == Some(token_id)
            })
            .and_then(|row| row.sponsor_amount()))
    }
}

/// Sponsor-rewards responses vary in field name across catalog revisions;
/// this struct accepts the union and returns the first positive value
/// found, in documented precedence order.
#[derive(Debug, Deserialize, Default)]
struct RewardsShape {
    #[serde(rename = "conditionId", default)]
    condition_id: Option<String>,
    #[serde(rename = "tokenId", default)]
    token_id: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(rename = "rewardsPool", default)]
    rewards_pool: Option<f64>,
    #[serde(rename = "sponsorPool", default)]
    sponsor_pool: Option<f64>,
    #[serde(rename = "max_spread_bps", default)]
    #[allow(dead_code)]
    max_spread_bps: Option<Value>,
}

impl RewardsShape {
    fn sponsor_amount(&self) -> Option<f64> {
        [self.amount, self.rewards_pool, self.sponsor_pool]
            .into_iter()
            .flatten()
            .find(|v| *v > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewards_shape_accepts_field_name_union() {
        let shape: RewardsShape = serde_json::from_str(r#"{"rewardsPool": 250.0}"#).unwrap();
        assert_eq!(shape.sponsor_amount(), Some(250.0));
    }

    #[test]
    fn rewards_shape_ignores_zero_and_negative() {
        let shape: RewardsShape = serde_json::from_str(r#"{"amount": 0.0, "sponsorPool": 40.0}"#).unwrap();
        assert_eq!(shape.sponsor_amount(), Some(40.0));
    }

    #[test]
    fn rewards_shape_with_no_amount_field_is_none() {
        let shape: RewardsShape = serde_json::from_str(r#"{"max_spread_bps": 50}"#).unwrap();
        assert_eq!(shape.sponsor_amount(), None);
    }
}
