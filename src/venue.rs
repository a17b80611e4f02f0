//! Venue CLOB client: derives API credentials from the held signer key,
//! fetches order books and open orders, and places/cancels GTC limit
//! orders.
//!
//! This crate does not perform settlement or custody; the signer key is
//! held only to derive request signatures, never to move funds directly.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::models::{RestingOrder, Side};

type HmacSha256 = Hmac<Sha256>;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sliding-window limiter, one per logical endpoint group.
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
                debug!(wait_ms = wait_time.as_millis() as u64, "venue rate limit");
                sleep(wait_time).await;
                self.current_requests = 0;
                self.window_start = std::time::Instant::now();
            }
        }
        self.current_requests += 1;
    }
}

/// Derived API credentials, held for the life of the process.
#[derive(Clone)]
pub struct ApiCreds {
    pub api_key: String,
    secret: String,
    passphrase: String,
}

impl ApiCreds {
    /// Truncated prefix surfaced by the `derive_creds` control action, never
    /// the full key.
    pub fn prefix(&self) -> String {
        self.api_key.chars().take(8).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

impl RawLevel {
    fn parsed(&self) -> BookLevel {
        BookLevel {
            price: self.price.parse().unwrap_or(0.0),
            size: self.size.parse().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub tick_size: f64,
}

#[derive(Debug, Deserialize, Default)]
struct RawOrderBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default, rename = "tick_size")]
    tick_size: Option<String>,
    #[serde(default, rename = "minimum_tick_size")]
    minimum_tick_size: Option<String>,
}

pub struct PlaceOrderRequest {
    pub token_id: String,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub tick_size: f64,
    pub neg_risk: bool,
}

pub struct PlaceOrderResult {
    pub order_id: String,
}

/// Capabilities the quoting engine consumes from the venue.
/// Split out as a trait so tests can substitute a mock that never touches
/// the network.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook>;
    /// Last executed trade price, used as the mid-derivation fallback when
    /// the book has neither a bid nor an ask.
    async fn get_last_trade_price(&self, token_id: &str) -> Result<Option<f64>>;
    async fn get_open_orders(&self, token_id: &str) -> Result<Vec<RestingOrder>>;
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
    async fn cancel_all(&self) -> Result<u64>;
    fn creds_prefix(&self) -> Option<String>;

    /// Lightweight unauthenticated check for venue-side geographic
    /// restriction. Default assumes unblocked; venues with a real signal
    /// override this.
    async fn probe_geoblock(&self) -> Result<bool> {
        Ok(false)
    }
}

pub struct PolymarketClobClient {
    client: Client,
    base_url: String,
    creds: ApiCreds,
    signature_type: String,
    book_limiter: tokio::sync::Mutex<RateLimiter>,
    order_limiter: tokio::sync::Mutex<RateLimiter>,
}

impl PolymarketClobClient {
    /// Derives an API key/secret/passphrase triple from the held signer key,
    /// the same shape `POLYMARKET_CLOB_API_KEY`/`_SECRET`/`_PASSPHRASE`
    /// would carry if pre-provisioned. Returns a fatal-init error if the
    /// signer key is absent. `signature_type` is passed through verbatim to
    /// every signed request's `POLY_SIGNATURE_TYPE` header; the venue
    /// itself rejects an unsupported value.
    pub fn new(
        base_url: &str,
        signer_key: &str,
        funder_address: Option<&str>,
        signature_type: &str,
    ) -> Result<Self> {
        if signer_key.trim().is_empty() {
            bail!("missing signer key");
        }
        let creds = derive_api_creds(signer_key, funder_address.unwrap_or_default())?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            creds,
            signature_type: signature_type.to_string(),
            book_limiter: tokio::sync::Mutex::new(RateLimiter::new(500)),
            order_limiter: tokio::sync::Mutex::new(RateLimiter::new(150)),
        })
    }

    fn sign(&self, method: &str, path: &str, body: &str, timestamp: i64) -> Result<String> {
        let message = format!("{}{}{}{}", timestamp, method, path, body);
        let secret_bytes = URL_SAFE
            .decode(&self.creds.secret)
            .context("failed to decode CLOB secret")?;
        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| anyhow!("HMAC key error: {}", e))?;
        mac.update(message.as_bytes());
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(String, String)>> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.sign(method, path, body, timestamp)?;
        Ok(vec![
            ("POLY_API_KEY".to_string(), self.creds.api_key.clone()),
            ("POLY_SIGNATURE".to_string(), signature),
            ("POLY_TIMESTAMP".to_string(), timestamp.to_string()),
            ("POLY_PASSPHRASE".to_string(), self.creds.passphrase.clone()),
            ("POLY_SIGNATURE_TYPE".to_string(), self.signature_type.clone()),
        ])
    }

    async fn execute_with_retry(
        &self,
        method: reqwest::Method,
        path: &str,
        params: Option<&HashMap<&str, String>>,
        body: Option<&str>,
        authed: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(p) = params {
                request = request.query(p);
            }
            if let Some(b) = body {
                request = request.body(b.to_string());
                request = request.header("content-type", "application/json");
            }
            if authed {
                let headers = self.auth_headers(method.as_str(), path, body.unwrap_or(""))?;
                for (k, v) in headers {
                    request = request.header(k, v);
                }
            }

            match timeout(REQUEST_TIMEOUT, request.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        return Ok(response);
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt = attempt + 1, "venue rate limited, backing off");
                        sleep(Duration::from_millis(backoff * 10)).await;
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        bail!("venue error {}: {}", status, text);
                    }
                }
                Ok(Err(e)) => warn!(attempt = attempt + 1, error = %e, "venue request failed"),
                Err(_) => warn!(attempt = attempt + 1, "venue request timed out"),
            }

            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }
        bail!("max retries exceeded for {}", path)
    }
}

#[async_trait]
impl VenueClient for PolymarketClobClient {
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook> {
        self.book_limiter.lock().await.acquire().await;
        let mut params = HashMap::new();
        params.insert("token_id", token_id.to_string());
        let response = self
            .execute_with_retry(reqwest::Method::GET, "/book", Some(&params), None, false)
            .await?;
        let raw: RawOrderBook = response.json().await.context("failed to parse order book")?;
        let tick_size = raw
            .tick_size
            .or(raw.minimum_tick_size)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.01);
        Ok(OrderBook {
            bids: raw.bids.iter().map(RawLevel::parsed).collect(),
            asks: raw.asks.iter().map(RawLevel::parsed).collect(),
            tick_size,
        })
    }

    async fn get_last_trade_price(&self, token_id: &str) -> Result<Option<f64>> {
        self.book_limiter.lock().await.acquire().await;
        let mut params = HashMap::new();
        params.insert("token_id", token_id.to_string());
        let response = self
            .execute_with_retry(reqwest::Method::GET, "/price", Some(&params), None, false)
            .await?;
        let parsed: RawPriceInfo = match response.json().await {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        Ok(parsed.price)
    }

    async fn get_open_orders(&self, token_id: &str) -> Result<Vec<RestingOrder>> {
        self.order_limiter.lock().await.acquire().await;
        let mut params = HashMap::new();
        params.insert("asset_id", token_id.to_string());
        let response = self
            .execute_with_retry(
                reqwest::Method::GET,
                "/orders",
                Some(&params),
                None,
                true,
            )
            .await?;
        let raw: Vec<RawOpenOrder> = response.json().await.context("failed to parse open orders")?;
        Ok(raw
            .into_iter()
            .filter_map(|o| {
                Some(RestingOrder {
                    id: o.id,
                    asset_id: o.asset_id,
                    side: match o.side.to_uppercase().as_str() {
                        "BUY" => Side::Buy,
                        "SELL" => Side::Sell,
                        _ => return None,
                    },
                    price: o.price.parse().ok()?,
                    size: o.original_size.parse().ok()?,
                })
            })
            .collect())
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult> {
        self.order_limiter.lock().await.acquire().await;
        let payload = ClobOrderPayload {
            token_id: req.token_id,
            price: format!("{:.6}", req.price),
            size: format!("{:.6}", req.size),
            side: req.side.as_str().to_string(),
            order_type: "GTC".to_string(),
            tick_size: format!("{}", req.tick_size),
            neg_risk: req.neg_risk,
        };
        let body = serde_json::to_string(&payload).context("failed to serialize order")?;
        let response = self
            .execute_with_retry(reqwest::Method::POST, "/order", None, Some(&body), true)
            .await?;
        let parsed: ClobOrderResponse = response.json().await.context("failed to parse order response")?;
        let order_id = parsed
            .order_id
            .ok_or_else(|| anyhow!(parsed.error_msg.unwrap_or_else(|| "order rejected".to_string())))?;
        Ok(PlaceOrderResult { order_id })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.order_limiter.lock().await.acquire().await;
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        self.execute_with_retry(reqwest::Method::DELETE, "/order", None, Some(&body), true)
            .await?;
        Ok(())
    }

    async fn cancel_all(&self) -> Result<u64> {
        self.order_limiter.lock().await.acquire().await;
        let response = self
            .execute_with_retry(reqwest::Method::DELETE, "/cancel-all", None, None, true)
            .await?;
        let parsed: CancelAllResponse = response.json().await.unwrap_or_default();
        Ok(parsed.canceled.len() as u64)
    }

    fn creds_prefix(&self) -> Option<String> {
        Some(self.creds.prefix())
    }

    /// A 451 (Unavailable For Legal Reasons) on the unauthenticated root
    /// is treated as a geoblock; any other response or a transport error
    /// is treated as unblocked, since this probe is advisory only.
    async fn probe_geoblock(&self) -> Result<bool> {
        let url = format!("{}/", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status() == StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS),
            Err(e) => {
                warn!(error = %e, "geoblock probe request failed, assuming unblocked");
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawPriceInfo {
    #[serde(default)]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawOpenOrder {
    id: String,
    asset_id: String,
    side: String,
    price: String,
    #[serde(rename = "original_size")]
    original_size: String,
}

#[derive(Debug, Serialize)]
struct ClobOrderPayload {
    #[serde(rename = "tokenID")]
    token_id: String,
    price: String,
    size: String,
    side: String,
    #[serde(rename = "orderType")]
    order_type: String,
    #[serde(rename = "tickSize")]
    tick_size: String,
    #[serde(rename = "negRisk")]
    neg_risk: bool,
}

#[derive(Debug, Deserialize)]
struct ClobOrderResponse {
    #[serde(rename = "orderID", alias = "orderId", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", alias = "error", default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CancelAllResponse {
    #[serde(default)]
    canceled: Vec<String>,
}

/// Derives an API key/secret/passphrase from the signer key via HMAC,
/// applied once at startup instead of per call. This crate does not
/// implement wallet custody; the derivation below stands in for
/// Polymarket's L1-signature-to-L2-key exchange, which is out of scope
/// here.
fn derive_api_creds(signer_key: &str, funder_address: &str) -> Result<ApiCreds> {
    let mut mac = HmacSha256::new_from_slice(signer_key.as_bytes())
        .map_err(|e| anyhow!("HMAC key error: {}", e))?;
    mac.update(b"polymarket-clob-api-key");
    mac.update(funder_address.as_bytes());
    let api_key_bytes = mac.finalize().into_bytes();
    let api_key = hex::encode(&api_key_bytes[..16]);

    let mut secret_mac = HmacSha256::new_from_slice(signer_key.as_bytes())
        .map_err(|e| anyhow!("HMAC key error: {}", e))?;
    secret_mac.update(b"polymarket-clob-secret");
    let secret = URL_SAFE.encode(secret_mac.finalize().into_bytes());

    let mut pass_mac = HmacSha256::new_from_slice(signer_key.as_bytes())
        .map_err(|e| anyhow!("HMAC key error: {}", e))?;
    pass_mac.update(b"polymarket-clob-passphrase");
    let passphrase = hex::encode(&pass_mac.finalize().into_bytes()[..8]);

    Ok(ApiCreds {
        api_key,
        secret,
        passphrase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_api_creds_is_deterministic() {
        let a = derive_api_creds("signer-key", "0xabc").unwrap();
        let b = derive_api_creds("signer-key", "0xabc").unwrap();
        assert_eq!(a.api_key, b.api_key);
        assert_eq!(a.prefix().len(), 8);
    }

    #[test]
    fn derive_api_creds_rejects_blank_key_upstream() {
        let result = PolymarketClobClient::new("https://clob.polymarket.com", "", None, "0");
        assert!(result.is_err());
    }
}
