//! Optional external oracle hook: when enabled and a market's title
//! matches a crypto keyword, fetches a reference spot price from a public
//! ticker for observability only. It never overrides the book-derived mid
//! in the quoting formula.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::keywords;

pub struct OracleClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

impl OracleClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Symbol guess from a market title, good enough for the advisory spot
    /// lookup this hook performs; not used for anything load-bearing.
    fn symbol_for_title(title: &str) -> Option<&'static str> {
        let lower = title.to_lowercase();
        if lower.contains("bitcoin") || lower.contains("btc") {
            Some("BTCUSDT")
        } else if lower.contains("ethereum") || lower.contains("eth") {
            Some("ETHUSDT")
        } else {
            None
        }
    }

    /// Fetches the spot price if the title looks crypto-related, logging
    /// it next to the book mid. Returns `Ok(None)` when the title doesn't
    /// match or the oracle is unreachable — failures here are
    /// per-market-recoverable, never fatal.
    pub async fn observe(&self, market_id: &str, title: &str, book_mid: f64) -> Result<Option<f64>> {
        if !keywords::is_crypto_title(title) {
            return Ok(None);
        }
        let Some(symbol) = Self::symbol_for_title(title) else {
            return Ok(None);
        };

        let url = format!("{}/ticker/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(market_id, error = %e, "oracle fetch failed, continuing with book mid");
                return Ok(None);
            }
        };

        let parsed: TickerResponse = response.json().await.context("failed to parse oracle ticker")?;
        let spot: f64 = parsed.price.parse().unwrap_or(0.0);
        if spot <= 0.0 {
            return Ok(None);
        }

        debug!(
            market_id,
            book_mid,
            oracle_spot = spot,
            "external oracle observation (advisory only, does not affect quoting)"
        );
        Ok(Some(spot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_guess_matches_known_crypto_titles() {
        assert_eq!(OracleClient::symbol_for_title("Bitcoin above $100k"), Some("BTCUSDT"));
        assert_eq!(OracleClient::symbol_for_title("Ethereum merge v2"), Some("ETHUSDT"));
        assert_eq!(OracleClient::symbol_for_title("Will it rain"), None);
    }
}
