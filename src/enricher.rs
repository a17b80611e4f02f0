//! Enriches raw catalog rows into `MarketCandidate`s: book-derived mid and
//! depth, layered sponsor-pool lookup, and keyword-based category
//! classification.
//!
//! The typed `CatalogMarket` schema is parsed once in `models.rs`; this
//! module never re-parses raw JSON, it only reads typed fields off it.

use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::keywords;
use crate::models::{Category, CatalogMarket, MarketCandidate, MidSource, SponsorMethod};
use crate::venue::VenueClient;

const MIN_ENRICHED_DEPTH: f64 = 80.0;

/// Reasons a candidate is dropped during enrichment, logged at `warn`/`info`
/// (per-market recoverable errors).
#[derive(Debug)]
pub enum SkipReason {
    MissingTokenId,
    MalformedTokenIds,
    EmptyBook,
    ShallowDepth,
    SponsorBelowFloor,
    BookFetchFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingTokenId => write!(f, "missing token id"),
            SkipReason::MalformedTokenIds => write!(f, "malformed clobTokenIds"),
            SkipReason::EmptyBook => write!(f, "empty order book"),
            SkipReason::ShallowDepth => write!(f, "liquidity depth below floor"),
            SkipReason::SponsorBelowFloor => write!(f, "sponsor pool below configured floor"),
            SkipReason::BookFetchFailed(e) => write!(f, "book fetch failed: {}", e),
        }
    }
}

/// Extracts the first token id out of a `clobTokenIds` field, which may be
/// a JSON array, or (commonly, a quirk of the upstream catalog) a JSON
/// array encoded as a string.
fn first_token_id(raw: &serde_json::Value) -> Option<String> {
    match raw {
        serde_json::Value::Array(items) => items.first().and_then(|v| v.as_str()).map(String::from),
        serde_json::Value::String(s) => {
            let parsed: serde_json::Value = serde_json::from_str(s).ok()?;
            first_token_id(&parsed)
        }
        _ => None,
    }
}

/// Enriches one catalog row. Returns `Ok(None)` for a recoverable per-market
/// skip (logged by the caller), `Err` only for unexpected transport errors
/// surfaced so the cycle driver can decide whether to continue.
pub async fn enrich_market(
    raw: &CatalogMarket,
    venue: &dyn VenueClient,
    catalog: &CatalogClient,
    min_sponsor_pool: f64,
    min_liquidity_depth: f64,
) -> Result<MarketCandidate, SkipReason> {
    let token_id = match &raw.clob_token_ids {
        Some(v) => first_token_id(v).ok_or(SkipReason::MalformedTokenIds)?,
        None => return Err(SkipReason::MissingTokenId),
    };
    if token_id.is_empty() {
        return Err(SkipReason::MissingTokenId);
    }

    let book = venue
        .get_order_book(&token_id)
        .await
        .map_err(|e| SkipReason::BookFetchFailed(e.to_string()))?;

    let best_bid = book.bids.iter().map(|l| l.price).fold(None, |acc, p| {
        Some(acc.map_or(p, |a: f64| a.max(p)))
    });
    let best_ask = book.asks.iter().map(|l| l.price).fold(None, |acc, p| {
        Some(acc.map_or(p, |a: f64| a.min(p)))
    });
    let bid_size = book
        .bids
        .iter()
        .find(|l| Some(l.price) == best_bid)
        .map(|l| l.size)
        .unwrap_or(0.0);
    let ask_size = book
        .asks
        .iter()
        .find(|l| Some(l.price) == best_ask)
        .map(|l| l.size)
        .unwrap_or(0.0);

    let (mid, mid_source) = match (best_bid, best_ask) {
        (Some(b), Some(a)) => ((b + a) / 2.0, MidSource::Orderbook),
        _ => {
            let last_trade = venue.get_last_trade_price(&token_id).await.ok().flatten();
            match (last_trade, best_bid, best_ask) {
                (Some(p), _, _) if p > 0.0 => (p, MidSource::LastTrade),
                (_, Some(b), None) => (b, MidSource::BidOnly),
                (_, None, Some(a)) => (a, MidSource::AskOnly),
                _ => (0.0, MidSource::Empty),
            }
        }
    };

    if mid <= 0.0 || matches!(mid_source, MidSource::Empty) {
        return Err(SkipReason::EmptyBook);
    }

    let range1h = match (best_bid, best_ask) {
        (Some(b), Some(a)) if mid > 0.0 => (a - b) / mid,
        _ => 0.0,
    };

    let liquidity_depth = bid_size * best_bid.unwrap_or(mid) + ask_size * best_ask.unwrap_or(mid);
    if liquidity_depth < MIN_ENRICHED_DEPTH {
        return Err(SkipReason::ShallowDepth);
    }

    let title = raw
        .question
        .clone()
        .or_else(|| raw.slug.clone())
        .unwrap_or_else(|| raw.condition_id.clone());

    let (sponsor_pool, sponsor_method) = lookup_sponsor_pool(raw, &token_id, catalog, &title).await;
    if sponsor_pool < min_sponsor_pool {
        return Err(SkipReason::SponsorBelowFloor);
    }

    let (category, category_label, tier1, category_bonus) =
        classify_category(&title, sponsor_pool > 0.0);

    let _ = min_liquidity_depth; // penalty, not a hard skip; applied by the scorer.

    Ok(MarketCandidate {
        condition_id: raw.condition_id.clone(),
        token_id,
        neg_risk: raw.neg_risk,
        title,
        volume_24h: raw.volume_24hr.unwrap_or(0.0),
        best_bid,
        best_ask,
        bid_size,
        ask_size,
        mid,
        mid_source,
        range1h,
        tick_size: book.tick_size,
        liquidity_depth,
        sponsor_pool,
        sponsor_method,
        category,
        category_label,
        tier1,
        score: category_bonus,
    })
}

/// Layered sponsor-pool lookup: catalog row, then `/rewards?conditionId`,
/// then `/rewards?token_id`, then a bulk scan of `/rewards/markets`, then
/// the keyword fallback.
async fn lookup_sponsor_pool(
    raw: &CatalogMarket,
    token_id: &str,
    catalog: &CatalogClient,
    title: &str,
) -> (f64, SponsorMethod) {
    if let Some(pool) = raw.sponsor_pool.filter(|p| *p > 0.0) {
        return (pool, SponsorMethod::Catalog);
    }

    match catalog.fetch_rewards_by_condition(&raw.condition_id).await {
        Ok(Some(pool)) => return (pool, SponsorMethod::RewardsByCondition),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "rewards-by-condition lookup failed"),
    }

    match catalog.fetch_rewards_by_token(token_id).await {
        Ok(Some(pool)) => return (pool, SponsorMethod::RewardsByToken),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "rewards-by-token lookup failed"),
    }

    match catalog
        .fetch_rewards_markets_scan(&raw.condition_id, token_id)
        .await
    {
        Ok(Some(pool)) => return (pool, SponsorMethod::RewardsMarketsScan),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "rewards markets scan failed"),
    }

    if keywords::matches_force_sponsor(title) {
        return (keywords::FORCE_SPONSOR_POOL, SponsorMethod::KeywordFallback);
    }

    (0.0, SponsorMethod::None)
}

/// Returns `(category, label, tier1, category_bonus)`. The bonus is stashed
/// temporarily in `MarketCandidate.score` by `enrich_market` and replaced
/// with the real composite score by the scorer.
fn classify_category(title: &str, has_sponsor: bool) -> (Category, &'static str, bool, f64) {
    if keywords::is_tier1(title) {
        return (Category::Tier1, "tier1", true, 0.0);
    }
    if keywords::is_negative(title) {
        return (Category::LongTerm, "long-term", false, keywords::NEGATIVE_PENALTY);
    }
    if keywords::is_tier2(title) {
        return (Category::Tier2, "tier2", false, keywords::TIER2_BONUS);
    }
    if has_sponsor {
        return (Category::Sponsored, "sponsored", false, keywords::SPONSOR_BONUS);
    }
    (Category::Other, "other", false, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_id_from_plain_array() {
        let raw = serde_json::json!(["111", "222"]);
        assert_eq!(first_token_id(&raw), Some("111".to_string()));
    }

    #[test]
    fn first_token_id_from_stringified_array() {
        let raw = serde_json::Value::String(r#"["333", "444"]"#.to_string());
        assert_eq!(first_token_id(&raw), Some("333".to_string()));
    }

    #[test]
    fn first_token_id_malformed_is_none() {
        let raw = serde_json::Value::String("not json".to_string());
        assert_eq!(first_token_id(&raw), None);
    }

    #[test]
    fn classify_tier1_wins_over_negative_and_tier2() {
        let (cat, label, tier1, _) = classify_category("Fed Rate decision by 2030", false);
        assert_eq!(cat, Category::Tier1);
        assert_eq!(label, "tier1");
        assert!(tier1);
    }

    #[test]
    fn classify_sponsored_without_keyword_match() {
        let (cat, label, tier1, bonus) = classify_category("Random local zoning vote", true);
        assert_eq!(cat, Category::Sponsored);
        assert_eq!(label, "sponsored");
        assert!(!tier1);
        assert_eq!(bonus, keywords::SPONSOR_BONUS);
    }
}
