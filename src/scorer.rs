//! Composite scoring and selection.

use tracing::info;

use crate::models::{Category, MarketCandidate};

const VOLUME_CAP: f64 = 500_000.0;
const DEPTH_CAP: f64 = 50_000.0;

const COIN_FLIP_PENALTY: f64 = -2_000.0;
const WIDE_BOOK_PENALTY: f64 = -3_000.0;
const MODERATE_BOOK_PENALTY: f64 = -1_000.0;
const SHALLOW_BOOK_PENALTY: f64 = -1_500.0;

/// Flat bonus for Tier-1 matches, comfortably clear of `TIER2_BONUS` and
/// `SPONSOR_BONUS` so a Tier-1 candidate always outranks an otherwise
/// identical Tier-2 or sponsored one.
const TIER1_BONUS: f64 = 8_000.0;

/// Computes the composite score for one candidate, combining the category
/// bonus `classify_category` already stashed in `candidate.score`.
pub fn score_candidate(candidate: &MarketCandidate, min_liquidity_depth: f64) -> f64 {
    let capped_vol = candidate.volume_24h.min(VOLUME_CAP);
    let capped_depth = candidate.liquidity_depth.min(DEPTH_CAP);

    let mut base = 0.03 * capped_vol + 30.0 * candidate.sponsor_pool + 0.8 * capped_depth
        + candidate.score; // category bonus, set by the enricher

    if (candidate.mid - 0.5).abs() < 0.005 {
        base += COIN_FLIP_PENALTY;
    }

    if candidate.mid > 0.0 {
        let spread_ratio = candidate.range1h;
        if spread_ratio > 0.10 {
            base += WIDE_BOOK_PENALTY;
        } else if spread_ratio > 0.05 {
            base += MODERATE_BOOK_PENALTY;
        }
    }

    if candidate.liquidity_depth < min_liquidity_depth {
        base += SHALLOW_BOOK_PENALTY;
    }

    if candidate.tier1 {
        base + TIER1_BONUS
    } else {
        base
    }
}

/// Scores every candidate in place, sorts descending, and returns the top
/// `max_markets`.
pub fn select_top_markets(
    mut candidates: Vec<MarketCandidate>,
    min_liquidity_depth: f64,
    max_markets: usize,
) -> Vec<MarketCandidate> {
    for candidate in candidates.iter_mut() {
        candidate.score = score_candidate(candidate, min_liquidity_depth);
    }
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(max_markets);

    let sponsored = candidates
        .iter()
        .filter(|c| c.sponsor_pool > 0.0)
        .count();
    let tier1 = candidates.iter().filter(|c| c.tier1).count();
    let tier2 = candidates
        .iter()
        .filter(|c| c.category == Category::Tier2)
        .count();
    info!(
        selected = candidates.len(),
        sponsored, tier1, tier2, "selector: top markets chosen"
    );

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MidSource, SponsorMethod};

    fn base_candidate() -> MarketCandidate {
        MarketCandidate {
            condition_id: "c1".to_string(),
            token_id: "t1".to_string(),
            neg_risk: None,
            title: "Test market".to_string(),
            volume_24h: 10_000.0,
            best_bid: Some(0.39),
            best_ask: Some(0.41),
            bid_size: 100.0,
            ask_size: 100.0,
            mid: 0.40,
            mid_source: MidSource::Orderbook,
            range1h: 0.02,
            tick_size: 0.01,
            liquidity_depth: 500.0,
            sponsor_pool: 0.0,
            sponsor_method: SponsorMethod::None,
            category: Category::Other,
            category_label: "other",
            tier1: false,
            score: 0.0,
        }
    }

    #[test]
    fn increasing_sponsor_pool_never_decreases_score() {
        let low = base_candidate();
        let mut high = base_candidate();
        high.sponsor_pool = 1000.0;
        let low_score = score_candidate(&low, 200.0);
        let high_score = score_candidate(&high, 200.0);
        assert!(high_score >= low_score);
    }

    #[test]
    fn increasing_volume_within_cap_never_decreases_score() {
        let low = base_candidate();
        let mut high = base_candidate();
        high.volume_24h = 20_000.0;
        assert!(score_candidate(&high, 200.0) >= score_candidate(&low, 200.0));
    }

    #[test]
    fn tier1_ranks_strictly_above_identical_tier2() {
        let mut tier2 = base_candidate();
        tier2.category = Category::Tier2;
        tier2.score = crate::keywords::TIER2_BONUS;

        let mut tier1 = base_candidate();
        tier1.tier1 = true;
        tier1.score = 0.0;

        assert!(score_candidate(&tier1, 200.0) > score_candidate(&tier2, 200.0));
    }

    #[test]
    fn coin_flip_penalty_applies_near_half() {
        let mut candidate = base_candidate();
        candidate.mid = 0.501;
        let penalized = score_candidate(&candidate, 200.0);
        candidate.mid = 0.6;
        let unpenalized = score_candidate(&candidate, 200.0);
        assert!(penalized < unpenalized);
    }

    #[test]
    fn select_top_markets_truncates_and_sorts_descending() {
        let mut low = base_candidate();
        low.condition_id = "low".to_string();
        low.volume_24h = 1.0;
        let mut high = base_candidate();
        high.condition_id = "high".to_string();
        high.volume_24h = 100_000.0;

        let selected = select_top_markets(vec![low, high], 200.0, 1);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].condition_id, "high");
    }
}
