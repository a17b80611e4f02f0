//! Dynamic spread, near-certain edge handling, inventory skew, and
//! tick alignment.

use crate::models::{MarketCandidate, TargetQuote};

const MIN_SPREAD_BP: u32 = 5;
const MAX_SPREAD_BP: u32 = 60;
const NEAR_CERTAIN_SPREAD_BP: u32 = 5;

/// `range1h` is stored as a raw ratio (`(ask-bid)/mid`, matching the
/// scorer's wide-book check); the volatility thresholds here are expressed
/// in percentage points of the same quantity, hence the ×100.
fn volatility_multiplier(range1h_ratio: f64) -> f64 {
    let pct = range1h_ratio * 100.0;
    if pct > 4.0 {
        1.4
    } else if pct > 2.0 {
        1.2
    } else {
        1.0
    }
}

fn sponsor_multiplier(sponsor_pool: f64) -> f64 {
    if sponsor_pool > 2000.0 {
        0.5
    } else if sponsor_pool > 1000.0 {
        0.7
    } else if sponsor_pool > 500.0 {
        0.85
    } else {
        1.0
    }
}

/// Computes the dynamic spread in bp, clamped to `[5, 60]`.
pub fn dynamic_spread_bp(candidate: &MarketCandidate, base_spread_bp: u32) -> u32 {
    let raw = base_spread_bp as f64
        * sponsor_multiplier(candidate.sponsor_pool)
        * volatility_multiplier(candidate.range1h);
    (raw.round() as u32).clamp(MIN_SPREAD_BP, MAX_SPREAD_BP)
}

/// Inputs controlling the near-certain thresholds. When
/// `aggressive_short_term` is set, the engine treats the edge as "near
/// certain" sooner (0.85/0.15 instead of 0.92/0.08) to capture the last leg
/// of a converging market faster, trading a slightly wider no-man's-land
/// for earlier one-sided pause.
fn near_certain_bounds(aggressive_short_term: bool) -> (f64, f64) {
    if aggressive_short_term {
        (0.85, 0.15)
    } else {
        (0.92, 0.08)
    }
}

fn round_to_tick(value: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    let decimals = (-tick.log10()).round().max(0.0) as i32;
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Produces the target quote for one selected market given its current
/// signed position. Returns `None` if, after tick alignment, `buy >= sell`
/// — the market is skipped for this cycle.
pub fn quote_market(
    candidate: &MarketCandidate,
    position: f64,
    max_position: f64,
    order_size: f64,
    base_spread_bp: u32,
    aggressive_short_term: bool,
) -> Option<TargetQuote> {
    let mid = candidate.mid;
    let tick = if candidate.tick_size > 0.0 {
        candidate.tick_size
    } else {
        0.01
    };

    let mut spread_bp = dynamic_spread_bp(candidate, base_spread_bp);

    let (upper, lower) = near_certain_bounds(aggressive_short_term);
    let mut sell_paused = false;
    let mut buy_paused = false;
    if mid > upper {
        spread_bp = NEAR_CERTAIN_SPREAD_BP;
        sell_paused = true;
    } else if mid < lower {
        spread_bp = NEAR_CERTAIN_SPREAD_BP;
        buy_paused = true;
    }

    let spread_decimal = spread_bp as f64 / 10_000.0;
    let mut buy_price = mid - spread_decimal;
    let mut sell_price = mid + spread_decimal;
    let mut buy_size = order_size;
    let mut sell_size = order_size;
    let mut skew_label = None;

    let threshold = 0.6 * max_position;
    if position > threshold {
        buy_price -= 0.5 * spread_decimal;
        sell_price -= 0.3 * spread_decimal;
        buy_size = (buy_size * 0.5).round().max(2.0);
        skew_label = Some("LONG heavy");
    } else if position < -threshold {
        sell_price += 0.5 * spread_decimal;
        buy_price += 0.3 * spread_decimal;
        sell_size = (sell_size * 0.5).round().max(2.0);
        skew_label = Some("SHORT heavy");
    }

    if position > max_position {
        buy_paused = true;
    }
    if position < -max_position {
        sell_paused = true;
    }

    buy_price = (buy_price / tick).floor() * tick;
    sell_price = (sell_price / tick).ceil() * tick;
    buy_price = buy_price.clamp(tick, 1.0 - tick);
    sell_price = sell_price.clamp(tick, 1.0 - tick);
    buy_price = round_to_tick(buy_price, tick);
    sell_price = round_to_tick(sell_price, tick);

    if buy_price >= sell_price {
        return None;
    }

    Some(TargetQuote {
        condition_id: candidate.condition_id.clone(),
        token_id: candidate.token_id.clone(),
        tick_size: tick,
        buy_price,
        buy_size,
        buy_paused,
        sell_price,
        sell_size,
        sell_paused,
        spread_bp,
        skew_label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, MidSource, SponsorMethod};

    fn candidate(mid: f64, sponsor_pool: f64, range1h: f64, tick_size: f64) -> MarketCandidate {
        MarketCandidate {
            condition_id: "c1".to_string(),
            token_id: "t1".to_string(),
            neg_risk: None,
            title: "Test".to_string(),
            volume_24h: 5000.0,
            best_bid: Some(mid - 0.01),
            best_ask: Some(mid + 0.01),
            bid_size: 100.0,
            ask_size: 100.0,
            mid,
            mid_source: MidSource::Orderbook,
            range1h,
            tick_size,
            liquidity_depth: 200.0,
            sponsor_pool,
            sponsor_method: SponsorMethod::None,
            category: Category::Other,
            category_label: "other",
            tier1: false,
            score: 0.0,
        }
    }

    #[test]
    fn clean_quote_matches_scenario_1() {
        let c = candidate(0.40, 0.0, 0.0, 0.01);
        let quote = quote_market(&c, 0.0, 100.0, 50.0, 22, false).unwrap();
        assert_eq!(quote.buy_price, 0.39);
        assert_eq!(quote.sell_price, 0.41);
    }

    #[test]
    fn sponsor_adjusted_spread_matches_scenario_2() {
        let c = candidate(0.50, 1500.0, 0.0, 0.01);
        let quote = quote_market(&c, 0.0, 100.0, 50.0, 22, false).unwrap();
        assert_eq!(quote.spread_bp, 15);
        assert_eq!(quote.buy_price, 0.49);
        assert_eq!(quote.sell_price, 0.51);
    }

    #[test]
    fn inventory_skew_long_matches_scenario_3() {
        let c = candidate(0.50, 0.0, 0.0, 0.01);
        let quote = quote_market(&c, 20.0, 30.0, 10.0, 20, false).unwrap();
        assert_eq!(quote.skew_label, Some("LONG heavy"));
        assert_eq!(quote.buy_size, 5.0);
    }

    #[test]
    fn near_certain_lock_in_matches_scenario_4() {
        let c = candidate(0.95, 0.0, 0.0, 0.01);
        let quote = quote_market(&c, 0.0, 100.0, 50.0, 20, false).unwrap();
        assert!(quote.sell_paused);
        assert_eq!(quote.spread_bp, 5);
        assert_eq!(quote.buy_price, 0.94);
    }

    #[test]
    fn spread_is_always_within_bounds() {
        for pool in [0.0, 600.0, 1200.0, 2500.0] {
            for range in [0.0, 0.03, 0.05] {
                let c = candidate(0.5, pool, range, 0.01);
                let spread = dynamic_spread_bp(&c, 150);
                assert!((5..=60).contains(&spread));
            }
        }
    }

    #[test]
    fn position_beyond_cap_pauses_the_growing_side() {
        let c = candidate(0.5, 0.0, 0.0, 0.01);
        let quote = quote_market(&c, 150.0, 100.0, 10.0, 20, false).unwrap();
        assert!(quote.buy_paused);
    }

    #[test]
    fn tick_misalignment_skips_the_market() {
        let mut c = candidate(0.5, 0.0, 0.0, 0.5);
        c.tick_size = 0.5;
        let quote = quote_market(&c, 0.0, 100.0, 10.0, 5, false);
        assert!(quote.is_none());
    }
}
