//! Keyword tables used for category classification: data, not code — a
//! static table loaded once, matched case-insensitively as a substring
//! test. Each list's effect is exercised independently in the tests below.

/// Titles matching any of these substrings get `tier1 = true` and a flat
/// score bonus in the scorer.
pub const TIER1_KEYWORDS: &[&str] = &[
    "fed rate",
    "federal reserve",
    "fomc",
    "presidential election",
    "cpi report",
    "jobs report",
    "nonfarm payrolls",
];

/// Macro/crypto/sports titles get a smaller fixed bonus and `category =
/// Tier2`.
pub const TIER2_KEYWORDS: &[&str] = &[
    "bitcoin",
    "ethereum",
    "btc",
    "eth",
    "recession",
    "inflation",
    "gdp",
    "nba",
    "nfl",
    "super bowl",
    "world cup",
    "championship",
];

/// Long-horizon titles get a fixed penalty and `category = LongTerm`.
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "by 2030",
    "by 2050",
    "next decade",
    "century",
    "will ai",
    "colonize mars",
];

/// A handful of well-known high-value titles that force a small nominal
/// sponsor pool when every layered lookup in the enricher comes up empty.
pub const FORCE_SPONSOR_KEYWORDS: &[&str] = &["presidential election", "fed rate", "super bowl"];

/// Fixed score bonus applied when a market carries any sponsor pool,
/// upgrading `category = other` to `category = sponsored`.
pub const SPONSOR_BONUS: f64 = 5_000.0;
/// Fixed score bonus for Tier-2 matches.
pub const TIER2_BONUS: f64 = 3_000.0;
/// Fixed score penalty for Negative matches.
pub const NEGATIVE_PENALTY: f64 = -4_000.0;
/// Nominal sponsor pool (USDC) applied by the force-sponsor fallback.
pub const FORCE_SPONSOR_POOL: f64 = 50.0;

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

pub fn is_tier1(title: &str) -> bool {
    matches_any(title, TIER1_KEYWORDS)
}

pub fn is_tier2(title: &str) -> bool {
    matches_any(title, TIER2_KEYWORDS)
}

pub fn is_negative(title: &str) -> bool {
    matches_any(title, NEGATIVE_KEYWORDS)
}

pub fn matches_force_sponsor(title: &str) -> bool {
    matches_any(title, FORCE_SPONSOR_KEYWORDS)
}

/// Checks whether a title matches any crypto-adjacent keyword, used by the
/// external-oracle hook to decide whether to fetch a spot
/// reference price at all.
pub fn is_crypto_title(title: &str) -> bool {
    matches_any(title, &["bitcoin", "ethereum", "btc", "eth"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier1_matches_case_insensitively() {
        assert!(is_tier1("Will the FED RATE be cut in March?"));
        assert!(!is_tier1("Will it rain tomorrow?"));
    }

    #[test]
    fn tier2_matches_crypto_and_sports() {
        assert!(is_tier2("Bitcoin above $100k by June"));
        assert!(is_tier2("Who wins the NBA championship"));
        assert!(!is_tier2("Random local election"));
    }

    #[test]
    fn negative_matches_long_horizon_titles() {
        assert!(is_negative("Will humans colonize Mars by 2050"));
        assert!(!is_negative("Will the Fed cut rates next week"));
    }

    #[test]
    fn force_sponsor_matches_well_known_titles_only() {
        assert!(matches_force_sponsor("2028 Presidential Election winner"));
        assert!(!matches_force_sponsor("Will it snow in Denver"));
    }
}
