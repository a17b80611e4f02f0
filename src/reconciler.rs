//! Reconciles a target quote against currently resting orders: keep orders
//! within tolerance, cancel and replace otherwise, drop duplicates, and
//! cancel everything on a paused side.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::normalize_error;
use crate::models::{RestingOrder, Side, TargetQuote, TradeAction, TradeLogEntry, TradeNote};
use crate::venue::{PlaceOrderRequest, VenueClient};

/// Price tolerance within which an existing order is kept as-is, in
/// decimal terms (0.5 bp).
const KEEP_TOLERANCE: f64 = 0.00005;

pub struct ReconcileOutcome {
    pub entries: Vec<TradeLogEntry>,
    pub orders_placed: u64,
}

fn log_entry(
    market_id: &str,
    market_name: &str,
    action: TradeAction,
    side: Option<Side>,
    price: Option<f64>,
    size: Option<f64>,
    note: TradeNote,
) -> TradeLogEntry {
    TradeLogEntry {
        id: None,
        ts: Utc::now(),
        market_id: market_id.to_string(),
        market_name: market_name.to_string(),
        action,
        side,
        price,
        size,
        paper: false,
        note,
    }
}

async fn cancel_order(
    venue: &dyn VenueClient,
    order: &RestingOrder,
    market_id: &str,
    market_name: &str,
) -> TradeLogEntry {
    let start = std::time::Instant::now();
    match venue.cancel_order(&order.id).await {
        Ok(()) => log_entry(
            market_id,
            market_name,
            TradeAction::Cancel,
            Some(order.side),
            Some(order.price),
            Some(order.size),
            TradeNote {
                event_type: "cancel_order".to_string(),
                order_id: Some(order.id.clone()),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
        ),
        Err(e) => {
            let message = normalize_error(&e);
            warn!(order_id = %order.id, error = %message, "cancel failed");
            log_entry(
                market_id,
                market_name,
                TradeAction::Error,
                Some(order.side),
                Some(order.price),
                Some(order.size),
                TradeNote {
                    event_type: "cancel_order".to_string(),
                    order_id: Some(order.id.clone()),
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    error: Some(message),
                },
            )
        }
    }
}

async fn place_order(
    venue: &dyn VenueClient,
    token_id: &str,
    side: Side,
    price: f64,
    size: f64,
    tick_size: f64,
    neg_risk: bool,
    market_id: &str,
    market_name: &str,
) -> (TradeLogEntry, bool) {
    let start = std::time::Instant::now();
    let request = PlaceOrderRequest {
        token_id: token_id.to_string(),
        price,
        size,
        side,
        tick_size,
        neg_risk,
    };
    match venue.place_order(request).await {
        Ok(result) => (
            log_entry(
                market_id,
                market_name,
                TradeAction::Place,
                Some(side),
                Some(price),
                Some(size),
                TradeNote {
                    event_type: "place_order".to_string(),
                    order_id: Some(result.order_id),
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    error: None,
                },
            ),
            true,
        ),
        Err(e) => {
            let message = normalize_error(&e);
            warn!(market_id, side = side.as_str(), error = %message, "place failed");
            (
                log_entry(
                    market_id,
                    market_name,
                    TradeAction::Error,
                    Some(side),
                    Some(price),
                    Some(size),
                    TradeNote {
                        event_type: "place_order".to_string(),
                        order_id: None,
                        latency_ms: Some(start.elapsed().as_millis() as u64),
                        error: Some(message),
                    },
                ),
                false,
            )
        }
    }
}

/// Reconciles one side of one market. `existing` must already be filtered
/// to this `(token_id, side)` pair.
async fn reconcile_side(
    venue: &dyn VenueClient,
    market_id: &str,
    market_name: &str,
    token_id: &str,
    side: Side,
    target_price: f64,
    target_size: f64,
    paused: bool,
    tick_size: f64,
    neg_risk: bool,
    existing: &[RestingOrder],
) -> ReconcileOutcome {
    let mut entries = Vec::new();
    let mut orders_placed = 0u64;

    if paused {
        for order in existing {
            entries.push(cancel_order(venue, order, market_id, market_name).await);
        }
        return ReconcileOutcome {
            entries,
            orders_placed,
        };
    }

    let mut duplicates = &existing[..];
    if let Some(first) = existing.first() {
        duplicates = &existing[1..];
        if (first.price - target_price).abs() <= KEEP_TOLERANCE {
            info!(
                market_id,
                side = side.as_str(),
                price = first.price,
                "♻️ keeping resting order within tolerance"
            );
        } else {
            entries.push(cancel_order(venue, first, market_id, market_name).await);
            let (entry, placed) = place_order(
                venue,
                token_id,
                side,
                target_price,
                target_size,
                tick_size,
                neg_risk,
                market_id,
                market_name,
            )
            .await;
            entries.push(entry);
            if placed {
                orders_placed += 1;
            }
        }
    } else {
        let (entry, placed) = place_order(
            venue,
            token_id,
            side,
            target_price,
            target_size,
            tick_size,
            neg_risk,
            market_id,
            market_name,
        )
        .await;
        entries.push(entry);
        if placed {
            orders_placed += 1;
        }
    }

    for order in duplicates {
        entries.push(cancel_order(venue, order, market_id, market_name).await);
    }

    ReconcileOutcome {
        entries,
        orders_placed,
    }
}

/// Reconciles both sides of one market. BUY reconciliation precedes SELL.
pub async fn reconcile_market(
    venue: &dyn VenueClient,
    market_id: &str,
    market_name: &str,
    quote: &TargetQuote,
    resting: &[RestingOrder],
    neg_risk: bool,
) -> ReconcileOutcome {
    let buy_existing: Vec<RestingOrder> = resting
        .iter()
        .filter(|o| o.asset_id == quote.token_id && o.side == Side::Buy)
        .cloned()
        .collect();
    let sell_existing: Vec<RestingOrder> = resting
        .iter()
        .filter(|o| o.asset_id == quote.token_id && o.side == Side::Sell)
        .cloned()
        .collect();

    let mut buy_outcome = reconcile_side(
        venue,
        market_id,
        market_name,
        &quote.token_id,
        Side::Buy,
        quote.buy_price,
        quote.buy_size,
        quote.buy_paused,
        quote.tick_size,
        neg_risk,
        &buy_existing,
    )
    .await;

    let sell_outcome = reconcile_side(
        venue,
        market_id,
        market_name,
        &quote.token_id,
        Side::Sell,
        quote.sell_price,
        quote.sell_size,
        quote.sell_paused,
        quote.tick_size,
        neg_risk,
        &sell_existing,
    )
    .await;

    buy_outcome.entries.extend(sell_outcome.entries);
    ReconcileOutcome {
        entries: buy_outcome.entries,
        orders_placed: buy_outcome.orders_placed + sell_outcome.orders_placed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{OrderBook, PlaceOrderResult};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockVenue {
        placed: AtomicU64,
        canceled: AtomicU64,
        fail_place: bool,
        seen_prices: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl VenueClient for MockVenue {
        async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook> {
            unimplemented!()
        }
        async fn get_last_trade_price(&self, _token_id: &str) -> Result<Option<f64>> {
            Ok(None)
        }
        async fn get_open_orders(&self, _token_id: &str) -> Result<Vec<RestingOrder>> {
            Ok(vec![])
        }
        async fn place_order(&self, req: PlaceOrderRequest) -> Result<PlaceOrderResult> {
            self.seen_prices.lock().unwrap().push(req.price);
            if self.fail_place {
                anyhow::bail!("simulated failure");
            }
            self.placed.fetch_add(1, Ordering::SeqCst);
            Ok(PlaceOrderResult {
                order_id: "order-1".to_string(),
            })
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            self.canceled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn cancel_all(&self) -> Result<u64> {
            Ok(0)
        }
        fn creds_prefix(&self) -> Option<String> {
            None
        }
    }

    fn quote() -> TargetQuote {
        TargetQuote {
            condition_id: "c1".to_string(),
            token_id: "t1".to_string(),
            tick_size: 0.01,
            buy_price: 0.39,
            buy_size: 10.0,
            buy_paused: false,
            sell_price: 0.41,
            sell_size: 10.0,
            sell_paused: false,
            spread_bp: 22,
            skew_label: None,
        }
    }

    #[tokio::test]
    async fn keeps_order_within_tolerance_with_no_placement() {
        let venue = MockVenue::default();
        let existing = vec![RestingOrder {
            id: "o1".to_string(),
            asset_id: "t1".to_string(),
            side: Side::Buy,
            price: 0.39,
            size: 10.0,
        }];
        let outcome =
            reconcile_market(&venue, "c1", "Test", &quote(), &existing, false).await;
        assert_eq!(venue.placed.load(Ordering::SeqCst), 1); // sell side still places
        assert_eq!(venue.canceled.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.orders_placed, 1);
    }

    #[tokio::test]
    async fn replaces_order_outside_tolerance() {
        let venue = MockVenue::default();
        let existing = vec![RestingOrder {
            id: "o1".to_string(),
            asset_id: "t1".to_string(),
            side: Side::Buy,
            price: 0.30,
            size: 10.0,
        }];
        reconcile_market(&venue, "c1", "Test", &quote(), &existing, false).await;
        assert_eq!(venue.canceled.load(Ordering::SeqCst), 1);
        assert_eq!(venue.placed.load(Ordering::SeqCst), 2); // replace buy + place sell
    }

    #[tokio::test]
    async fn cancels_duplicates_beyond_first() {
        let venue = MockVenue::default();
        let existing = vec![
            RestingOrder {
                id: "o1".to_string(),
                asset_id: "t1".to_string(),
                side: Side::Buy,
                price: 0.39,
                size: 10.0,
            },
            RestingOrder {
                id: "o2".to_string(),
                asset_id: "t1".to_string(),
                side: Side::Buy,
                price: 0.39,
                size: 10.0,
            },
        ];
        reconcile_market(&venue, "c1", "Test", &quote(), &existing, false).await;
        assert_eq!(venue.canceled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paused_side_cancels_all_and_places_none() {
        let venue = MockVenue::default();
        let mut q = quote();
        q.sell_paused = true;
        let existing = vec![RestingOrder {
            id: "o1".to_string(),
            asset_id: "t1".to_string(),
            side: Side::Sell,
            price: 0.41,
            size: 10.0,
        }];
        let outcome = reconcile_market(&venue, "c1", "Test", &q, &existing, false).await;
        assert_eq!(venue.canceled.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.orders_placed, 1); // buy side still placed
    }
}
