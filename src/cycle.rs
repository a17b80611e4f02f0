//! The cycle driver and the orchestration of one full quoting cycle: a
//! process-wide singleton holding cached clients, driven by a periodic
//! timer with an explicit overlap guard so a slow cycle never runs twice
//! at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::CatalogClient;
use crate::config::{Config, RunCycleOverrides};
use crate::enricher;
use crate::models::{CatalogMarket, CycleReport, RestingOrder};
use crate::oracle::OracleClient;
use crate::paper::PaperSimulator;
use crate::quoter;
use crate::reconciler;
use crate::risk::{self, CircuitBreakerCache};
use crate::scorer;
use crate::store::Store;
use crate::venue::VenueClient;

/// Suppresses repeat "overlap skipped" warnings within this window.
const OVERLAP_WARN_SUPPRESS: Duration = Duration::from_secs(15);
const CATALOG_FETCH_LIMIT: usize = 90;

pub struct Engine {
    config: RwLock<Config>,
    store: Store,
    venue: Arc<dyn VenueClient>,
    catalog: CatalogClient,
    oracle: Option<OracleClient>,
    paper: Mutex<PaperSimulator>,
    circuit_breaker: CircuitBreakerCache,

    in_flight: AtomicBool,
    enabled: AtomicBool,
    cycles_completed: AtomicU64,
    total_orders: AtomicU64,
    started_at: Instant,
    last_cycle_at: RwLock<Option<chrono::DateTime<Utc>>>,
    last_overlap_warn_at: Mutex<Option<Instant>>,
    last_open_orders: Mutex<Vec<RestingOrder>>,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Store,
        venue: Arc<dyn VenueClient>,
        catalog: CatalogClient,
        oracle: Option<OracleClient>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            venue,
            catalog,
            oracle,
            paper: Mutex::new(PaperSimulator::new()),
            circuit_breaker: CircuitBreakerCache::default(),
            in_flight: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            cycles_completed: AtomicU64::new(0),
            total_orders: AtomicU64::new(0),
            started_at: Instant::now(),
            last_cycle_at: RwLock::new(None),
            last_overlap_warn_at: Mutex::new(None),
            last_open_orders: Mutex::new(Vec::new()),
        }
    }

    pub fn config_snapshot(&self) -> Config {
        self.config.read().clone()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    /// Snapshot of resting orders observed during the most recent live
    /// cycle. Empty in paper mode, or before the first cycle completes.
    pub async fn open_orders_sample(&self) -> Vec<RestingOrder> {
        self.last_open_orders.lock().await.clone()
    }

    pub async fn probe_geoblock(&self) -> anyhow::Result<bool> {
        self.venue.probe_geoblock().await
    }

    pub fn circuit_breaker_tripped(&self) -> bool {
        self.circuit_breaker.get()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn total_orders(&self) -> u64 {
        self.total_orders.load(Ordering::Relaxed)
    }

    pub fn last_cycle_at(&self) -> Option<chrono::DateTime<Utc>> {
        *self.last_cycle_at.read()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn creds_prefix(&self) -> Option<String> {
        self.venue.creds_prefix()
    }

    /// `start`/`stop` toggle future scheduling only; they never touch the
    /// in-flight overlap guard, so a cycle already underway always runs to
    /// completion.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn start(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Best-effort `cancel_all` at the venue, then disables future ticks.
    /// Idempotent: calling `stop` twice is harmless.
    pub async fn stop(&self) -> anyhow::Result<u64> {
        self.enabled.store(false, Ordering::Relaxed);
        self.venue.cancel_all().await
    }

    /// Venue cancel-all, independent of `start`/`stop` scheduling: it
    /// never touches `enabled`, so it cannot race with the periodic
    /// tick's `is_enabled` check.
    pub async fn cancel_all(&self) -> anyhow::Result<u64> {
        self.venue.cancel_all().await
    }

    /// The overlap-guarded entry point the periodic timer and the
    /// `run_cycle` control action both call. Returns `None` if a cycle was
    /// already in flight; the tick is dropped rather than queued.
    pub async fn tick(&self, overrides: Option<RunCycleOverrides>) -> Option<CycleReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.warn_overlap_rate_limited().await;
            return None;
        }

        let report = self.run_cycle_inner(overrides).await;
        self.in_flight.store(false, Ordering::SeqCst);
        Some(report)
    }

    async fn warn_overlap_rate_limited(&self) {
        let mut last = self.last_overlap_warn_at.lock().await;
        let should_warn = last.map(|t| t.elapsed() >= OVERLAP_WARN_SUPPRESS).unwrap_or(true);
        if should_warn {
            warn!("cycle overlap: previous cycle still running, dropping this tick");
            *last = Some(Instant::now());
        }
    }

    async fn run_cycle_inner(&self, overrides: Option<RunCycleOverrides>) -> CycleReport {
        let mut logs = Vec::new();
        let mut report = CycleReport::default();

        let config = {
            let mut config = self.config.write();
            if let Some(overrides) = &overrides {
                config.apply_overrides(overrides);
            }
            config.clone()
        };

        let decision = match risk::evaluate(&self.store, &config).await {
            Ok(d) => d,
            Err(e) => {
                logs.push(format!("risk governor error: {}", e));
                warn!(error = %e, "risk governor failed, skipping cycle");
                return CycleReport { logs, ..Default::default() };
            }
        };
        self.circuit_breaker.set(decision.circuit_breaker);

        if !decision.can_quote {
            logs.push("circuit breaker active, skipping cycle".to_string());
            report.logs = logs;
            report.circuit_breaker = true;
            return report;
        }

        let raw_markets = match self.fetch_candidates(&config).await {
            Ok(m) => m,
            Err(e) => {
                logs.push(format!("candidate fetch failed: {}", e));
                warn!(error = %e, "cycle-level fatal: cannot fetch catalog");
                report.logs = logs;
                return report;
            }
        };
        logs.push(format!("fetched {} raw candidates", raw_markets.len()));

        let candidates = self
            .enrich_candidates(&raw_markets, &config, &mut logs)
            .await;
        logs.push(format!("{} candidates survived enrichment", candidates.len()));

        let selected = scorer::select_top_markets(candidates, config.min_liquidity_depth, config.max_markets);
        report.total_markets = selected.len() as u64;
        report.sponsored_markets = selected.iter().filter(|c| c.sponsor_pool > 0.0).count() as u64;
        report.avg_sponsor = if selected.is_empty() {
            0.0
        } else {
            selected.iter().map(|c| c.sponsor_pool).sum::<f64>() / selected.len() as f64
        };

        let mut orders_placed = 0u64;
        let mut open_orders_sample = Vec::new();
        for candidate in &selected {
            if let Some(oracle) = &self.oracle {
                if config.external_oracle_enabled {
                    let _ = oracle
                        .observe(&candidate.condition_id, &candidate.title, candidate.mid)
                        .await;
                }
            }

            let position = self.store.get_position(&candidate.condition_id).await.unwrap_or(0.0);
            let Some(quote) = quoter::quote_market(
                candidate,
                position,
                decision.max_position,
                decision.order_size,
                config.base_spread_bp,
                config.aggressive_short_term,
            ) else {
                logs.push(format!("{}: skipped, buy >= sell after tick alignment", candidate.title));
                continue;
            };

            if config.paper_mode {
                let mut paper = self.paper.lock().await;
                let outcome = paper.simulate_market(
                    &candidate.condition_id,
                    &candidate.title,
                    &quote,
                    position,
                    decision.max_position,
                );
                drop(paper);
                if !outcome.entries.is_empty() {
                    let new_position = position + outcome.position_delta;
                    if let Err(e) = self.store.upsert_position(&candidate.condition_id, new_position).await {
                        logs.push(format!("{}: failed to persist paper position: {}", candidate.title, e));
                    }
                    let today = Utc::now().date_naive();
                    if let Err(e) = self
                        .store
                        .apply_pnl_delta(today, outcome.pnl_delta, outcome.entries.len() as u64)
                        .await
                    {
                        logs.push(format!("{}: failed to persist paper PnL: {}", candidate.title, e));
                    }
                    if let Err(e) = self.store.append_trade_logs(&outcome.entries).await {
                        logs.push(format!("{}: failed to append paper trade log: {}", candidate.title, e));
                    }
                }
            } else {
                let resting = match self.venue.get_open_orders(&candidate.token_id).await {
                    Ok(orders) => orders,
                    Err(e) => {
                        logs.push(format!("{}: failed to fetch open orders: {}", candidate.title, e));
                        continue;
                    }
                };
                open_orders_sample.extend(resting.iter().cloned());
                let outcome = reconciler::reconcile_market(
                    self.venue.as_ref(),
                    &candidate.condition_id,
                    &candidate.title,
                    &quote,
                    &resting,
                    candidate.neg_risk.unwrap_or(false),
                )
                .await;
                orders_placed += outcome.orders_placed;
                if let Err(e) = self.store.append_trade_logs(&outcome.entries).await {
                    logs.push(format!("{}: failed to append trade log: {}", candidate.title, e));
                }
            }
        }

        if !config.paper_mode {
            *self.last_open_orders.lock().await = open_orders_sample;
        }

        self.total_orders.fetch_add(orders_placed, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle_at.write() = Some(Utc::now());

        report.logs = logs;
        report.orders_placed = orders_placed;
        report.circuit_breaker = false;
        info!(
            orders_placed,
            total_markets = report.total_markets,
            sponsored_markets = report.sponsored_markets,
            "cycle complete"
        );
        report
    }

    async fn fetch_candidates(&self, config: &Config) -> anyhow::Result<Vec<CatalogMarket>> {
        let raw = self.catalog.fetch_top_markets(CATALOG_FETCH_LIMIT).await?;
        let pre_filtered: Vec<CatalogMarket> = raw
            .into_iter()
            .filter(|m| m.volume_24hr.unwrap_or(0.0) >= config.min_volume_24h)
            .collect();
        let cap = (3 * config.max_markets).min(50);
        Ok(pre_filtered.into_iter().take(cap).collect())
    }

    async fn enrich_candidates(
        &self,
        raw_markets: &[CatalogMarket],
        config: &Config,
        logs: &mut Vec<String>,
    ) -> Vec<crate::models::MarketCandidate> {
        let mut candidates = Vec::new();
        for raw in raw_markets {
            match enricher::enrich_market(
                raw,
                self.venue.as_ref(),
                &self.catalog,
                config.min_sponsor_pool,
                config.min_liquidity_depth,
            )
            .await
            {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    logs.push(format!("{}: skipped ({})", raw.condition_id, reason));
                }
            }
        }
        candidates
    }
}
