use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::bot::messages;
use crate::bot::notifier::{self, BroadcastReport, Outbound, Payload};
use crate::data::fetcher::MarketFetcher;
use crate::data::market::{Coin, CoinQuote, CORE_COINS, EXTRA_COINS};
use crate::db::Db;
use crate::shutdown::Shutdown;

const STARTUP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CORE_REFRESH: Duration = Duration::from_secs(300);
const EXTRA_REFRESH: Duration = Duration::from_secs(3600);
const HOURLY_UPDATE: Duration = Duration::from_secs(3600);
const FIRST_HOURLY_UPDATE: Duration = Duration::from_secs(10);
const CLEANUP: Duration = Duration::from_secs(86400);
/// Cached quotes older than this are not broadcast.
const MAX_QUOTE_AGE: Duration = Duration::from_secs(2 * CORE_REFRESH.as_secs());

pub struct Scheduler {
    pub db: Arc<Db>,
    pub fetcher: MarketFetcher,
    pub outbound: Arc<dyn Outbound>,
    pub admin_chat_id: Option<i64>,
    pub throttle: Duration,
    pub hourly_price_updates: bool,
}

impl Scheduler {
    pub async fn run(self, shutdown: Shutdown) {
        tracing::info!("Scheduler started, fetching initial data...");
        if tokio::time::timeout(STARTUP_FETCH_TIMEOUT, self.refresh_core()).await.is_err() {
            tracing::warn!("Initial market fetch timed out, continuing with cached data");
        }

        let mut core = interval_at(Instant::now() + CORE_REFRESH, CORE_REFRESH);
        let mut extras = interval(EXTRA_REFRESH);
        let mut hourly = interval_at(Instant::now() + FIRST_HOURLY_UPDATE, HOURLY_UPDATE);
        let mut cleanup = interval(CLEANUP);
        for timer in [&mut core, &mut extras, &mut hourly, &mut cleanup] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        cleanup.tick().await;
        let mut price_update: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = core.tick() => self.refresh_core().await,
                _ = extras.tick() => {
                    if let Err(e) = self.refresh_quotes(EXTRA_COINS).await {
                        tracing::error!(error = %e, "Extra coin refresh failed");
                        self.notify_admin("Extra coin fetch", &e).await;
                    }
                }
                _ = hourly.tick(), if self.hourly_price_updates => {
                    if price_update.as_ref().is_some_and(|task| !task.is_finished()) {
                        tracing::warn!("Previous hourly update still running, skipping this one");
                    } else {
                        price_update = Some(self.spawn_hourly_broadcast(Utc::now()));
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.db.cleanup_old_records() {
                        tracing::error!(error = %e, "DB cleanup failed");
                    } else {
                        tracing::info!("DB cleanup completed");
                    }
                }
            }
        }
        if let Some(task) = price_update {
            task.abort();
        }
        tracing::info!("Scheduler stopped");
    }

    /// Core coins plus the global summary.
    async fn refresh_core(&self) {
        if let Err(e) = self.refresh_quotes(CORE_COINS).await {
            tracing::error!(error = %e, "Core price refresh failed");
            self.notify_admin("Core price fetch", &e).await;
        }
        match self.fetcher.fetch_summary().await {
            Ok(fetched) => match self.db.replace_market_summary(&fetched.data) {
                Ok(()) => tracing::info!(source = fetched.source, "Market summary updated"),
                Err(e) => tracing::error!(error = %e, "Failed to store market summary"),
            },
            Err(e) => {
                tracing::error!(error = %e, "Market summary refresh failed");
                self.notify_admin("Market summary fetch", &e).await;
            }
        }
    }

    async fn refresh_quotes(&self, coins: &[Coin]) -> Result<()> {
        let fetched = self.fetcher.fetch_quotes(coins).await?;
        for quote in &fetched.data {
            self.db.upsert_market_price(quote)?;
        }
        tracing::info!(source = fetched.source, count = fetched.data.len(), "Market prices updated");
        Ok(())
    }

    /// Runs off the loop so a slow broadcast holds up neither the refreshes
    /// nor shutdown.
    fn spawn_hourly_broadcast(&self, now: DateTime<Utc>) -> JoinHandle<()> {
        let db = self.db.clone();
        let outbound = self.outbound.clone();
        let throttle = self.throttle;
        tokio::spawn(async move {
            let fresh_since = now - chrono::Duration::seconds(MAX_QUOTE_AGE.as_secs() as i64);
            let key = price_update_key(now);
            if let Err(e) = broadcast_prices(&db, outbound.as_ref(), throttle, key, fresh_since).await {
                tracing::error!(error = %e, "Hourly price update failed");
            }
        })
    }

    async fn notify_admin(&self, what: &str, error: &anyhow::Error) {
        let Some(admin) = self.admin_chat_id else { return };
        let payload = Payload::plain(messages::fetch_failed_notice(what, &error.to_string()));
        if let Err(e) = self.outbound.deliver(admin, &payload).await {
            tracing::warn!(error = %e, "Failed to notify admin");
        }
    }
}

/// Broadcast the cached core prices refreshed since `fresh_since`.
/// Deliveries are keyed by the UTC hour so a restart within the hour does
/// not resend.
async fn broadcast_prices(
    db: &Db,
    outbound: &dyn Outbound,
    throttle: Duration,
    key: String,
    fresh_since: DateTime<Utc>,
) -> Result<BroadcastReport> {
    let quotes = core_quotes(db.market_prices_updated_since(fresh_since)?);
    if quotes.is_empty() {
        tracing::warn!(%fresh_since, "No fresh cached prices, skipping hourly update");
        return Ok(BroadcastReport::default());
    }
    let payload = Payload::html(messages::hourly_update(&quotes)).keyed(key);
    notifier::broadcast(outbound, db, &payload, throttle).await
}

fn price_update_key(now: DateTime<Utc>) -> String {
    format!("price-update:{}", now.format("%Y-%m-%dT%H"))
}

/// Cached quotes restricted to the core coins, in core order.
fn core_quotes(cached: Vec<CoinQuote>) -> Vec<CoinQuote> {
    CORE_COINS
        .iter()
        .filter_map(|c| cached.iter().find(|q| q.symbol == c.symbol).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::notifier::testing::RecordingOutbound;
    use crate::data::market::{MarketSource, MarketSummary};
    use crate::bot::notifier::DeliveryError;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        fail: bool,
    }

    #[async_trait]
    impl MarketSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn fetch_quotes(&self, coins: &[Coin]) -> Result<Vec<CoinQuote>> {
            if self.fail {
                return Err(anyhow!("HTTP 503"));
            }
            Ok(coins
                .iter()
                .enumerate()
                .map(|(i, c)| CoinQuote { symbol: c.symbol.into(), price: 100.0 * (i + 1) as f64, change_24h: 1.5 })
                .collect())
        }

        async fn fetch_summary(&self) -> Result<MarketSummary> {
            if self.fail {
                return Err(anyhow!("HTTP 503"));
            }
            Ok(MarketSummary {
                total_market_cap: 2.6e12,
                total_volume: 9.0e10,
                btc_dominance: 52.0,
                eth_dominance: 17.0,
            })
        }
    }

    fn scheduler_with(fail: bool, admin: Option<i64>, outbound: Arc<dyn Outbound>) -> Scheduler {
        Scheduler {
            db: Arc::new(Db::new(":memory:").unwrap()),
            fetcher: MarketFetcher::new(Box::new(FixedSource { fail }), None, Duration::from_secs(10)),
            outbound,
            admin_chat_id: admin,
            throttle: Duration::ZERO,
            hourly_price_updates: true,
        }
    }

    fn scheduler(fail: bool, admin: Option<i64>) -> (Scheduler, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::default());
        (scheduler_with(fail, admin, outbound.clone()), outbound)
    }

    async fn hourly(sched: &Scheduler, at: DateTime<Utc>, fresh_since: DateTime<Utc>) -> BroadcastReport {
        broadcast_prices(&sched.db, sched.outbound.as_ref(), sched.throttle, price_update_key(at), fresh_since)
            .await
            .unwrap()
    }

    /// Never finishes a send within the test's horizon.
    #[derive(Default)]
    struct StalledOutbound {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Outbound for StalledOutbound {
        async fn deliver(&self, _chat_id: i64, _payload: &Payload) -> Result<i32, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(1)
        }
    }

    #[tokio::test]
    async fn core_refresh_fills_the_cache() {
        let (sched, outbound) = scheduler(false, Some(1));
        sched.refresh_core().await;

        let prices = sched.db.market_prices().unwrap();
        assert_eq!(prices.len(), CORE_COINS.len());
        assert_eq!(prices[0].symbol, "BTC");
        assert!(sched.db.market_summary().unwrap().is_some());
        assert!(outbound.sent_to().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_notifies_admin() {
        let (sched, outbound) = scheduler(true, Some(99));
        sched.refresh_core().await;

        assert!(sched.db.market_prices().unwrap().is_empty());
        let sent = outbound.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(chat, p)| *chat == 99 && p.text.contains("HTTP 503")));
    }

    #[tokio::test]
    async fn hourly_update_goes_out_once_per_hour() {
        let (sched, outbound) = scheduler(false, None);
        sched.db.add_chat(-1, "group", "group").unwrap();
        sched.db.add_chat(-2, "other", "supergroup").unwrap();
        sched.refresh_quotes(EXTRA_COINS).await.unwrap();
        sched.refresh_quotes(CORE_COINS).await.unwrap();

        let fresh_since = Utc::now() - chrono::Duration::minutes(10);
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 14, 5, 0).unwrap();
        let report = hourly(&sched, at, fresh_since).await;
        assert_eq!(report.delivered, 2);

        let again = hourly(&sched, at + chrono::Duration::minutes(30), fresh_since).await;
        assert_eq!(again.delivered, 0);
        assert_eq!(again.skipped, 2);

        let next = hourly(&sched, at + chrono::Duration::hours(1), fresh_since).await;
        assert_eq!(next.delivered, 2);

        let sent = outbound.sent.lock().unwrap();
        let text = &sent[0].1.text;
        assert!(text.starts_with("\u{1f4b0}"));
        assert!(text.contains("BTC:"));
        assert!(!text.contains("USDT"));
        assert_eq!(sent[0].1.key.as_deref(), Some("price-update:2026-10-15T14"));
    }

    #[tokio::test]
    async fn hourly_update_without_prices_sends_nothing() {
        let (sched, outbound) = scheduler(false, None);
        sched.db.add_chat(-1, "group", "group").unwrap();
        let now = Utc::now();
        let report = hourly(&sched, now, now - chrono::Duration::minutes(10)).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(outbound.sent_to().is_empty());
    }

    #[tokio::test]
    async fn stale_prices_are_not_broadcast() {
        let (sched, outbound) = scheduler(false, None);
        sched.db.add_chat(-1, "group", "group").unwrap();
        sched.refresh_quotes(CORE_COINS).await.unwrap();

        let now = Utc::now();
        let report = hourly(&sched, now, now + chrono::Duration::minutes(1)).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(outbound.sent_to().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_hourly_update_does_not_block_shutdown() {
        let outbound = Arc::new(StalledOutbound::default());
        let sched = scheduler_with(false, None, outbound.clone());
        sched.db.add_chat(-1, "group", "group").unwrap();

        let shutdown = Shutdown::new();
        let task = tokio::spawn(sched.run(shutdown.clone()));
        tokio::time::sleep(FIRST_HOURLY_UPDATE + Duration::from_secs(10)).await;
        assert_eq!(outbound.calls.load(Ordering::SeqCst), 1);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (sched, _) = scheduler(false, None);
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), sched.run(shutdown)).await.unwrap();
    }

    #[test]
    fn price_update_key_is_the_utc_hour() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 59, 59).unwrap();
        assert_eq!(price_update_key(at), "price-update:2026-01-02T03");
    }

    #[test]
    fn core_quotes_follow_core_order() {
        let cached = vec![
            CoinQuote { symbol: "USDT".into(), price: 1.0, change_24h: 0.0 },
            CoinQuote { symbol: "ETH".into(), price: 3000.0, change_24h: 0.0 },
            CoinQuote { symbol: "BTC".into(), price: 67000.0, change_24h: 0.0 },
        ];
        let symbols: Vec<_> = core_quotes(cached).into_iter().map(|q| q.symbol).collect();
        assert_eq!(symbols, ["BTC", "ETH"]);
    }
}
