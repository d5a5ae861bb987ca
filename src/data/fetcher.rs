use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

use crate::data::market::{Coin, CoinQuote, MarketSource, MarketSummary};

/// Primary market source with an optional second tier.
pub struct MarketFetcher {
    primary: Box<dyn MarketSource>,
    fallback: Option<Box<dyn MarketSource>>,
    timeout: Duration,
}

/// Data together with the name of the source that produced it.
pub struct Fetched<T> {
    pub data: T,
    pub source: &'static str,
}

impl MarketFetcher {
    pub fn new(
        primary: Box<dyn MarketSource>,
        fallback: Option<Box<dyn MarketSource>>,
        timeout: Duration,
    ) -> Self {
        Self { primary, fallback, timeout }
    }

    /// Fetch quotes from the primary source, falling back to the second tier
    /// on error, timeout or an empty answer.
    pub async fn fetch_quotes(&self, coins: &[Coin]) -> Result<Fetched<Vec<CoinQuote>>> {
        let primary = self
            .bounded(self.primary.fetch_quotes(coins))
            .await
            .and_then(non_empty);
        let primary_err = match primary {
            Ok(data) => return Ok(Fetched { data, source: self.primary.name() }),
            Err(e) => e,
        };
        tracing::warn!(source = self.primary.name(), error = %primary_err, "Quote fetch failed");

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };
        match self.bounded(fallback.fetch_quotes(coins)).await.and_then(non_empty) {
            Ok(data) => {
                tracing::info!(source = fallback.name(), count = data.len(), "Quote fallback succeeded");
                Ok(Fetched { data, source: fallback.name() })
            }
            Err(e) => Err(anyhow!(
                "{} failed: {primary_err}; {} failed: {e}",
                self.primary.name(),
                fallback.name()
            )),
        }
    }

    pub async fn fetch_summary(&self) -> Result<Fetched<MarketSummary>> {
        let primary_err = match self.bounded(self.primary.fetch_summary()).await {
            Ok(data) => return Ok(Fetched { data, source: self.primary.name() }),
            Err(e) => e,
        };
        tracing::warn!(source = self.primary.name(), error = %primary_err, "Summary fetch failed");

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };
        match self.bounded(fallback.fetch_summary()).await {
            Ok(data) => Ok(Fetched { data, source: fallback.name() }),
            Err(e) => Err(anyhow!(
                "{} failed: {primary_err}; {} failed: {e}",
                self.primary.name(),
                fallback.name()
            )),
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(anyhow!("timed out after {}s", self.timeout.as_secs())),
        }
    }
}

fn non_empty(quotes: Vec<CoinQuote>) -> Result<Vec<CoinQuote>> {
    if quotes.is_empty() {
        Err(anyhow!("response contained none of the requested coins"))
    } else {
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::market::CORE_COINS;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behaviour {
        Ok,
        Empty,
        Fail,
        Hang,
    }

    struct FakeSource {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    impl FakeSource {
        fn boxed(name: &'static str, behaviour: Behaviour) -> (Box<dyn MarketSource>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let src = FakeSource { name, behaviour, calls: calls.clone() };
            (Box::new(src), calls)
        }
    }

    #[async_trait]
    impl MarketSource for FakeSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_quotes(&self, coins: &[Coin]) -> Result<Vec<CoinQuote>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok => Ok(coins
                    .iter()
                    .map(|c| CoinQuote { symbol: c.symbol.into(), price: 1.0, change_24h: 0.0 })
                    .collect()),
                Behaviour::Empty => Ok(Vec::new()),
                Behaviour::Fail => Err(anyhow!("HTTP 429")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn fetch_summary(&self) -> Result<MarketSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok | Behaviour::Empty => Ok(MarketSummary {
                    total_market_cap: 1.0,
                    total_volume: 1.0,
                    btc_dominance: 50.0,
                    eth_dominance: 15.0,
                }),
                _ => Err(anyhow!("HTTP 500")),
            }
        }
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let (primary, _) = FakeSource::boxed("primary", Behaviour::Ok);
        let (fallback, fallback_calls) = FakeSource::boxed("fallback", Behaviour::Ok);
        let fetcher = MarketFetcher::new(primary, Some(fallback), Duration::from_secs(10));

        let got = fetcher.fetch_quotes(CORE_COINS).await.unwrap();
        assert_eq!(got.source, "primary");
        assert_eq!(got.data.len(), CORE_COINS.len());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_and_empty_answers_fall_back() {
        for behaviour in [Behaviour::Fail, Behaviour::Empty] {
            let (primary, _) = FakeSource::boxed("primary", behaviour);
            let (fallback, _) = FakeSource::boxed("fallback", Behaviour::Ok);
            let fetcher = MarketFetcher::new(primary, Some(fallback), Duration::from_secs(10));
            assert_eq!(fetcher.fetch_quotes(CORE_COINS).await.unwrap().source, "fallback");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primary_times_out_into_fallback() {
        let (primary, _) = FakeSource::boxed("primary", Behaviour::Hang);
        let (fallback, _) = FakeSource::boxed("fallback", Behaviour::Ok);
        let fetcher = MarketFetcher::new(primary, Some(fallback), Duration::from_secs(10));
        assert_eq!(fetcher.fetch_quotes(CORE_COINS).await.unwrap().source, "fallback");
    }

    #[tokio::test]
    async fn both_tiers_failing_reports_both() {
        let (primary, _) = FakeSource::boxed("primary", Behaviour::Fail);
        let (fallback, _) = FakeSource::boxed("fallback", Behaviour::Fail);
        let fetcher = MarketFetcher::new(primary, Some(fallback), Duration::from_secs(10));
        let err = fetcher.fetch_summary().await.err().unwrap().to_string();
        assert!(err.contains("primary failed"));
        assert!(err.contains("fallback failed"));
    }

    #[tokio::test]
    async fn without_fallback_the_primary_error_surfaces() {
        let (primary, _) = FakeSource::boxed("primary", Behaviour::Fail);
        let fetcher = MarketFetcher::new(primary, None, Duration::from_secs(10));
        let err = fetcher.fetch_quotes(CORE_COINS).await.err().unwrap();
        assert!(err.to_string().contains("429"));
    }
}
