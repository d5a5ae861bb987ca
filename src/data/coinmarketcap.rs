use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::data::market::{Coin, CoinQuote, MarketSource, MarketSummary};

const BASE_URL: &str = "https://pro-api.coinmarketcap.com/v1";

/// Fallback source, only built when an API key is configured.
pub struct CoinMarketCap {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct QuotesResponse {
    data: HashMap<String, QuoteEntry>,
}

#[derive(Deserialize)]
struct QuoteEntry {
    quote: HashMap<String, UsdQuote>,
}

#[derive(Deserialize)]
struct UsdQuote {
    price: Option<f64>,
    percent_change_24h: Option<f64>,
}

#[derive(Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Deserialize)]
struct GlobalData {
    btc_dominance: Option<f64>,
    eth_dominance: Option<f64>,
    quote: HashMap<String, GlobalQuote>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    total_market_cap: Option<f64>,
    total_volume_24h: Option<f64>,
}

impl CoinMarketCap {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header("Accepts", "application/json")
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl MarketSource for CoinMarketCap {
    fn name(&self) -> &'static str {
        "CoinMarketCap"
    }

    async fn fetch_quotes(&self, coins: &[Coin]) -> Result<Vec<CoinQuote>> {
        let symbols: Vec<&str> = coins.iter().map(|c| c.symbol).collect();
        let symbols = symbols.join(",");
        let body = self
            .get(
                &format!("{BASE_URL}/cryptocurrency/quotes/latest"),
                &[("symbol", symbols.as_str()), ("convert", "USD")],
            )
            .await?;
        parse_quotes(&body, coins)
    }

    async fn fetch_summary(&self) -> Result<MarketSummary> {
        let body = self
            .get(&format!("{BASE_URL}/global-metrics/quotes/latest"), &[("convert", "USD")])
            .await?;
        parse_global_metrics(&body)
    }
}

pub fn parse_quotes(body: &str, coins: &[Coin]) -> Result<Vec<CoinQuote>> {
    let resp: QuotesResponse =
        serde_json::from_str(body).context("Unexpected CoinMarketCap quotes response")?;

    let mut quotes = Vec::with_capacity(coins.len());
    for c in coins {
        let usd = resp.data.get(c.symbol).and_then(|e| e.quote.get("USD"));
        match usd.and_then(|q| q.price.map(|p| (p, q.percent_change_24h))) {
            Some((price, change)) => quotes.push(CoinQuote {
                symbol: c.symbol.to_string(),
                price,
                change_24h: change.unwrap_or(0.0),
            }),
            None => tracing::warn!(symbol = c.symbol, "Coin missing from CoinMarketCap response"),
        }
    }
    Ok(quotes)
}

pub fn parse_global_metrics(body: &str) -> Result<MarketSummary> {
    let resp: GlobalResponse =
        serde_json::from_str(body).context("Unexpected CoinMarketCap global response")?;
    let d = resp.data;
    let usd = d.quote.get("USD").context("CoinMarketCap global data has no USD quote")?;
    Ok(MarketSummary {
        total_market_cap: usd
            .total_market_cap
            .context("CoinMarketCap global data has no market cap")?,
        total_volume: usd.total_volume_24h.unwrap_or(0.0),
        btc_dominance: d.btc_dominance.unwrap_or(0.0),
        eth_dominance: d.eth_dominance.unwrap_or(0.0),
    })
}
