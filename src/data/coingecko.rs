use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::data::market::{Coin, CoinQuote, MarketSource, MarketSummary};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

pub struct CoinGecko {
    client: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
}

#[derive(Deserialize)]
struct GlobalResponse {
    data: GlobalData,
}

#[derive(Deserialize)]
struct GlobalData {
    #[serde(default)]
    total_market_cap: HashMap<String, f64>,
    #[serde(default)]
    total_volume: HashMap<String, f64>,
    #[serde(default)]
    market_cap_percentage: HashMap<String, f64>,
}

impl CoinGecko {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    async fn get(&self, url: &str) -> Result<String> {
        let mut req = self.client.get(url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-demo-api-key", key);
        }
        let resp = req.send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl MarketSource for CoinGecko {
    fn name(&self) -> &'static str {
        "CoinGecko"
    }

    async fn fetch_quotes(&self, coins: &[Coin]) -> Result<Vec<CoinQuote>> {
        let ids: Vec<&str> = coins.iter().map(|c| c.gecko_id).collect();
        let url = format!(
            "{BASE_URL}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
            ids.join(",")
        );
        let body = self.get(&url).await?;
        parse_simple_price(&body, coins)
    }

    async fn fetch_summary(&self) -> Result<MarketSummary> {
        let body = self.get(&format!("{BASE_URL}/global")).await?;
        parse_global(&body)
    }
}

/// Parse a `/simple/price` response, keeping the order of `coins`.
pub fn parse_simple_price(body: &str, coins: &[Coin]) -> Result<Vec<CoinQuote>> {
    let prices: HashMap<String, SimplePrice> =
        serde_json::from_str(body).context("Unexpected CoinGecko price response")?;

    let mut quotes = Vec::with_capacity(coins.len());
    for c in coins {
        match prices.get(c.gecko_id).and_then(|p| p.usd.map(|usd| (usd, p.usd_24h_change))) {
            Some((price, change)) => quotes.push(CoinQuote {
                symbol: c.symbol.to_string(),
                price,
                change_24h: change.unwrap_or(0.0),
            }),
            None => {
                tracing::warn!(symbol = c.symbol, id = c.gecko_id, "Coin missing from CoinGecko response");
            }
        }
    }
    Ok(quotes)
}

pub fn parse_global(body: &str) -> Result<MarketSummary> {
    let resp: GlobalResponse =
        serde_json::from_str(body).context("Unexpected CoinGecko global response")?;
    let d = resp.data;
    let total_market_cap = d
        .total_market_cap
        .get("usd")
        .copied()
        .context("CoinGecko global data has no USD market cap")?;
    Ok(MarketSummary {
        total_market_cap,
        total_volume: d.total_volume.get("usd").copied().unwrap_or(0.0),
        btc_dominance: d.market_cap_percentage.get("btc").copied().unwrap_or(0.0),
        eth_dominance: d.market_cap_percentage.get("eth").copied().unwrap_or(0.0),
    })
}
