use anyhow::Result;
use async_trait::async_trait;

/// A coin as known to both market APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    pub symbol: &'static str,
    pub gecko_id: &'static str,
}

const fn coin(symbol: &'static str, gecko_id: &'static str) -> Coin {
    Coin { symbol, gecko_id }
}

/// Refreshed every few minutes and shown first in /price.
pub const CORE_COINS: &[Coin] = &[
    coin("BTC", "bitcoin"),
    coin("ETH", "ethereum"),
    coin("SOL", "solana"),
    coin("BNB", "binancecoin"),
    coin("ADA", "cardano"),
];

/// Refreshed hourly.
pub const EXTRA_COINS: &[Coin] = &[
    coin("USDT", "tether"),
    coin("XRP", "ripple"),
    coin("USDC", "usd-coin"),
    coin("DOGE", "dogecoin"),
    coin("TRX", "tron"),
    coin("STETH", "staked-ether"),
    coin("WBTC", "wrapped-bitcoin"),
    coin("LINK", "chainlink"),
    coin("AVAX", "avalanche-2"),
    coin("LEO", "leo-token"),
    coin("XLM", "stellar"),
    coin("WSTETH", "wrapped-steth"),
    coin("SHIB", "shiba-inu"),
    coin("HBAR", "hedera-hashgraph"),
    coin("SUI", "sui"),
    coin("DOT", "polkadot"),
    coin("LTC", "litecoin"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct CoinQuote {
    pub symbol: String,
    pub price: f64,
    /// 24h change in percent.
    pub change_24h: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSummary {
    pub total_market_cap: f64,
    pub total_volume: f64,
    pub btc_dominance: f64,
    pub eth_dominance: f64,
}

/// A market-data API the fetcher can poll.
#[async_trait]
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quotes for the requested coins. Coins missing from the response are
    /// left out rather than failing the whole call.
    async fn fetch_quotes(&self, coins: &[Coin]) -> Result<Vec<CoinQuote>>;

    async fn fetch_summary(&self) -> Result<MarketSummary>;
}
