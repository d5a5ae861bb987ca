use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

pub struct Config {
    pub bot_token: String,
    pub webhook_secret: String,
    pub host: String,
    pub port: u16,
    pub database_file: String,
    /// Public URL Telegram should post updates to. Long polling when unset.
    pub webhook_url: Option<reqwest::Url>,
    pub telegram_secret_token: Option<String>,
    pub admin_chat_id: Option<i64>,
    pub coingecko_api_key: Option<String>,
    pub coinmarketcap_api_key: Option<String>,
    pub broadcast_delay: Duration,
    pub hourly_price_updates: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Blank values count as unset.
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match var("PORT") {
            Some(p) => p.parse().with_context(|| format!("PORT is not a valid port: {p}"))?,
            None => 5000,
        };
        let webhook_url = match var("WEBHOOK_URL") {
            Some(u) => Some(
                reqwest::Url::parse(&u).with_context(|| format!("WEBHOOK_URL is not a valid URL: {u}"))?,
            ),
            None => None,
        };
        let admin_chat_id = match var("ADMIN_CHAT_ID") {
            Some(id) => Some(id.parse().with_context(|| format!("ADMIN_CHAT_ID is not an integer: {id}"))?),
            None => None,
        };
        let broadcast_delay = match var("BROADCAST_DELAY_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse().with_context(|| format!("BROADCAST_DELAY_MS is not a number: {ms}"))?,
            ),
            None => Duration::from_millis(50),
        };
        let hourly_price_updates = match var("HOURLY_PRICE_UPDATES") {
            Some(v) => parse_flag(&v).with_context(|| format!("HOURLY_PRICE_UPDATES is not a boolean: {v}"))?,
            None => true,
        };

        Ok(Self {
            bot_token: var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN not set")?,
            webhook_secret: var("WEBHOOK_SECRET").context("WEBHOOK_SECRET not set")?,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_file: var("DATABASE_FILE").unwrap_or_else(|| "./data/bot_database.db".into()),
            webhook_url,
            telegram_secret_token: var("TELEGRAM_SECRET_TOKEN"),
            admin_chat_id,
            coingecko_api_key: var("COINGECKO_API_KEY"),
            coinmarketcap_api_key: var("COINMARKETCAP_API_KEY"),
            broadcast_delay,
            hourly_price_updates,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("TELEGRAM_BOT_TOKEN", "123:abc"), ("WEBHOOK_SECRET", "s3cret")];

    #[test]
    fn defaults() {
        let cfg = load(&REQUIRED).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.database_file, "./data/bot_database.db");
        assert!(cfg.webhook_url.is_none());
        assert!(cfg.admin_chat_id.is_none());
        assert_eq!(cfg.broadcast_delay, Duration::from_millis(50));
        assert!(cfg.hourly_price_updates);
        assert_eq!(cfg.bind_addr().unwrap().port(), 5000);
    }

    #[test]
    fn missing_required_values_fail() {
        let err = load(&[("WEBHOOK_SECRET", "x")]).err().unwrap();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
        let err = load(&[("TELEGRAM_BOT_TOKEN", "t"), ("WEBHOOK_SECRET", "  ")]).err().unwrap();
        assert!(err.to_string().contains("WEBHOOK_SECRET"));
    }

    #[test]
    fn optional_values_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PORT", "8443"),
            ("WEBHOOK_URL", "https://bot.example.com/telegram"),
            ("ADMIN_CHAT_ID", "-100123"),
            ("BROADCAST_DELAY_MS", "0"),
            ("HOURLY_PRICE_UPDATES", "off"),
            ("COINMARKETCAP_API_KEY", "cmc"),
        ]);
        let cfg = load(&pairs).unwrap();
        assert_eq!(cfg.port, 8443);
        assert_eq!(cfg.webhook_url.unwrap().path(), "/telegram");
        assert_eq!(cfg.admin_chat_id, Some(-100123));
        assert_eq!(cfg.broadcast_delay, Duration::ZERO);
        assert!(!cfg.hourly_price_updates);
        assert_eq!(cfg.coinmarketcap_api_key.as_deref(), Some("cmc"));
    }

    #[test]
    fn malformed_values_fail() {
        for (key, value) in [("PORT", "http"), ("ADMIN_CHAT_ID", "me"), ("WEBHOOK_URL", "not a url")] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            let err = load(&pairs).err().unwrap();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }
}
