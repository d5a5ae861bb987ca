use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

use crate::data::market::{CoinQuote, MarketSummary};

pub struct Db {
    conn: Mutex<Connection>,
}

/// A row of the chat registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRecord {
    pub chat_id: i64,
    pub title: String,
    pub kind: String,
    pub joined_at: String,
}

/// Cached market summary with the time it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSummary {
    pub summary: MarketSummary,
    pub updated_at: String,
}

impl Db {
    pub fn new(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(include_str!("../../migrations/001_init.sql"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    // ── Chats ──

    pub fn add_chat(&self, chat_id: i64, title: &str, kind: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chats (chat_id, chat_title, chat_type, join_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET chat_title=?2, chat_type=?3",
            params![chat_id, title, kind, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_chat(&self, chat_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM chats WHERE chat_id=?1", params![chat_id])?;
        Ok(n > 0)
    }

    /// Replace a group with the supergroup it was upgraded to.
    pub fn migrate_chat(&self, old_id: i64, new_id: i64, title: &str, kind: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let joined: Option<String> = tx
            .query_row(
                "SELECT join_date FROM chats WHERE chat_id=?1",
                params![old_id],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute("DELETE FROM chats WHERE chat_id=?1", params![old_id])?;
        tx.execute(
            "INSERT INTO chats (chat_id, chat_title, chat_type, join_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET chat_title=?2, chat_type=?3",
            params![new_id, title, kind, joined.unwrap_or_else(|| Utc::now().to_rfc3339())],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT chat_id, chat_title, chat_type, join_date FROM chats
             ORDER BY join_date, chat_id",
        )?;
        let chats = stmt
            .query_map([], |row| {
                Ok(ChatRecord {
                    chat_id: row.get(0)?,
                    title: row.get(1)?,
                    kind: row.get(2)?,
                    joined_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    pub fn count_chats(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?)
    }

    // ── Webhook and delivery logs ──

    pub fn log_webhook(&self, news_id: &str, content: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO webhook_logs (news_id, content, received_date) VALUES (?1, ?2, ?3)",
            params![news_id, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Reserve (news, chat) before sending. Returns false when another
    /// sender already holds or completed the pair. Pending rows carry
    /// message id 0.
    pub fn claim_delivery(&self, news_id: &str, chat_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT OR IGNORE INTO messages (news_id, chat_id, message_id, sent_date)
             VALUES (?1, ?2, 0, ?3)",
            params![news_id, chat_id, Utc::now().to_rfc3339()],
        )?;
        Ok(n == 1)
    }

    /// Drop a pending claim after a failed send so a later attempt may retry.
    pub fn release_delivery(&self, news_id: &str, chat_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM messages WHERE news_id=?1 AND chat_id=?2 AND message_id=0",
            params![news_id, chat_id],
        )?;
        Ok(())
    }

    /// Record a delivered message, completing a claim if there is one.
    pub fn log_delivery(&self, news_id: &str, chat_id: i64, message_id: i32) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (news_id, chat_id, message_id, sent_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(news_id, chat_id) DO UPDATE SET message_id=?3, sent_date=?4",
            params![news_id, chat_id, message_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn was_delivered(&self, news_id: &str, chat_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE news_id=?1 AND chat_id=?2 AND message_id<>0",
            params![news_id, chat_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn count_deliveries_since(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE sent_date>?1 AND message_id<>0",
            params![cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Market cache ──

    pub fn upsert_market_price(&self, quote: &CoinQuote) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO market_prices (coin, price, change, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(coin) DO UPDATE SET price=?2, change=?3, last_updated=?4",
            params![quote.symbol, quote.price, quote.change_24h, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Cached quotes in the order coins were first stored.
    pub fn market_prices(&self) -> Result<Vec<CoinQuote>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT coin, price, change FROM market_prices ORDER BY id")?;
        let quotes = stmt
            .query_map([], |row| {
                Ok(CoinQuote {
                    symbol: row.get(0)?,
                    price: row.get(1)?,
                    change_24h: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(quotes)
    }

    /// Cached quotes refreshed at or after `cutoff`, in insertion order.
    pub fn market_prices_updated_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CoinQuote>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT coin, price, change, last_updated FROM market_prices ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                let quote = CoinQuote {
                    symbol: row.get(0)?,
                    price: row.get(1)?,
                    change_24h: row.get(2)?,
                };
                Ok((quote, row.get::<_, String>(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|(_, updated)| {
                DateTime::parse_from_rfc3339(updated).is_ok_and(|t| t.with_timezone(&Utc) >= cutoff)
            })
            .map(|(quote, _)| quote)
            .collect())
    }

    pub fn market_price(&self, symbol: &str) -> Result<Option<CoinQuote>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT coin, price, change FROM market_prices WHERE coin=?1",
            params![symbol],
            |row| {
                Ok(CoinQuote {
                    symbol: row.get(0)?,
                    price: row.get(1)?,
                    change_24h: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn replace_market_summary(&self, summary: &MarketSummary) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM market_summary", [])?;
        tx.execute(
            "INSERT INTO market_summary
                (total_market_cap, total_volume, btc_dominance, eth_dominance, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                summary.total_market_cap,
                summary.total_volume,
                summary.btc_dominance,
                summary.eth_dominance,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn market_summary(&self) -> Result<Option<StoredSummary>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT total_market_cap, total_volume, btc_dominance, eth_dominance, last_updated
             FROM market_summary ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(StoredSummary {
                    summary: MarketSummary {
                        total_market_cap: row.get(0)?,
                        total_volume: row.get(1)?,
                        btc_dominance: row.get(2)?,
                        eth_dominance: row.get(3)?,
                    },
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn cleanup_old_records(&self) -> Result<()> {
        let cutoff_90d = (Utc::now() - chrono::Duration::days(90)).to_rfc3339();
        let conn = self.conn()?;
        conn.execute("DELETE FROM messages WHERE sent_date<?1", params![cutoff_90d])?;
        conn.execute("DELETE FROM webhook_logs WHERE received_date<?1", params![cutoff_90d])?;
        Ok(())
    }
}
