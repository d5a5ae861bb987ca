use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, ParseMode};
use teloxide::RequestError;

use crate::db::Db;

const MAX_SEND_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(1500);

/// Error descriptions meaning the bot can never reach the chat again.
const UNREACHABLE_MARKERS: &[&str] = &[
    "bot was kicked",
    "bot was blocked",
    "chat not found",
    "chat was deleted",
    "user is deactivated",
    "bot is not a member",
    "bot can't initiate conversation",
    "peer_id_invalid",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("rate limited, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("chat unreachable: {0}")]
    Unreachable(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("group migrated to supergroup {0}")]
    Migrated(i64),
}

impl DeliveryError {
    /// Classify an API error description.
    pub fn from_description(description: &str) -> Self {
        let lower = description.to_lowercase();
        if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Unreachable(description.to_string())
        } else {
            Self::Rejected(description.to_string())
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryAfter(_) | Self::Transport(_))
    }
}

impl From<RequestError> for DeliveryError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::RetryAfter(wait) => Self::RetryAfter(wait.duration()),
            RequestError::MigrateToChatId(new_id) => Self::Migrated(new_id.0),
            RequestError::Api(api) => Self::from_description(&api.to_string()),
            RequestError::Network(err) => Self::Transport(err.to_string()),
            RequestError::Io(err) => Self::Transport(err.to_string()),
            other => Self::Rejected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

/// One message to fan out. `key` ties deliveries to the delivery log; a
/// chat that already has a record under the key is not sent to again.
#[derive(Debug, Clone)]
pub struct Payload {
    pub key: Option<String>,
    pub text: String,
    pub format: TextFormat,
    pub link_preview: bool,
}

impl Payload {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { key: None, text: text.into(), format: TextFormat::Plain, link_preview: false }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self { format: TextFormat::Html, ..Self::plain(text) }
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_link_preview(mut self, enabled: bool) -> Self {
        self.link_preview = enabled;
        self
    }
}

/// Something that can put a message into a chat.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Returns the id of the sent message.
    async fn deliver(&self, chat_id: i64, payload: &Payload) -> Result<i32, DeliveryError>;
}

#[async_trait]
impl Outbound for Bot {
    async fn deliver(&self, chat_id: i64, payload: &Payload) -> Result<i32, DeliveryError> {
        let mut req = self.send_message(ChatId(chat_id), payload.text.clone());
        if payload.format == TextFormat::Html {
            req = req.parse_mode(ParseMode::Html);
        }
        if !payload.link_preview {
            req = req.link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            });
        }
        let msg = req.await?;
        Ok(msg.id.0)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned: usize,
    pub migrated: usize,
}

async fn send_with_retry(
    out: &dyn Outbound,
    chat_id: i64,
    payload: &Payload,
) -> Result<i32, DeliveryError> {
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match out.deliver(chat_id, payload).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_retryable() && attempt < MAX_SEND_ATTEMPTS => {
                let wait = match &e {
                    DeliveryError::RetryAfter(d) => *d,
                    _ => {
                        let w = backoff;
                        backoff *= 2;
                        w
                    }
                };
                tracing::warn!(chat_id, attempt, error = %e, wait_ms = wait.as_millis() as u64, "Send failed, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reserve the (key, chat) pair. False when it is already taken. A
/// database failure is logged and the send goes ahead unclaimed.
fn claim(db: &Db, key: Option<&str>, chat_id: i64) -> bool {
    let Some(key) = key else { return true };
    match db.claim_delivery(key, chat_id) {
        Ok(claimed) => claimed,
        Err(e) => {
            tracing::warn!(chat_id, key, error = %e, "Failed to claim delivery, sending unclaimed");
            true
        }
    }
}

fn release(db: &Db, key: Option<&str>, chat_id: i64) {
    if let Some(key) = key {
        if let Err(e) = db.release_delivery(key, chat_id) {
            tracing::error!(chat_id, key, error = %e, "Failed to release delivery claim");
        }
    }
}

fn record(db: &Db, key: Option<&str>, chat_id: i64, message_id: i32) {
    if let Some(key) = key {
        if let Err(e) = db.log_delivery(key, chat_id, message_id) {
            tracing::error!(chat_id, key, error = %e, "Failed to log delivery");
        }
    }
}

enum Sent {
    Delivered { message_id: i32 },
    AlreadyClaimed,
}

/// Claim, send, and record one chat. A group that turned into a supergroup
/// is retried once under its new id; `on_migrate` updates the registry.
async fn send_claimed(
    out: &dyn Outbound,
    db: &Db,
    chat_id: i64,
    payload: &Payload,
    on_migrate: impl FnOnce(i64),
) -> Result<Sent, (i64, DeliveryError)> {
    let key = payload.key.as_deref();
    if !claim(db, key, chat_id) {
        return Ok(Sent::AlreadyClaimed);
    }
    let (target, result) = match send_with_retry(out, chat_id, payload).await {
        Err(DeliveryError::Migrated(new_id)) => {
            tracing::info!(old_id = chat_id, new_id, "Chat migrated, retrying under the new id");
            release(db, key, chat_id);
            on_migrate(new_id);
            if !claim(db, key, new_id) {
                return Ok(Sent::AlreadyClaimed);
            }
            (new_id, send_with_retry(out, new_id, payload).await)
        }
        other => (chat_id, other),
    };
    match result {
        Ok(message_id) => {
            record(db, key, target, message_id);
            Ok(Sent::Delivered { message_id })
        }
        Err(e) => {
            release(db, key, target);
            Err((target, e))
        }
    }
}

/// Send `payload` to every registered chat, one at a time with `throttle`
/// between sends. Keyed payloads claim each chat before sending, so
/// concurrent broadcasts of the same key never send twice. Chats that turn
/// out to be unreachable are removed from the registry.
pub async fn broadcast(
    out: &dyn Outbound,
    db: &Db,
    payload: &Payload,
    throttle: Duration,
) -> anyhow::Result<BroadcastReport> {
    let chats = db.list_chats()?;
    let mut report = BroadcastReport::default();
    if chats.is_empty() {
        tracing::warn!("No chats to broadcast to");
        return Ok(report);
    }

    for chat in &chats {
        let mut migrated = false;
        let sent = send_claimed(out, db, chat.chat_id, payload, |new_id| {
            migrated = true;
            if let Err(e) = db.migrate_chat(chat.chat_id, new_id, &chat.title, "supergroup") {
                tracing::error!(old_id = chat.chat_id, new_id, error = %e, "Failed to migrate chat");
            }
        })
        .await;
        if migrated {
            report.migrated += 1;
        }

        match sent {
            Ok(Sent::AlreadyClaimed) => {
                report.skipped += 1;
                continue;
            }
            Ok(Sent::Delivered { .. }) => report.delivered += 1,
            Err((chat_id, e)) => {
                report.failed += 1;
                tracing::error!(chat_id, error = %e, "Failed to send message");
                if matches!(e, DeliveryError::Unreachable(_)) {
                    match db.remove_chat(chat_id) {
                        Ok(_) => {
                            report.pruned += 1;
                            tracing::info!(chat_id, "Removed unreachable chat");
                        }
                        Err(e) => tracing::error!(chat_id, error = %e, "Failed to remove chat"),
                    }
                }
            }
        }
        tokio::time::sleep(throttle).await;
    }

    tracing::info!(
        delivered = report.delivered,
        skipped = report.skipped,
        failed = report.failed,
        pruned = report.pruned,
        migrated = report.migrated,
        "Broadcast completed"
    );
    Ok(report)
}

/// Send `payload` to a single chat, logging the delivery. Returns `None`
/// when a keyed payload already went to this chat. The registry is left
/// untouched.
pub async fn deliver_to(
    out: &dyn Outbound,
    db: &Db,
    chat_id: i64,
    payload: &Payload,
) -> Result<Option<i32>, DeliveryError> {
    match send_claimed(out, db, chat_id, payload, |_| {}).await {
        Ok(Sent::Delivered { message_id }) => Ok(Some(message_id)),
        Ok(Sent::AlreadyClaimed) => Ok(None),
        Err((_, e)) => Err(e),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    /// Records sent messages; errors can be queued per chat.
    #[derive(Default)]
    pub struct RecordingOutbound {
        pub sent: Mutex<Vec<(i64, Payload)>>,
        failures: Mutex<HashMap<i64, VecDeque<DeliveryError>>>,
        next_id: AtomicI32,
    }

    impl RecordingOutbound {
        pub fn fail_next(&self, chat_id: i64, err: DeliveryError) {
            self.failures.lock().unwrap().entry(chat_id).or_default().push_back(err);
        }

        pub fn sent_to(&self) -> Vec<i64> {
            self.sent.lock().unwrap().iter().map(|(id, _)| *id).collect()
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn deliver(&self, chat_id: i64, payload: &Payload) -> Result<i32, DeliveryError> {
            if let Some(err) = self.failures.lock().unwrap().get_mut(&chat_id).and_then(|q| q.pop_front()) {
                return Err(err);
            }
            self.sent.lock().unwrap().push((chat_id, payload.clone()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }
}
