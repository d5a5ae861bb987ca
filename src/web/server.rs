use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teloxide::utils::html;
use tokio::net::TcpListener;

use crate::bot::messages;
use crate::bot::notifier::{self, Outbound, Payload};
use crate::data::news::News;
use crate::db::Db;
use crate::shutdown::Shutdown;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub outbound: Arc<dyn Outbound>,
    pub webhook_secret: String,
    pub bot_name: String,
    pub throttle: Duration,
    pub shutdown: Shutdown,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/news-webhook", post(news_webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn serve(app: Router, addr: SocketAddr, shutdown: Shutdown) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("HTTP server error")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"ar\" dir=\"rtl\">\n<head><meta charset=\"utf-8\"><title>بوت أخبار الكريبتو</title></head>\n\
         <body>\n<h1>بوت أخبار الكريبتو من إنفترون داو</h1>\n\
         <p>البوت يعمل. أضف <a href=\"https://t.me/{name}\">@{name}</a> إلى مجموعتك لتصلك أخبار الكريبتو.</p>\n\
         </body>\n</html>\n",
        name = html::escape(&state.bot_name)
    ))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "telegram-news-bot" }))
}

/// `POST /news-webhook`: validate, log, and hand the item to a background
/// delivery task.
async fn news_webhook(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if state.shutdown.is_triggered() {
        return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down"));
    }

    let Json(data) = body.map_err(|e| match e {
        JsonRejection::MissingJsonContentType(_) => api_error(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json",
        ),
        other => api_error(other.status(), format!("invalid request body: {}", other.body_text())),
    })?;

    let secret = data.get("secret").and_then(Value::as_str).unwrap_or_default();
    if secret.is_empty() || !constant_time_eq(secret, &state.webhook_secret) {
        tracing::warn!("Invalid webhook secret received");
        return Err(api_error(StatusCode::FORBIDDEN, "Unauthorized, bad secret"));
    }

    let raw_news = match data.get("news") {
        Some(v) if !is_blank(v) => v,
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "Missing 'news' field")),
    };
    let news = News::from_value(raw_news).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let target = parse_target(data.get("target_chat_id"))
        .map_err(|msg| api_error(StatusCode::BAD_REQUEST, msg))?;

    state.db.log_webhook(&news.id, &raw_news.to_string()).map_err(|e| {
        tracing::error!(error = %e, news_id = %news.id, "Failed to log webhook");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error")
    })?;
    if news.has_crypto_tags() {
        tracing::info!(title = %news.title, "Received cryptocurrency news");
    }

    let btc_change = match state.db.market_price("BTC") {
        Ok(quote) => quote.map(|q| q.change_24h),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read cached BTC price");
            None
        }
    };
    let payload = Payload::plain(messages::format_news(&news, btc_change))
        .keyed(news.id.clone())
        .with_link_preview(news.has_image());
    tokio::spawn(deliver_news(state.clone(), payload, target));

    let target_mode = if target.is_some() { "single_chat" } else { "broadcast" };
    let mut response = json!({
        "status": "success",
        "message": "News broadcast request accepted",
        "news_id": news.id,
        "target_mode": target_mode,
    });
    if let Some(chat_id) = target {
        response["target_chat_id"] = json!(chat_id);
    }
    Ok(Json(response))
}

async fn deliver_news(state: AppState, payload: Payload, target: Option<i64>) {
    let news_id = payload.key.clone().unwrap_or_default();
    match target {
        Some(chat_id) => {
            tracing::info!(chat_id, %news_id, "Sending news to specific chat");
            match notifier::deliver_to(state.outbound.as_ref(), &state.db, chat_id, &payload).await {
                Ok(Some(_)) => tracing::info!(chat_id, %news_id, "News delivered"),
                Ok(None) => tracing::info!(chat_id, %news_id, "News already delivered to this chat"),
                Err(e) => tracing::error!(chat_id, %news_id, error = %e, "News delivery failed"),
            }
        }
        None => match notifier::broadcast(state.outbound.as_ref(), &state.db, &payload, state.throttle).await {
            Ok(report) => tracing::info!(
                %news_id,
                delivered = report.delivered,
                failed = report.failed,
                "News broadcast finished"
            ),
            Err(e) => tracing::error!(%news_id, error = %e, "News broadcast failed"),
        },
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Absent, null or empty means broadcast. Accepts integers and integer
/// strings.
fn parse_target(value: Option<&Value>) -> Result<Option<i64>, &'static str> {
    const INVALID: &str = "target_chat_id must be a non-zero integer";
    let id = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().ok_or(INVALID)?,
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| INVALID)?,
        Some(_) => return Err(INVALID),
    };
    if id == 0 {
        return Err(INVALID);
    }
    Ok(Some(id))
}
