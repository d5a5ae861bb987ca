mod bot;
mod config;
mod data;
mod db;
mod engine;
mod shutdown;
mod web;

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::update_listeners::{polling_default, webhooks};
use teloxide::utils::command::BotCommands;

use crate::bot::notifier::Outbound;
use crate::data::coingecko::CoinGecko;
use crate::data::coinmarketcap::CoinMarketCap;
use crate::data::fetcher::MarketFetcher;
use crate::data::market::MarketSource;
use crate::shutdown::Shutdown;

const MARKET_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DISPATCHER_STOP_RETRY: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crypto_news_bot=info".into()),
        )
        .init();

    let cfg = Arc::new(config::Config::from_env()?);
    let db = Arc::new(db::Db::new(&cfg.database_file)?);
    let bot = Bot::new(&cfg.bot_token);
    let shutdown = Shutdown::new();

    tracing::info!("Crypto News Bot starting...");

    let me = bot.get_me().await.context("failed to reach Telegram")?;
    let bot_name = me.user.username.clone().unwrap_or_default();
    tracing::info!(username = %bot_name, "Authorized");
    if let Err(e) = bot.set_my_commands(bot::commands::Command::bot_commands()).await {
        tracing::warn!(error = %e, "Failed to register command list");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;
    let primary: Box<dyn MarketSource> = Box::new(CoinGecko::new(http.clone(), cfg.coingecko_api_key.clone()));
    let fallback = cfg
        .coinmarketcap_api_key
        .clone()
        .map(|key| Box::new(CoinMarketCap::new(http.clone(), key)) as Box<dyn MarketSource>);
    if fallback.is_none() {
        tracing::info!("COINMARKETCAP_API_KEY not set, running without a fallback market source");
    }

    let outbound: Arc<dyn Outbound> = Arc::new(bot.clone());

    let scheduler = engine::scheduler::Scheduler {
        db: db.clone(),
        fetcher: MarketFetcher::new(primary, fallback, MARKET_FETCH_TIMEOUT),
        outbound: outbound.clone(),
        admin_chat_id: cfg.admin_chat_id,
        throttle: cfg.broadcast_delay,
        hourly_price_updates: cfg.hourly_price_updates,
    };
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    // HTTP server: news webhook, plus Telegram updates when a public URL is set
    let addr = cfg.bind_addr()?;
    let mut app = web::router(web::AppState {
        db: db.clone(),
        outbound,
        webhook_secret: cfg.webhook_secret.clone(),
        bot_name,
        throttle: cfg.broadcast_delay,
        shutdown: shutdown.clone(),
    });
    let webhook_listener = match cfg.webhook_url.clone() {
        Some(url) => {
            tracing::info!(%url, "Receiving Telegram updates via webhook");
            let mut options = webhooks::Options::new(addr, url);
            if let Some(token) = &cfg.telegram_secret_token {
                options = options.secret_token(token.clone());
            }
            let (listener, _stop_flag, telegram_router) = webhooks::axum_to_router(bot.clone(), options)
                .await
                .context("failed to set Telegram webhook")?;
            app = app.merge(telegram_router);
            Some(listener)
        }
        None => None,
    };
    let server_task = tokio::spawn(web::serve(app, addr, shutdown.clone()));

    let mut dispatcher = Dispatcher::builder(bot.clone(), bot::schema())
        .dependencies(dptree::deps![db, cfg.clone()])
        .build();

    let token = dispatcher.shutdown_token();
    let ctrlc_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        ctrlc_shutdown.trigger();
        // The token refuses until the dispatcher is running.
        shutdown::retry_until_ok(|| token.shutdown(), DISPATCHER_STOP_RETRY).await.await;
    });

    let error_handler = LoggingErrorHandler::with_custom_text("An error from the update listener");
    match webhook_listener {
        Some(listener) => dispatcher.dispatch_with_listener(listener, error_handler).await,
        None => {
            tracing::info!("Receiving Telegram updates via long polling");
            let listener = polling_default(bot).await;
            dispatcher.dispatch_with_listener(listener, error_handler).await
        }
    }

    shutdown.trigger();
    match tokio::time::timeout(TASK_STOP_TIMEOUT, server_task).await {
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed"),
        Err(_) => tracing::warn!("HTTP server did not stop in time"),
        _ => {}
    }
    if tokio::time::timeout(TASK_STOP_TIMEOUT, scheduler_task).await.is_err() {
        tracing::warn!("Scheduler did not stop in time");
    }

    tracing::info!("Crypto News Bot stopped");
    Ok(())
}
