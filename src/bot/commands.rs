use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;

use crate::bot::{membership, messages, HandlerResult};
use crate::config::Config;
use crate::db::Db;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "الأوامر المتاحة:")]
pub enum Command {
    #[command(description = "بدء استخدام البوت")]
    Start,
    #[command(description = "عرض رسالة المساعدة")]
    Help,
    #[command(description = "معلومات عن البوت")]
    About,
    #[command(description = "التحقق من حالة البوت")]
    Status,
    #[command(description = "عرض أحدث أسعار العملات الرقمية")]
    Price,
    #[command(description = "عرض معلومات سوق الكريبتو")]
    Market,
    #[command(description = "إرسال ملاحظات أو اقتراحات")]
    Feedback(String),
    #[command(description = "إحصائيات البوت (للمشرف)")]
    Stats,
}

pub async fn handle(bot: Bot, msg: Message, cmd: Command, db: Arc<Db>, cfg: Arc<Config>) -> HandlerResult {
    match cmd {
        Command::Start => cmd_start(&bot, &msg, &db).await?,
        Command::Help => reply_html(&bot, &msg, messages::help_message()).await?,
        Command::About => reply_html(&bot, &msg, messages::about_message()).await?,
        Command::Status => {
            let updated = db.market_summary()?.map(|s| s.updated_at);
            bot.send_message(msg.chat.id, messages::status_message(updated.as_deref())).await?;
        }
        Command::Price => cmd_price(&bot, &msg, &db).await?,
        Command::Market => match db.market_summary()? {
            Some(stored) => reply_html(&bot, &msg, &messages::market_board(&stored.summary)).await?,
            None => {
                bot.send_message(msg.chat.id, messages::no_market_data()).await?;
            }
        },
        Command::Feedback(text) => cmd_feedback(&bot, &msg, text.trim()).await?,
        Command::Stats => cmd_stats(&bot, &msg, &db, &cfg).await?,
    }
    Ok(())
}

async fn reply_html(bot: &Bot, msg: &Message, text: &str) -> HandlerResult {
    bot.send_message(msg.chat.id, text).parse_mode(ParseMode::Html).await?;
    Ok(())
}

async fn cmd_start(bot: &Bot, msg: &Message, db: &Db) -> HandlerResult {
    let title = membership::chat_title(&msg.chat);
    let kind = membership::chat_kind(&msg.chat);
    db.add_chat(msg.chat.id.0, &title, kind)?;
    tracing::info!(chat_id = msg.chat.id.0, kind, "Chat registered via /start");

    bot.send_message(msg.chat.id, messages::welcome_message(msg.chat.is_private())).await?;
    Ok(())
}

async fn cmd_price(bot: &Bot, msg: &Message, db: &Db) -> HandlerResult {
    let quotes = db.market_prices()?;
    if quotes.is_empty() {
        bot.send_message(msg.chat.id, messages::no_price_data()).await?;
        return Ok(());
    }
    reply_html(bot, msg, &messages::price_board(&quotes)).await
}

async fn cmd_feedback(bot: &Bot, msg: &Message, text: &str) -> HandlerResult {
    if text.is_empty() {
        return reply_html(bot, msg, messages::feedback_usage()).await;
    }
    tracing::info!(chat_id = msg.chat.id.0, feedback = text, "Feedback received");
    bot.send_message(msg.chat.id, messages::feedback_thanks()).await?;
    Ok(())
}

async fn cmd_stats(bot: &Bot, msg: &Message, db: &Db, cfg: &Config) -> HandlerResult {
    if !is_admin(cfg.admin_chat_id, msg.chat.id.0) {
        bot.send_message(msg.chat.id, messages::not_authorized()).await?;
        return Ok(());
    }
    let chats = db.count_chats()?;
    let since = chrono::Utc::now() - chrono::Duration::hours(24);
    let deliveries = db.count_deliveries_since(since)?;
    reply_html(bot, msg, &messages::stats_message(chats, deliveries)).await
}

fn is_admin(admin_chat_id: Option<i64>, chat_id: i64) -> bool {
    admin_chat_id == Some(chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_lowercase_with_arguments() {
        assert!(matches!(Command::parse("/price", "news_bot"), Ok(Command::Price)));
        assert!(matches!(Command::parse("/market@news_bot", "news_bot"), Ok(Command::Market)));
        match Command::parse("/feedback more alerts please", "news_bot") {
            Ok(Command::Feedback(text)) => assert_eq!(text, "more alerts please"),
            _ => panic!("feedback did not parse"),
        }
        assert!(Command::parse("/weather", "news_bot").is_err());
    }

    #[test]
    fn command_list_covers_every_command() {
        assert_eq!(Command::bot_commands().len(), 8);
    }

    #[test]
    fn stats_requires_the_admin_chat() {
        assert!(is_admin(Some(42), 42));
        assert!(!is_admin(Some(42), 7));
        assert!(!is_admin(None, 42));
    }
}
