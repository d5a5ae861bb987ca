use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{Chat, ChatMemberUpdated};

use crate::bot::{messages, HandlerResult};
use crate::db::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Joined,
    Left,
}

/// What a change of the bot's own membership means for the registry.
pub fn membership_transition(was_present: bool, is_present: bool) -> Option<Transition> {
    match (was_present, is_present) {
        (false, true) => Some(Transition::Joined),
        (true, false) => Some(Transition::Left),
        _ => None,
    }
}

pub fn chat_kind(chat: &Chat) -> &'static str {
    if chat.is_private() {
        "private"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_group() {
        "group"
    } else {
        "channel"
    }
}

/// Group title, or the user's first name for private chats.
pub fn chat_title(chat: &Chat) -> String {
    chat.title()
        .or_else(|| chat.first_name())
        .unwrap_or("Private Chat")
        .to_string()
}

pub async fn on_my_chat_member(bot: Bot, upd: ChatMemberUpdated, db: Arc<Db>) -> HandlerResult {
    let chat_id = upd.chat.id.0;
    let transition = membership_transition(
        upd.old_chat_member.kind.is_present(),
        upd.new_chat_member.kind.is_present(),
    );
    match transition {
        Some(Transition::Joined) => {
            let kind = chat_kind(&upd.chat);
            db.add_chat(chat_id, &chat_title(&upd.chat), kind)?;
            tracing::info!(chat_id, kind, "Bot added to chat");
            if upd.chat.is_group() || upd.chat.is_supergroup() {
                bot.send_message(upd.chat.id, messages::group_welcome()).await?;
            }
        }
        Some(Transition::Left) => {
            let removed = db.remove_chat(chat_id)?;
            tracing::info!(chat_id, removed, "Bot removed from chat");
        }
        None => {}
    }
    Ok(())
}

/// Runs on the service message in the new supergroup.
pub async fn on_migration(msg: Message, old_id: ChatId, db: Arc<Db>) -> HandlerResult {
    let new_id = msg.chat.id.0;
    db.migrate_chat(old_id.0, new_id, &chat_title(&msg.chat), chat_kind(&msg.chat))?;
    tracing::info!(old_id = old_id.0, new_id, "Group migrated to supergroup");
    Ok(())
}

pub async fn on_private_text(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, messages::private_text_reply()).await?;
    Ok(())
}
