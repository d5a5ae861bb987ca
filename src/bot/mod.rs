pub mod commands;
pub mod membership;
pub mod messages;
pub mod notifier;

use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    let message_handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<commands::Command>()
                .endpoint(commands::handle),
        )
        .branch(
            dptree::filter_map(|msg: Message| msg.migrate_from_chat_id().copied())
                .endpoint(membership::on_migration),
        )
        .branch(
            dptree::filter(|msg: Message| msg.chat.is_private() && msg.text().is_some())
                .endpoint(membership::on_private_text),
        );

    dptree::entry()
        .branch(Update::filter_my_chat_member().endpoint(membership::on_my_chat_member))
        .branch(message_handler)
}
