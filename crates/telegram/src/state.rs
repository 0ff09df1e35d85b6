use std::sync::Arc;

use {relay_queue::QueueScheduler, teloxide::Bot};

use crate::outbound::TelegramOutbound;

/// Everything update handlers need, shared by the polling loop.
#[derive(Clone)]
pub struct BotState {
    pub bot: Bot,
    pub bot_username: Option<String>,
    /// Telegram user ids or usernames allowed in. Empty = everyone.
    pub allowlist: Arc<Vec<String>>,
    pub outbound: Arc<TelegramOutbound>,
    pub scheduler: QueueScheduler,
}
