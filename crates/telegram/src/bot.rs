use std::time::Duration;

use {
    relay_config::schema::TelegramConfig,
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, BotCommand, UpdateKind},
    },
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{error::Result, handlers, state::BotState};

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A verified bot and the username Telegram reported for it.
pub struct Connected {
    pub bot: Bot,
    pub username: Option<String>,
}

/// HTTP client timeout for a long poll of `poll_timeout_secs`.
fn client_timeout(poll_timeout_secs: u32) -> Duration {
    Duration::from_secs(u64::from(poll_timeout_secs) + 15)
}

/// Build the bot, verify the token, clear any webhook and register commands.
pub async fn connect(config: &TelegramConfig) -> Result<Connected> {
    // The client must outlive the long-poll so Telegram answers first.
    let client = teloxide::net::default_reqwest_settings()
        .timeout(client_timeout(config.poll_timeout_secs))
        .build()?;
    let bot = Bot::with_client(config.token.expose_secret(), client);

    let me = bot.get_me().await?;
    let username = me.username.clone();

    bot.delete_webhook().send().await?;

    let commands = vec![
        BotCommand::new("start", "How to use this bot"),
        BotCommand::new("help", "How to use this bot"),
    ];
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("failed to register bot commands: {e}");
    }

    info!(username = ?username, "telegram bot connected (webhook cleared)");
    Ok(Connected { bot, username })
}

/// Run the getUpdates loop until `cancel` fires.
///
/// Stops on its own when another instance polls with the same token.
pub fn start_polling(
    state: BotState,
    poll_timeout_secs: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let request = state
                .bot
                .get_updates()
                .offset(offset)
                .timeout(poll_timeout_secs)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery]);

            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = request.send() => result,
            };

            match result {
                Ok(updates) => {
                    debug!(count = updates.len(), "got telegram updates");
                    for update in updates {
                        offset = update.id.as_offset();
                        dispatch(update.kind, &state).await;
                    }
                },
                Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                    warn!(
                        "telegram polling stopped: another instance is already running with this token"
                    );
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RETRY_DELAY) => {},
                    }
                },
            }
        }
        info!("telegram polling stopped");
    })
}

async fn dispatch(kind: UpdateKind, state: &BotState) {
    match kind {
        UpdateKind::Message(msg) => {
            debug!(chat_id = msg.chat.id.0, "received telegram message");
            if let Err(e) = handlers::handle_message(msg, state).await {
                error!(error = %e, "error handling telegram message");
            }
        },
        UpdateKind::CallbackQuery(query) => {
            debug!(callback_data = ?query.data, "received telegram callback query");
            if let Err(e) = handlers::handle_callback_query(query, state).await {
                error!(error = %e, "error handling telegram callback query");
            }
        },
        other => debug!("ignoring update: {other:?}"),
    }
}
