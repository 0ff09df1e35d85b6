use {
    relay_channels::{Action, RelayOutbound},
    relay_common::{ConversationId, UserId},
    relay_queue::{Error as QueueError, QueuePosition},
    teloxide::{
        payloads::AnswerCallbackQuerySetters,
        prelude::*,
        types::{CallbackQuery, User},
    },
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{access::check_access, error::Result, state::BotState};

const HELP_TEXT: &str = "Send me one or more http(s) links and I will download them and \
                         send the files back here.\n\n\
                         Downloads in this chat run one at a time, in the order you sent \
                         them. Use the buttons under a status message to pause, resume or \
                         cancel the running download. Large files arrive in several parts.";

const USAGE_HINT: &str = "That does not look like a link. Send an http:// or https:// URL, \
                          or /help for details.";

/// Slash commands the bot answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
}

/// Parse `/start` or `/help`, optionally addressed as `/help@bot_name`.
///
/// A command addressed to another bot is ignored.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let word = text.split_whitespace().next()?.strip_prefix('/')?;
    let (name, target) = match word.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (word, None),
    };
    if let (Some(target), Some(me)) = (target, bot_username)
        && !target.eq_ignore_ascii_case(me)
    {
        return None;
    }
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "help" => Some(Command::Help),
        _ => None,
    }
}

/// Every http(s) URL in `text`, in order, without duplicates.
///
/// Surrounding brackets, quotes and trailing punctuation are stripped.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let token = token
            .trim_start_matches(['(', '<', '[', '"', '\''])
            .trim_end_matches([')', '>', ']', '"', '\'', ',', '.', ';', '!', '?']);
        let Ok(url) = Url::parse(token) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            continue;
        }
        let url = url.to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// Toast shown after a button press.
pub fn callback_toast(action: Action, applied: bool) -> &'static str {
    if !applied {
        return "This download is no longer active.";
    }
    match action {
        Action::Pause(_) => "Pausing…",
        Action::Resume(_) => "Resuming…",
        Action::Cancel(_) => "Cancelling…",
    }
}

fn sender_access(state: &BotState, user: Option<&User>) -> Option<UserId> {
    let id = user.map(|u| UserId(u.id.0));
    let username = user.and_then(|u| u.username.as_deref());
    match check_access(&state.allowlist, id, username) {
        Ok(()) => id,
        Err(reason) => {
            warn!(user_id = ?id, username, %reason, "telegram update rejected");
            None
        },
    }
}

/// Handle one inbound text message: commands, links, or a usage hint.
pub async fn handle_message(msg: Message, state: &BotState) -> Result<()> {
    let Some(text) = msg.text() else {
        debug!(chat_id = msg.chat.id.0, "ignoring non-text message");
        return Ok(());
    };
    let Some(user) = sender_access(state, msg.from.as_ref()) else {
        return Ok(());
    };
    let conversation = ConversationId(msg.chat.id.0);

    if let Some(command) = parse_command(text, state.bot_username.as_deref()) {
        debug!(%conversation, ?command, "telegram command");
        state.outbound.send_text(conversation, HELP_TEXT).await?;
        return Ok(());
    }

    let urls = extract_urls(text);
    if urls.is_empty() {
        state.outbound.send_text(conversation, USAGE_HINT).await?;
        return Ok(());
    }

    for url in urls {
        match state.scheduler.enqueue(conversation, user, &url).await {
            Ok(enqueued) => {
                let ahead = match enqueued.position {
                    QueuePosition::Started => 0,
                    QueuePosition::Waiting(ahead) => ahead,
                };
                info!(%conversation, request = %enqueued.id, ahead, "link accepted");
            },
            // The scheduler already told the user.
            Err(QueueError::QuotaExceeded { .. }) => break,
            Err(QueueError::ShuttingDown) => {
                state
                    .outbound
                    .send_text(conversation, "The relay is shutting down, try again later.")
                    .await?;
                break;
            },
            Err(e) => {
                warn!(%conversation, url, error = %e, "failed to queue link");
                state
                    .outbound
                    .send_text(conversation, &format!("⚠️ Could not queue {url}: {e}"))
                    .await?;
            },
        }
    }
    Ok(())
}

/// Handle a pause/resume/cancel button press.
pub async fn handle_callback_query(query: CallbackQuery, state: &BotState) -> Result<()> {
    let toast = match (
        sender_access(state, Some(&query.from)),
        query.data.as_deref().and_then(Action::parse),
        query.message.as_ref().map(|m| ConversationId(m.chat().id.0)),
    ) {
        (None, ..) => "You are not allowed to use this bot.",
        (Some(_), Some(action), Some(conversation)) => {
            let applied = state.scheduler.apply(conversation, action).await;
            debug!(
                %conversation,
                request = %action.request_id(),
                action = action.verb(),
                applied,
                "telegram button press"
            );
            callback_toast(action, applied)
        },
        (Some(_), ..) => {
            debug!(callback_data = ?query.data, "ignoring unknown callback");
            ""
        },
    };

    // Dismisses the client's loading spinner; failure only costs the toast.
    let mut answer = state.bot.answer_callback_query(&query.id);
    if !toast.is_empty() {
        answer = answer.text(toast);
    }
    if let Err(e) = answer.await {
        debug!(error = %e, "failed to answer callback query");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, relay_common::RequestId, rstest::rstest};

    #[rstest]
    #[case("/start", None, Some(Command::Start))]
    #[case("/help", Some("relaybot"), Some(Command::Help))]
    #[case("/HELP extra words", None, Some(Command::Help))]
    #[case("/help@RelayBot", Some("relaybot"), Some(Command::Help))]
    #[case("/help@otherbot", Some("relaybot"), None)]
    #[case("/help@otherbot", None, Some(Command::Help))]
    #[case("/stats", None, None)]
    #[case("help", None, None)]
    #[case("", None, None)]
    fn commands(
        #[case] text: &str,
        #[case] bot: Option<&str>,
        #[case] expected: Option<Command>,
    ) {
        assert_eq!(parse_command(text, bot), expected);
    }

    #[test]
    fn urls_are_extracted_in_order() {
        let text = "grab https://a.example/x.mp4, and (http://b.example/y.zip) please";
        assert_eq!(extract_urls(text), vec![
            "https://a.example/x.mp4",
            "http://b.example/y.zip"
        ]);
    }

    #[test]
    fn duplicate_urls_collapse() {
        let text = "https://a.example/f https://a.example/f";
        assert_eq!(extract_urls(text), vec!["https://a.example/f"]);
    }

    #[rstest]
    #[case("just some words")]
    #[case("ftp://files.example/a.bin")]
    #[case("mailto:someone@example.com")]
    #[case("https://")]
    fn non_http_text_yields_nothing(#[case] text: &str) {
        assert!(extract_urls(text).is_empty());
    }

    #[test]
    fn stale_buttons_get_a_notice() {
        let id = RequestId::new();
        assert_eq!(callback_toast(Action::Pause(id), true), "Pausing…");
        assert_eq!(callback_toast(Action::Resume(id), true), "Resuming…");
        assert_eq!(callback_toast(Action::Cancel(id), true), "Cancelling…");
        assert_eq!(
            callback_toast(Action::Cancel(id), false),
            "This download is no longer active."
        );
    }
}
