use std::{future::Future, time::Duration};

use {
    async_trait::async_trait,
    relay_channels::{
        Error as ChannelError, FileUpload, MessageHandle, RelayOutbound, Result as ChannelResult,
        StatusControls,
    },
    relay_common::{ConversationId, UploadKind},
    teloxide::{
        ApiError, RequestError,
        payloads::{EditMessageTextSetters, SendDocumentSetters, SendVideoSetters},
        prelude::*,
        types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId},
    },
    tracing::{debug, warn},
};

const TELEGRAM_RETRY_AFTER_MAX_RETRIES: usize = 4;

/// [`RelayOutbound`] over the Telegram Bot API.
///
/// Every call waits out `RetryAfter` rate limits a bounded number of times.
/// "Message is not modified" edits surface as [`ChannelError::NotModified`].
#[derive(Clone)]
pub struct TelegramOutbound {
    bot: Bot,
}

impl TelegramOutbound {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn run_telegram_request_with_retry<T, F, Fut>(
        &self,
        chat_id: i64,
        operation: &'static str,
        mut request: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut retries = 0usize;

        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(wait) = retry_after_duration(&err) else {
                        return Err(err);
                    };

                    if retries >= TELEGRAM_RETRY_AFTER_MAX_RETRIES {
                        warn!(
                            chat_id,
                            operation,
                            retries,
                            retry_after_secs = wait.as_secs(),
                            "telegram rate limit persisted after retries"
                        );
                        return Err(err);
                    }

                    retries += 1;
                    warn!(
                        chat_id,
                        operation,
                        retries,
                        max_retries = TELEGRAM_RETRY_AFTER_MAX_RETRIES,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }
}

/// Inline keyboard for `controls`. An empty keyboard removes old buttons.
pub fn keyboard(controls: StatusControls) -> InlineKeyboardMarkup {
    let row: Vec<InlineKeyboardButton> = controls
        .actions()
        .into_iter()
        .map(|action| InlineKeyboardButton::callback(action.label(), action.callback_data()))
        .collect();
    if row.is_empty() {
        InlineKeyboardMarkup::default()
    } else {
        InlineKeyboardMarkup::new(vec![row])
    }
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

fn is_message_not_modified_error(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::MessageNotModified))
}

fn channel_error(operation: &str, error: RequestError) -> ChannelError {
    if is_message_not_modified_error(&error) {
        ChannelError::NotModified
    } else {
        ChannelError::external(format!("telegram {operation}"), error)
    }
}

fn handle_of(to: ConversationId, message: &Message) -> MessageHandle {
    MessageHandle {
        conversation: to,
        message_id: message.id.0,
    }
}

#[async_trait]
impl RelayOutbound for TelegramOutbound {
    async fn send_text(&self, to: ConversationId, text: &str) -> ChannelResult<MessageHandle> {
        let chat = ChatId(to.0);
        let message = self
            .run_telegram_request_with_retry(to.0, "send message", || {
                let req = self.bot.send_message(chat, text);
                async move { req.await }
            })
            .await
            .map_err(|e| channel_error("send message", e))?;
        Ok(handle_of(to, &message))
    }

    async fn edit_status(
        &self,
        handle: MessageHandle,
        text: &str,
        controls: StatusControls,
    ) -> ChannelResult<()> {
        let chat = ChatId(handle.conversation.0);
        let message_id = MessageId(handle.message_id);
        self.run_telegram_request_with_retry(chat.0, "edit message", || {
            let req = self
                .bot
                .edit_message_text(chat, message_id, text)
                .reply_markup(keyboard(controls));
            async move { req.await }
        })
        .await
        .map_err(|e| channel_error("edit message", e))?;
        Ok(())
    }

    async fn send_file(
        &self,
        to: ConversationId,
        upload: FileUpload<'_>,
    ) -> ChannelResult<MessageHandle> {
        let chat = ChatId(to.0);
        debug!(
            chat_id = to.0,
            file_name = upload.file_name,
            kind = ?upload.kind,
            "uploading file"
        );

        let message = match upload.kind {
            UploadKind::Video => {
                self.run_telegram_request_with_retry(to.0, "send video", || {
                    let input =
                        InputFile::file(upload.path).file_name(upload.file_name.to_string());
                    let mut req = self.bot.send_video(chat, input).supports_streaming(true);
                    if let Some(caption) = upload.caption {
                        req = req.caption(caption);
                    }
                    async move { req.await }
                })
                .await
            },
            UploadKind::Document => {
                self.run_telegram_request_with_retry(to.0, "send document", || {
                    let input =
                        InputFile::file(upload.path).file_name(upload.file_name.to_string());
                    let mut req = self.bot.send_document(chat, input);
                    if let Some(caption) = upload.caption {
                        req = req.caption(caption);
                    }
                    async move { req.await }
                })
                .await
            },
        }
        .map_err(|e| channel_error("upload", e))?;
        Ok(handle_of(to, &message))
    }

    async fn delete_message(&self, handle: MessageHandle) -> ChannelResult<()> {
        let chat = ChatId(handle.conversation.0);
        let message_id = MessageId(handle.message_id);
        self.run_telegram_request_with_retry(chat.0, "delete message", || {
            let req = self.bot.delete_message(chat, message_id);
            async move { req.await }
        })
        .await
        .map_err(|e| channel_error("delete message", e))?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        relay_channels::Action,
        relay_common::RequestId,
        teloxide::types::InlineKeyboardButtonKind,
    };

    #[test]
    fn retry_after_duration_extracts_wait() {
        let err = RequestError::RetryAfter(teloxide::types::Seconds::from_seconds(42));
        assert_eq!(retry_after_duration(&err), Some(Duration::from_secs(42)));
    }

    #[test]
    fn retry_after_duration_ignores_other_errors() {
        let err = RequestError::Io(std::io::Error::other("boom"));
        assert_eq!(retry_after_duration(&err), None);
    }

    #[test]
    fn not_modified_maps_to_channel_variant() {
        let err = channel_error("edit message", RequestError::Api(ApiError::MessageNotModified));
        assert!(err.is_not_modified());

        let err = channel_error("edit message", RequestError::Io(std::io::Error::other("boom")));
        assert!(!err.is_not_modified());
        assert!(err.to_string().contains("telegram edit message"));
    }

    #[test]
    fn keyboard_carries_callback_data() {
        let id = RequestId::new();
        let markup = keyboard(StatusControls::PauseCancel(id));
        assert_eq!(markup.inline_keyboard.len(), 1);
        let data: Vec<String> = markup.inline_keyboard[0]
            .iter()
            .map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(d) => d.clone(),
                other => panic!("unexpected button {other:?}"),
            })
            .collect();
        assert_eq!(data, vec![
            Action::Pause(id).callback_data(),
            Action::Cancel(id).callback_data()
        ]);
        assert!(data.iter().all(|d| d.len() <= 64));
    }

    #[test]
    fn no_controls_clears_keyboard() {
        assert!(keyboard(StatusControls::None).inline_keyboard.is_empty());
    }
}
