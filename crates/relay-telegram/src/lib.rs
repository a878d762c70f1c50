//! Telegram adapter (teloxide).
//!
//! This crate implements the `relay-core` MessagingPort over the Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, InputMedia, InputMediaDocument, ParseMode},
};

use tokio::time::sleep;

use relay_core::{
    domain::ChatId,
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, OutgoingDocument},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    max_message_len: usize,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, max_message_len: usize) -> Self {
        Self {
            bot,
            max_message_len,
        }
    }

    pub fn from_token(token: impl Into<String>, max_message_len: usize) -> Self {
        Self::new(Bot::new(token), max_message_len)
    }

    /// Log the bot's username; a bad token shows up here rather than on the first send.
    pub async fn log_identity(&self) {
        match self.bot.get_me().await {
            Ok(me) => tracing::info!(bot = %me.username(), "telegram bot ready"),
            Err(e) => tracing::warn!(error = %e, "telegram getMe failed"),
        }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn input_file(doc: &OutgoingDocument) -> InputFile {
        InputFile::file(doc.path.clone()).file_name(doc.file_name.clone())
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::warn!(retry_after = ?d, "telegram flood limit hit, retrying once");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: self.max_message_len,
            max_group_size: 10,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(Self::tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_document(&self, chat_id: ChatId, doc: &OutgoingDocument) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_document(Self::tg_chat(chat_id), Self::input_file(doc))
        })
        .await?;
        Ok(())
    }

    async fn send_document_group(
        &self,
        chat_id: ChatId,
        docs: &[OutgoingDocument],
    ) -> Result<()> {
        self.with_retry(|| {
            let media = docs
                .iter()
                .map(|d| InputMedia::Document(InputMediaDocument::new(Self::input_file(d))))
                .collect::<Vec<_>>();
            self.bot.send_media_group(Self::tg_chat(chat_id), media)
        })
        .await?;
        Ok(())
    }
}
