//! Telegram admin bot: a thin shell that long-polls `getUpdates` and forwards
//! each message's text verbatim to the [`CommandDispatcher`] — the same
//! command surface the CLI exposes. The bot owns nothing except the update
//! offset and the allow-list check.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::alert::Notifier;
use crate::error::{LbError, Result};
use crate::store::Store;

/// Implemented by the Orchestrator's command surface; lets the bot stay
/// ignorant of candidate/domain/health types entirely.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command_line: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
    from: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

pub struct TelegramBot {
    client: reqwest::Client,
    api_base: String,
    allowed_user_id: Option<i64>,
    poll_timeout: Duration,
    store: Store,
}

impl TelegramBot {
    pub fn new(
        bot_token: &str,
        allowed_user_id: Option<i64>,
        proxy: Option<&str>,
        poll_timeout: Duration,
        store: Store,
    ) -> Result<Self> {
        Self::with_api_base(
            &format!("https://api.telegram.org/bot{bot_token}"),
            allowed_user_id,
            proxy,
            poll_timeout,
            store,
        )
    }

    fn with_api_base(
        api_base: &str,
        allowed_user_id: Option<i64>,
        proxy: Option<&str>,
        poll_timeout: Duration,
        store: Store,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(poll_timeout + Duration::from_secs(10));
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| LbError::NotifyFailed(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| LbError::NotifyFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.to_string(),
            allowed_user_id,
            poll_timeout,
            store,
        })
    }

    /// One long-poll cycle: fetch updates since the persisted offset, reply
    /// to each allowed text message, then persist the new offset. Unknown or
    /// disallowed senders are silently ignored (not an error).
    pub async fn poll_once(&self, dispatcher: &dyn CommandDispatcher) -> Result<()> {
        let offset = self.store.load_bot_offset()?;
        let updates = self.get_updates(offset).await?;

        let mut next_offset = offset;
        for update in &updates {
            next_offset = next_offset.max(update.update_id + 1);

            let Some(message) = &update.message else { continue };
            let Some(text) = &message.text else { continue };
            if !self.is_allowed(message.from.as_ref()) {
                continue;
            }

            let reply = dispatcher.dispatch(text).await;
            let _ = self.send_message(message.chat.id, &reply).await;
        }

        if next_offset != offset {
            self.store.save_bot_offset(next_offset)?;
        }
        Ok(())
    }

    fn is_allowed(&self, from: Option<&User>) -> bool {
        match (self.allowed_user_id, from) {
            (Some(allowed), Some(user)) => user.id == allowed,
            (None, _) => false,
            (Some(_), None) => false,
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let resp = self
            .client
            .get(format!("{}/getUpdates", self.api_base))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout.as_secs().to_string()),
            ])
            .send()
            .await?;
        let body: GetUpdatesResponse = resp.json().await?;
        if !body.ok {
            return Err(LbError::NotifyFailed("getUpdates returned ok=false".into()));
        }
        Ok(body.result)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        Ok(())
    }
}

/// Alerts are delivered as a direct message to the single allowed operator;
/// there is no group-chat fan-out in this deployment model.
#[async_trait]
impl Notifier for TelegramBot {
    async fn notify(&self, message: &str) -> Result<()> {
        let chat_id = self
            .allowed_user_id
            .ok_or_else(|| LbError::NotifyFailed("no allowed user configured".into()))?;
        self.send_message(chat_id, message).await
    }
}
