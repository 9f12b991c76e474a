use crate::config::AlertsConfig;
use crate::error::AlertError;
use log::{info, warn};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default Telegram Bot API endpoint
pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Request timeout for alert delivery
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for rendered alert messages
pub trait AlertSink: Send + Sync {
    /// Deliver one HTML message
    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct SendMessageForm<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Sink posting messages to a Telegram chat through the Bot API
pub struct TelegramSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramSink {
    /// Create a sink for the given bot and chat
    pub fn new(bot_token: String, chat_id: String) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            bot_token,
            chat_id,
            api_base: TELEGRAM_API.to_string(),
        })
    }

    /// Build from the `[alerts]` section; both token and chat id are required
    pub fn from_config(config: &AlertsConfig) -> Result<Self, AlertError> {
        let token = config.telegram_bot_token.as_deref().filter(|t| !t.is_empty());
        let chat_id = config.telegram_chat_id.as_deref().filter(|c| !c.is_empty());

        match (token, chat_id) {
            (Some(token), Some(chat_id)) => Self::new(token.to_string(), chat_id.to_string()),
            _ => Err(AlertError::NotConfigured(
                "alerts.telegram_bot_token and alerts.telegram_chat_id must both be set"
                    .to_string(),
            )),
        }
    }

    /// Point the sink at a different Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

impl AlertSink for TelegramSink {
    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let form = SendMessageForm {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
            };

            let response = self
                .client
                .post(self.send_message_url())
                .form(&form)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AlertError::NotificationFailed(format!(
                    "Telegram API returned {}: {}",
                    status, body
                )));
            }

            info!("Alert delivered to Telegram chat {}", self.chat_id);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Sink writing messages to the log, used when no chat is configured
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            warn!("ALERT\n{}", text);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Sink recording messages in memory
///
/// Useful for tests and dry runs. Can be set to fail every delivery.
#[derive(Debug, Default, Clone)]
pub struct MockSink {
    messages: Arc<Mutex<Vec<String>>>,
    failure: Option<String>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            messages: Arc::default(),
            failure: Some(reason.into()),
        }
    }

    /// Messages delivered so far, in order
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or_default()
    }
}

impl AlertSink for MockSink {
    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(reason) = &self.failure {
                return Err(AlertError::NotificationFailed(reason.clone()));
            }
            if let Ok(mut messages) = self.messages.lock() {
                messages.push(text.to_string());
            }
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
