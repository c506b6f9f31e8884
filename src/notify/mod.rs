//! Outbound delivery to riders (chat) and drivers (push).
//!
//! Every call site treats delivery as best effort: a failed send is logged
//! and never undoes the state change that triggered it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway rejected message with status {0}")]
    Rejected(u16),

    #[error("no gateway configured for {0}")]
    NotConfigured(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "channel", content = "address", rename_all = "lowercase")]
pub enum Recipient {
    /// Chat handle (phone number) of a rider or driver.
    Chat(String),
    /// Push token registered by the driver app.
    Push(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, to: &Recipient, message: &Notification) -> Result<(), NotifyError>;
}

/// Send and swallow the outcome. Returns whether delivery succeeded.
pub async fn deliver(gateway: &dyn NotificationGateway, to: &Recipient, message: &Notification) -> bool {
    match gateway.send(to, message).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, recipient = ?to, "notification delivery failed");
            false
        }
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn send(&self, to: &Recipient, message: &Notification) -> Result<(), NotifyError> {
        tracing::info!(recipient = ?to, title = %message.title, body = %message.body, "notification (log only)");
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a BTreeMap<String, String>,
}

/// Relays messages as JSON to the chat and push transport services.
pub struct HttpGateway {
    client: reqwest::Client,
    chat_url: Option<String>,
    push_url: Option<String>,
}

impl HttpGateway {
    pub fn new(chat_url: Option<String>, push_url: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            chat_url,
            push_url,
        })
    }
}

#[async_trait]
impl NotificationGateway for HttpGateway {
    async fn send(&self, to: &Recipient, message: &Notification) -> Result<(), NotifyError> {
        let (url, address) = match to {
            Recipient::Chat(phone) => (
                self.chat_url.as_deref().ok_or(NotifyError::NotConfigured("chat"))?,
                phone.as_str(),
            ),
            Recipient::Push(token) => (
                self.push_url.as_deref().ok_or(NotifyError::NotConfigured("push"))?,
                token.as_str(),
            ),
        };

        let response = self
            .client
            .post(url)
            .json(&OutboundMessage {
                to: address,
                title: &message.title,
                body: &message.body,
                data: &message.data,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }

        tracing::debug!(recipient = ?to, "notification delivered");
        Ok(())
    }
}
