//! Operator alerting for conditions automation must not resolve on its own.
//!
//! Every breach is written to the `breach_alert` log target as JSON and
//! forwarded to the configured [`Alerter`]. Delivery failures are logged
//! and swallowed; alerting never aborts trading logic.

use crate::config::AlertConfig;
use crate::error::{BreachKind, FatalBreach};
use crate::exchange::Venue;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Structured record of a breach.
#[derive(Debug, Clone, Serialize)]
pub struct BreachAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub kind: BreachKind,
    pub open_leg: Venue,
    pub message: String,
}

impl BreachAlert {
    pub fn from_breach(breach: &FatalBreach, timestamp: DateTime<Utc>) -> Self {
        Self {
            alert_id: format!(
                "breach-{}-{}",
                breach.symbol.to_lowercase(),
                timestamp.timestamp_millis()
            ),
            timestamp,
            symbol: breach.symbol.clone(),
            kind: breach.kind,
            open_leg: breach.open_leg,
            message: breach.to_string(),
        }
    }

    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        error!(target: "breach_alert", "BREACH_ALERT: {}", json);
    }

    /// Plain-text body for chat delivery.
    pub fn render(&self) -> String {
        format!(
            "🚨 {:?} breach on {}\n{} leg left open\n{}\nManual remediation required.",
            self.kind, self.symbol, self.open_leg, self.message
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Deliver a free-form operator message.
    async fn notify(&self, text: &str) -> Result<()>;

    async fn send(&self, alert: &BreachAlert) -> Result<()> {
        self.notify(&alert.render()).await
    }
}

/// Emit a breach and forward it to the operator.
pub async fn raise_breach(alerter: &dyn Alerter, breach: &FatalBreach, at: DateTime<Utc>) {
    let alert = BreachAlert::from_breach(breach, at);
    alert.emit();
    if let Err(e) = alerter.send(&alert).await {
        warn!(alert_id = %alert.alert_id, "Failed to deliver breach alert: {:#}", e);
    }
}

/// Forward an informational message; failures are only logged.
pub async fn notify_operator(alerter: &dyn Alerter, text: &str) {
    if let Err(e) = alerter.notify(text).await {
        warn!("Failed to deliver operator notice: {:#}", e);
    }
}

/// Log-only alerter used when no chat channel is configured.
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn notify(&self, text: &str) -> Result<()> {
        info!(target: "operator_notice", "{}", text);
        Ok(())
    }
}

/// Telegram Bot API `sendMessage` delivery.
pub struct TelegramAlerter {
    http: Client,
    bot_token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramAlerter {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        Self::with_base_url(bot_token, chat_id, TELEGRAM_API_URL)
    }

    pub fn with_base_url(bot_token: &str, chat_id: &str, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl Alerter for TelegramAlerter {
    async fn notify(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .context("Failed to reach Telegram")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram error {}: {}", status, body);
        }
        Ok(())
    }
}

/// Telegram when both token and chat id are configured, otherwise log only.
pub fn from_config(config: &AlertConfig) -> Result<Box<dyn Alerter>> {
    match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
            Ok(Box::new(TelegramAlerter::new(token, chat_id)?))
        }
        _ => Ok(Box::new(LogAlerter)),
    }
}
