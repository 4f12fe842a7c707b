use async_trait::async_trait;

use crate::{Alert, AlertType, NotificationChannel, NotificationError, Severity};

/// Discord webhook channel. An empty URL turns sends into no-ops.
pub struct DiscordChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordChannel {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::builder()
                .timeout(crate::DEFAULT_SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.webhook_url.trim().is_empty()
    }
}

fn embed_color(alert_type: &AlertType) -> u32 {
    match alert_type {
        AlertType::SignalOpened { side, .. } => {
            if side == "long" {
                0x00ff00
            } else {
                0xff0000
            }
        }
        AlertType::PositionExited { pnl, .. } | AlertType::DailyReport { pnl_total: pnl, .. } => {
            if *pnl >= 0.0 {
                0x00ff00
            } else {
                0xff0000
            }
        }
        AlertType::PositionAdjusted { .. } => 0x0099ff,
        AlertType::RegimeChanged { .. } => 0x9b59b6,
        AlertType::Anomaly { severity, .. } => match severity {
            Severity::Critical => 0xff0000,
            Severity::Warning => 0xff6600,
            Severity::Info => 0xaaaaaa,
        },
        AlertType::Watch { .. } => 0xffcc00,
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        if !self.is_configured() {
            tracing::debug!("Discord webhook not configured, skipping '{}'", alert.title);
            return Ok(());
        }

        let payload = serde_json::json!({
            "embeds": [{
                "title": alert.title,
                "description": alert.message,
                "color": embed_color(&alert.alert_type),
                "timestamp": alert.created_at.to_rfc3339(),
            }]
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Discord(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Discord(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}
