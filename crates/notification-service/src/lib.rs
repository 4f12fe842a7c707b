mod discord;
mod templates;

pub use discord::DiscordChannel;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// Events the trading loop reports outward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertType {
    SignalOpened {
        symbol: String,
        side: String,
        entry: f64,
        stop: f64,
        take: f64,
        quantity: f64,
        confidence: f64,
        reason: String,
    },
    PositionExited {
        symbol: String,
        side: String,
        exit_price: f64,
        reason: String,
        pnl: f64,
    },
    PositionAdjusted {
        symbol: String,
        stop: f64,
        take: f64,
        risk_reward: f64,
        reason: String,
    },
    RegimeChanged {
        symbol: String,
        previous: Option<String>,
        current: String,
        confidence: f64,
    },
    Anomaly {
        event: String,
        severity: Severity,
        detail: String,
    },
    /// Observation-only notices: actions seen but not executed, holds.
    Watch {
        symbol: String,
        reason: String,
    },
    DailyReport {
        date: String,
        equity: f64,
        pnl_total: f64,
        trades: usize,
        win_rate: f64,
        /// `None` while no trade has closed at a loss.
        profit_factor: Option<f64>,
    },
}

/// A rendered notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(alert_type: AlertType) -> Self {
        let (title, message) = templates::render(&alert_type);
        Self {
            id: Uuid::new_v4(),
            alert_type,
            title,
            message,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Discord webhook error: {0}")]
    Discord(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No response within {0:?}")]
    Timeout(Duration),
}

/// Writes alerts to the tracing log.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        match &alert.alert_type {
            AlertType::Anomaly {
                severity: Severity::Critical | Severity::Warning,
                ..
            } => tracing::warn!("[alert] {}: {}", alert.title, alert.message),
            _ => tracing::info!("[alert] {}: {}", alert.title, alert.message),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Upper bound on a single channel send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `notify` waits for deliveries before leaving them in flight.
pub const DEFAULT_DELIVERY_WAIT: Duration = Duration::from_millis(100);

/// Fans alerts out to every configured channel.
///
/// Each send runs on its own task with a hard timeout. Callers wait at most
/// the delivery window; slower sends finish in the background. Delivery
/// failures are logged and never surface to the caller.
#[derive(Clone)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    send_timeout: Duration,
    delivery_wait: Duration,
}

impl Default for Notifier {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            delivery_wait: DEFAULT_DELIVERY_WAIT,
        }
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log channel plus Discord when a webhook URL is set.
    pub fn from_webhook(discord_webhook_url: &str) -> Self {
        let mut notifier = Self::new().with_channel(Arc::new(LogChannel));
        if !discord_webhook_url.trim().is_empty() {
            tracing::info!("Discord webhook notifications enabled");
            notifier = notifier.with_channel(Arc::new(DiscordChannel::new(discord_webhook_url)));
        }
        notifier
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn with_delivery_wait(mut self, delivery_wait: Duration) -> Self {
        self.delivery_wait = delivery_wait;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send to all channels concurrently and wait up to `wait`.
    /// Returns the number of deliveries confirmed within that window.
    pub async fn dispatch(&self, alert: &Alert, wait: Duration) -> usize {
        let alert = Arc::new(alert.clone());
        let sends: Vec<_> = self
            .channels
            .iter()
            .map(|channel| {
                let channel = Arc::clone(channel);
                let alert = Arc::clone(&alert);
                let limit = self.send_timeout;
                tokio::spawn(async move {
                    let outcome = match tokio::time::timeout(limit, channel.send(&alert)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(NotificationError::Timeout(limit)),
                    };
                    match &outcome {
                        Ok(()) => tracing::debug!("Sent notification via {}", channel.name()),
                        Err(e) => tracing::warn!(
                            "Failed to send notification via {}: {}",
                            channel.name(),
                            e
                        ),
                    }
                    outcome.is_ok()
                })
            })
            .collect();

        let deadline = tokio::time::Instant::now() + wait;
        let mut delivered = 0;
        for send in sends {
            match tokio::time::timeout_at(deadline, send).await {
                Ok(Ok(true)) => delivered += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::warn!("Notification task failed: {}", e),
                Err(_) => tracing::debug!("Notification {} still in flight", alert.id),
            }
        }
        delivered
    }

    pub async fn notify(&self, alert_type: AlertType) -> usize {
        self.dispatch(&Alert::new(alert_type), self.delivery_wait).await
    }

    /// Wait for every channel to finish or time out, e.g. before exit.
    pub async fn notify_and_wait(&self, alert_type: AlertType) -> usize {
        self.dispatch(&Alert::new(alert_type), self.send_timeout).await
    }
}
