use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const KEY_SAFE_MODE: &str = "safe_mode";
pub const KEY_SOURCE_FAILOVER: &str = "source_failover";
pub const KEY_POSITIONS: &str = "positions";
pub const KEY_PAPER_BROKER: &str = "paper_broker";
pub const KEY_AGENT_METRICS: &str = "agent_metrics";
pub const KEY_LAST_REPORT_DATE: &str = "last_report_date";
pub const KEY_LLM_USAGE: &str = "llm_usage";

/// Key-value state that survives restarts.
#[derive(Clone)]
pub struct StateManager {
    pub(crate) db_pool: sqlx::AnyPool,
}

impl StateManager {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Save a state key-value pair.
    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Load a state value by key.
    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.save_state(key, &json).await
    }

    /// Load and decode a JSON value. A stored value that no longer decodes is an error.
    pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.load_state(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt persisted state for '{}'", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::any::AnyPoolOptions;

    use super::*;
    use crate::safe_mode::SafeModeState;

    async fn state_manager() -> StateManager {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let state = StateManager::new(pool);
        state.init_tables().await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_save_state_upserts() {
        let state = state_manager().await;
        assert_eq!(state.load_state("k").await.unwrap(), None);
        state.save_state("k", "one").await.unwrap();
        state.save_state("k", "two").await.unwrap();
        assert_eq!(state.load_state("k").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_json_round_trip_and_corruption() {
        let state = state_manager().await;
        let saved = SafeModeState {
            date: None,
            consecutive_stop_losses: 2,
            active: false,
        };
        state.save_json(KEY_SAFE_MODE, &saved).await.unwrap();
        let loaded: Option<SafeModeState> = state.load_json(KEY_SAFE_MODE).await.unwrap();
        assert_eq!(loaded, Some(saved));

        state.save_state(KEY_SAFE_MODE, "{not json").await.unwrap();
        assert!(state.load_json::<SafeModeState>(KEY_SAFE_MODE).await.is_err());
    }
}
