use std::fmt;

use notification_service::Severity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    #[default]
    Primary,
    Backup,
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceRole::Primary => "primary",
            SourceRole::Backup => "backup",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Consecutive failures before a source counts as down.
    pub fail_threshold: u32,
    /// Consecutive successful primary probes before switching back.
    pub recover_threshold: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 3,
            recover_threshold: 5,
        }
    }
}

/// Persisted failover counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailoverState {
    pub active: SourceRole,
    pub primary_failures: u32,
    pub backup_failures: u32,
    pub recovery_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverEvent {
    SwitchedToBackup,
    PrimaryDownNoBackup,
    BackupDown,
    RecoveredToPrimary,
}

impl FailoverEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverEvent::SwitchedToBackup => "switched_to_backup",
            FailoverEvent::PrimaryDownNoBackup => "primary_down_no_backup",
            FailoverEvent::BackupDown => "backup_down",
            FailoverEvent::RecoveredToPrimary => "recovered_to_primary",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            FailoverEvent::SwitchedToBackup => Severity::Warning,
            FailoverEvent::PrimaryDownNoBackup | FailoverEvent::BackupDown => Severity::Critical,
            FailoverEvent::RecoveredToPrimary => Severity::Info,
        }
    }
}

impl fmt::Display for FailoverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary/backup source selection driven by consecutive failure counts.
#[derive(Debug, Clone)]
pub struct SourceFailover {
    config: FailoverConfig,
    state: FailoverState,
    has_backup: bool,
}

impl SourceFailover {
    pub fn new(config: FailoverConfig, has_backup: bool) -> Self {
        Self {
            config,
            state: FailoverState::default(),
            has_backup,
        }
    }

    /// Resume from persisted counters. A saved backup role without a
    /// configured backup falls back to primary.
    pub fn restore(&mut self, state: FailoverState) {
        self.state = state;
        if !self.has_backup && self.state.active == SourceRole::Backup {
            tracing::warn!("Persisted failover state points at backup but none is configured");
            self.state = FailoverState::default();
        }
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    pub fn active(&self) -> SourceRole {
        self.state.active
    }

    pub fn is_on_backup(&self) -> bool {
        self.state.active == SourceRole::Backup
    }

    pub fn record_failure(&mut self, role: SourceRole) -> Option<FailoverEvent> {
        match role {
            SourceRole::Primary => {
                self.state.primary_failures += 1;
                self.state.recovery_streak = 0;
                if self.state.active != SourceRole::Primary
                    || self.state.primary_failures != self.config.fail_threshold
                {
                    return None;
                }
                if self.has_backup {
                    self.state.active = SourceRole::Backup;
                    self.state.backup_failures = 0;
                    tracing::warn!(
                        "Primary source failed {} times, switching to backup",
                        self.state.primary_failures
                    );
                    Some(FailoverEvent::SwitchedToBackup)
                } else {
                    tracing::error!(
                        "Primary source failed {} times and no backup is configured",
                        self.state.primary_failures
                    );
                    Some(FailoverEvent::PrimaryDownNoBackup)
                }
            }
            SourceRole::Backup => {
                self.state.backup_failures += 1;
                if self.state.backup_failures == self.config.fail_threshold {
                    tracing::error!(
                        "Backup source failed {} times",
                        self.state.backup_failures
                    );
                    Some(FailoverEvent::BackupDown)
                } else {
                    None
                }
            }
        }
    }

    pub fn record_success(&mut self, role: SourceRole) {
        match role {
            SourceRole::Primary => {
                self.state.primary_failures = 0;
                self.state.recovery_streak = 0;
            }
            SourceRole::Backup => self.state.backup_failures = 0,
        }
    }

    /// Outcome of a health probe against primary while running on backup.
    pub fn record_probe(&mut self, ok: bool) -> Option<FailoverEvent> {
        if !self.is_on_backup() {
            return None;
        }
        if !ok {
            self.state.recovery_streak = 0;
            return None;
        }
        self.state.recovery_streak += 1;
        tracing::info!(
            "Primary probe ok ({}/{})",
            self.state.recovery_streak,
            self.config.recover_threshold
        );
        if self.state.recovery_streak < self.config.recover_threshold {
            return None;
        }
        self.state = FailoverState::default();
        tracing::info!("Primary source recovered, switching back");
        Some(FailoverEvent::RecoveredToPrimary)
    }
}
