//! Outreach configuration system.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutreachError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachConfig {
    /// Fixed UTC offset all schedules are evaluated in, e.g. "+08:00".
    /// Campaigns fire at operator wall-clock time, never implicit UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
}

fn default_timezone() -> String {
    "+08:00".into()
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            escalation: EscalationConfig::default(),
        }
    }
}

/// Scheduler runtime tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-task checks.
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on concurrently executing fired tasks.
    #[serde(default = "default_worker_pool")]
    pub worker_pool_size: usize,
    /// Max overlapping executions of one task.
    #[serde(default = "default_task_instances")]
    pub max_task_instances: usize,
}

fn default_tick_secs() -> u64 {
    30
}
fn default_worker_pool() -> usize {
    20
}
fn default_task_instances() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_secs(),
            worker_pool_size: default_worker_pool(),
            max_task_instances: default_task_instances(),
        }
    }
}

/// Batch dispatch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Failed entries are retried until retry_count reaches this ceiling.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Batches larger than this are queued and left for the drain pass
    /// instead of being delivered inline.
    #[serde(default = "default_async_threshold")]
    pub async_batch_threshold: usize,
    /// Max entries one drain pass picks up.
    #[serde(default = "default_drain_batch")]
    pub drain_batch_size: usize,
    /// Transport send timeout in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_retry_ceiling() -> u32 {
    3
}
fn default_async_threshold() -> usize {
    10
}
fn default_drain_batch() -> usize {
    50
}
fn default_send_timeout() -> u64 {
    30
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: default_retry_ceiling(),
            async_batch_threshold: default_async_threshold(),
            drain_batch_size: default_drain_batch(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// Operator escalation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Optional HTTP webhook the first failure of a run is posted to.
    /// When unset, escalations are logged only.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl OutreachConfig {
    /// Load config from the default path (~/.outreach/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OutreachError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| OutreachError::Config(format!("Failed to parse config: {e}")))?;
        config.tz_offset()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| OutreachError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Base data directory (~/.outreach).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outreach")
    }

    /// Default SQLite database path.
    pub fn db_path() -> PathBuf {
        Self::home_dir().join("outreach.db")
    }

    /// The configured schedule offset, parsed. "+08:00" and "-0530"
    /// forms are accepted.
    pub fn tz_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone)
            .ok_or_else(|| OutreachError::Config(format!("invalid timezone offset: {}", self.timezone)))
    }
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match *raw.as_bytes().first()? {
        b'+' => (1i32, &raw[1..]),
        b'-' => (-1i32, &raw[1..]),
        _ => (1i32, raw),
    };
    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (
            digits[..2].parse::<i32>().ok()?,
            digits[2..].parse::<i32>().ok()?,
        ),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OutreachConfig::default();
        assert_eq!(config.scheduler.worker_pool_size, 20);
        assert_eq!(config.dispatch.retry_ceiling, 3);
        assert_eq!(config.tz_offset().unwrap().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_offset_forms() {
        assert_eq!(
            parse_offset("+08:00").unwrap().local_minus_utc(),
            8 * 3600
        );
        assert_eq!(
            parse_offset("-0530").unwrap().local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert_eq!(parse_offset("0").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("+25:00").is_none());
        assert!(parse_offset("abc").is_none());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = OutreachConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: OutreachConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.timezone, config.timezone);
        assert_eq!(
            parsed.dispatch.async_batch_threshold,
            config.dispatch.async_batch_threshold
        );
    }
}
