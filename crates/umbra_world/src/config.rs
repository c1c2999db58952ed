//! # Mirror Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid config:
//!
//! ```toml
//! process_name = "target.exe"
//! module_name = "runtime.dll"
//!
//! [cadence]
//! realtime_ms = 8
//! slow_ms = 50
//!
//! [grouping]
//! threshold = 10.0
//!
//! [layout.actor]
//! corpse_offset = 0x680
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use umbra_core::DEFAULT_GROUP_THRESHOLD;

use crate::layout::RemoteLayout;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config '{path}': {reason}")]
    Io {
        /// Path that was read.
        path: String,
        /// OS error text.
        reason: String,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid config value '{field}': {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Loop cadences, all in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Fast positional loop.
    pub realtime_ms: u64,
    /// Slow bookkeeping loop.
    pub slow_ms: u64,
    /// Explosives loop.
    pub explosives_ms: u64,
    /// Lifecycle monitor while in a world.
    pub monitor_ms: u64,
    /// Backoff between failed attach attempts.
    pub attach_backoff_ms: u64,
    /// Poll interval while waiting for a world object.
    pub world_poll_ms: u64,
    /// Sleep of the fast loop when nothing is active.
    pub idle_ms: u64,
    /// Pause after a world is torn down.
    pub teardown_ms: u64,
    /// Minimum interval between quest refreshes.
    pub quest_refresh_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            realtime_ms: 8,
            slow_ms: 50,
            explosives_ms: 30,
            monitor_ms: 133,
            attach_backoff_ms: 1000,
            world_poll_ms: 1000,
            idle_ms: 1,
            teardown_ms: 100,
            quest_refresh_ms: 1000,
        }
    }
}

impl CadenceConfig {
    /// Fast loop interval.
    #[must_use]
    pub const fn realtime(&self) -> Duration {
        Duration::from_millis(self.realtime_ms)
    }

    /// Slow loop interval.
    #[must_use]
    pub const fn slow(&self) -> Duration {
        Duration::from_millis(self.slow_ms)
    }

    /// Explosives loop interval.
    #[must_use]
    pub const fn explosives(&self) -> Duration {
        Duration::from_millis(self.explosives_ms)
    }

    /// Lifecycle monitor interval.
    #[must_use]
    pub const fn monitor(&self) -> Duration {
        Duration::from_millis(self.monitor_ms)
    }

    /// Attach retry backoff.
    #[must_use]
    pub const fn attach_backoff(&self) -> Duration {
        Duration::from_millis(self.attach_backoff_ms)
    }

    /// World discovery poll interval.
    #[must_use]
    pub const fn world_poll(&self) -> Duration {
        Duration::from_millis(self.world_poll_ms)
    }

    /// Idle sleep of the fast loop.
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    /// Post-teardown pause.
    #[must_use]
    pub const fn teardown(&self) -> Duration {
        Duration::from_millis(self.teardown_ms)
    }

    /// Quest refresh rate limit.
    #[must_use]
    pub const fn quest_refresh(&self) -> Duration {
        Duration::from_millis(self.quest_refresh_ms)
    }
}

/// Bounded retry budgets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed revalidations before a raid is declared ended.
    pub raid_check_attempts: u32,
    /// Pause between revalidation attempts (ms).
    pub raid_check_delay_ms: u64,
    /// Failed lookups before the process is declared gone.
    pub process_check_attempts: u32,
    /// Pause between process lookups (ms).
    pub process_check_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            raid_check_attempts: 5,
            raid_check_delay_ms: 50,
            process_check_attempts: 5,
            process_check_delay_ms: 150,
        }
    }
}

impl RetryConfig {
    /// Pause between revalidation attempts.
    #[must_use]
    pub const fn raid_check_delay(&self) -> Duration {
        Duration::from_millis(self.raid_check_delay_ms)
    }

    /// Pause between process lookups.
    #[must_use]
    pub const fn process_check_delay(&self) -> Duration {
        Duration::from_millis(self.process_check_delay_ms)
    }
}

/// Proximity grouping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Run grouping in the slow loop.
    pub enabled: bool,
    /// Clustering distance.
    pub threshold: f32,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_GROUP_THRESHOLD,
        }
    }
}

/// Ceilings on remote counts. A torn header never sizes a transfer past these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Registered actors per world.
    pub max_actors: usize,
    /// Grenades, synchronizable objects and loot per list.
    pub max_objects: usize,
    /// Quest status entries.
    pub max_quests: usize,
    /// Completed conditions per quest.
    pub max_conditions: usize,
    /// Equipment items per actor.
    pub max_equipment: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_actors: 256,
            max_objects: 4096,
            max_quests: 512,
            max_conditions: 512,
            max_equipment: 64,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Executable name of the target process.
    pub process_name: String,
    /// Module whose base anchors the object manager.
    pub module_name: String,
    /// Maps a world may report; empty accepts any non-empty id.
    pub known_maps: Vec<String>,
    /// How long dead actors stay tracked (ms).
    pub corpse_retention_ms: u64,
    /// Per-subscriber lifecycle event buffer.
    pub event_buffer: usize,
    /// Loop cadences.
    pub cadence: CadenceConfig,
    /// Retry budgets.
    pub retry: RetryConfig,
    /// Grouping.
    pub grouping: GroupingConfig,
    /// Count ceilings.
    pub limits: LimitsConfig,
    /// Remote offsets.
    pub layout: RemoteLayout,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            process_name: "target.exe".to_owned(),
            module_name: "runtime.dll".to_owned(),
            known_maps: Vec::new(),
            corpse_retention_ms: 60_000,
            event_buffer: 64,
            cadence: CadenceConfig::default(),
            retry: RetryConfig::default(),
            grouping: GroupingConfig::default(),
            limits: LimitsConfig::default(),
            layout: RemoteLayout::default(),
        }
    }
}

impl MirrorConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `Parse` on malformed TOML, `Invalid` on out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`MirrorConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes back to TOML.
    ///
    /// # Errors
    ///
    /// `Parse` if a value cannot be represented.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Dead actor retention.
    #[must_use]
    pub const fn corpse_retention(&self) -> Duration {
        Duration::from_millis(self.corpse_retention_ms)
    }

    /// Rejects values that would stall or spin a loop.
    ///
    /// # Errors
    ///
    /// `Invalid` naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        fn require(ok: bool, field: &'static str, reason: &'static str) -> ConfigResult<()> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason })
            }
        }

        require(!self.process_name.is_empty(), "process_name", "must not be empty")?;
        require(!self.module_name.is_empty(), "module_name", "must not be empty")?;
        require(self.event_buffer > 0, "event_buffer", "must be positive")?;

        let cadence = &self.cadence;
        for (value, field) in [
            (cadence.realtime_ms, "cadence.realtime_ms"),
            (cadence.slow_ms, "cadence.slow_ms"),
            (cadence.explosives_ms, "cadence.explosives_ms"),
            (cadence.monitor_ms, "cadence.monitor_ms"),
            (cadence.attach_backoff_ms, "cadence.attach_backoff_ms"),
            (cadence.world_poll_ms, "cadence.world_poll_ms"),
            (cadence.idle_ms, "cadence.idle_ms"),
        ] {
            require(value > 0, field, "interval must be positive")?;
        }

        require(self.retry.raid_check_attempts > 0, "retry.raid_check_attempts", "must be positive")?;
        require(
            self.retry.process_check_attempts > 0,
            "retry.process_check_attempts",
            "must be positive",
        )?;
        require(
            self.grouping.threshold.is_finite() && self.grouping.threshold > 0.0,
            "grouping.threshold",
            "must be a positive distance",
        )?;
        require(self.limits.max_actors > 0, "limits.max_actors", "must be positive")?;
        require(self.layout.objects.max_scan > 0, "layout.objects.max_scan", "must be positive")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = MirrorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MirrorConfig::default());
        assert_eq!(config.cadence.realtime(), Duration::from_millis(8));
        assert_eq!(config.retry.raid_check_attempts, 5);
        assert!((config.grouping.threshold - 10.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_overrides() {
        let config = MirrorConfig::from_toml_str(
            r#"
            process_name = "other.exe"
            known_maps = ["factory", "woods"]

            [cadence]
            slow_ms = 75

            [layout.quests]
            started_status = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.process_name, "other.exe");
        assert_eq!(config.known_maps.len(), 2);
        assert_eq!(config.cadence.slow(), Duration::from_millis(75));
        assert_eq!(config.cadence.realtime_ms, 8);
        assert_eq!(config.layout.quests.started_status, 3);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = MirrorConfig::from_toml_str("[cadence]\nrealtime_ms = 0\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                field: "cadence.realtime_ms",
                reason: "interval must be positive",
            }
        );
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let err = MirrorConfig::from_toml_str("[retry]\nraid_check_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "retry.raid_check_attempts", .. }));
    }

    #[test]
    fn test_parse_error() {
        let err = MirrorConfig::from_toml_str("process_name = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = MirrorConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(MirrorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = MirrorConfig::load("/nonexistent/umbra.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
