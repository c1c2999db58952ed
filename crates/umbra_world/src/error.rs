//! # Mirror Error Types
//!
//! Everything that can stop a refresh cycle, a world or an attach attempt.
//!
//! Errors are classified by [`MirrorError::severity`]:
//!
//! | Severity      | Effect                                               |
//! |---------------|------------------------------------------------------|
//! | `Recoverable` | logged, the loop keeps running                       |
//! | `Fatal`       | the enclosing world is torn down                     |
//!
//! `WorldEnded` and `Cancelled` are fatal for the world but graceful: they
//! are expected control flow and are never logged as errors.

use thiserror::Error;
use umbra_core::Cancelled;
use umbra_memory::MemoryError;

use crate::config::ConfigError;

/// Guidance printed once when the acquisition channel cannot be opened.
pub const CHANNEL_TROUBLESHOOTING: &str = "\
troubleshooting:
  1. check the acquisition device is connected and powered
  2. check the driver is installed and matches the device firmware
  3. close other tools holding the device open
  4. restart the mirror after reconnecting";

/// Guidance printed once when the target process cannot be attached.
pub const ATTACH_TROUBLESHOOTING: &str = "\
troubleshooting:
  1. check the target process is running
  2. check `process_name` and `module_name` in the config
  3. check the acquisition channel can see the target machine";

/// Errors raised by the session lifecycle and the world mirror.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MirrorError {
    /// The acquisition channel is not present. Aborts startup.
    #[error("acquisition channel unavailable: {reason}\n{CHANNEL_TROUBLESHOOTING}")]
    ChannelUnavailable {
        /// Diagnostic reported by the channel.
        reason: String,
    },

    /// A remote read or write failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The target process is confirmed gone.
    #[error("target process is not running")]
    ProcessNotRunning,

    /// The target module could not be resolved.
    #[error("module '{0}' not found in target process")]
    ModuleNotFound(String),

    /// No world object is currently discoverable.
    #[error("world not found: {0}")]
    WorldNotFound(String),

    /// Raid end confirmed by repeated revalidation failure.
    #[error("world ended")]
    WorldEnded,

    /// Cooperative cancellation (restart or shutdown).
    #[error("cancelled")]
    Cancelled,

    /// A refresh loop or the lifecycle body panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// A scalar poke was requested with no attached session.
    #[error("no session attached")]
    NotAttached,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker '{name}': {reason}")]
    Spawn {
        /// Worker name.
        name: &'static str,
        /// OS error text.
        reason: String,
    },

    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How far an error propagates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Affects one value, entity or cycle.
    Recoverable,
    /// Ends the enclosing world instance.
    Fatal,
}

impl MirrorError {
    /// Classifies the error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Memory(e) if e.is_recoverable() => Severity::Recoverable,
            Self::ModuleNotFound(_) | Self::WorldNotFound(_) | Self::NotAttached => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    /// True for expected endings that are not logged as errors.
    #[must_use]
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::WorldEnded | Self::Cancelled)
    }
}

impl From<Cancelled> for MirrorError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result type for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use umbra_memory::RemoteAddress;

    use super::*;

    #[test]
    fn test_memory_failures_are_recoverable() {
        let e = MirrorError::from(MemoryError::InvalidAddress(RemoteAddress::NULL));
        assert_eq!(e.severity(), Severity::Recoverable);

        let e = MirrorError::from(MemoryError::ChannelUnavailable("gone".into()));
        assert_eq!(e.severity(), Severity::Fatal);
    }

    #[test]
    fn test_graceful_endings() {
        assert!(MirrorError::WorldEnded.is_graceful());
        assert!(MirrorError::from(Cancelled).is_graceful());
        assert!(!MirrorError::ProcessNotRunning.is_graceful());
        assert_eq!(MirrorError::ProcessNotRunning.severity(), Severity::Fatal);
    }

    #[test]
    fn test_channel_error_carries_guidance() {
        let e = MirrorError::ChannelUnavailable {
            reason: "no device".into(),
        };
        let text = e.to_string();
        assert!(text.contains("no device"));
        assert!(text.contains("troubleshooting"));
    }
}
