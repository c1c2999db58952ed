use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle state.
///
/// ```text
/// Disconnected ──▶ Attaching ──▶ Attached ──▶ InWorld ──▶ Ending
///      ▲               ▲                                    │
///      │               └────────────────────────────────────┘
///      └──────────── process gone (from any state)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// No target process.
    Disconnected = 0,
    /// Looking for the process and resolving its module.
    Attaching = 1,
    /// Module resolved; waiting for a world.
    Attached = 2,
    /// A world is mirrored and its loops run.
    InWorld = 3,
    /// Tearing the world down.
    Ending = 4,
}

impl SessionState {
    /// Decodes a stored discriminant; unknown values read as `Disconnected`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Attaching,
            2 => Self::Attached,
            3 => Self::InWorld,
            4 => Self::Ending,
            _ => Self::Disconnected,
        }
    }

    /// True while session addresses are valid.
    #[must_use]
    pub const fn is_attached(self) -> bool {
        matches!(self, Self::Attached | Self::InWorld | Self::Ending)
    }
}

/// Lock-free cell holding the current state.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `to` and returns the previous state.
    pub(crate) fn swap(&self, to: SessionState) -> SessionState {
        SessionState::from_u8(self.0.swap(to as u8, Ordering::AcqRel))
    }
}
