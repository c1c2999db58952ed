//! # Session Context
//!
//! Everything derived at attach time, passed down explicitly to the world,
//! every worker and every entity constructor. There is no global "current
//! session": a new attach builds a new context and the old one (with its
//! addresses) is simply dropped.

use std::sync::Arc;

use umbra_memory::{ProcessId, RemoteAddress, RemoteMemory};

use crate::config::MirrorConfig;
use crate::entities::groups::RelationshipStore;
use crate::entities::quests::QuestCatalog;

/// Addresses resolved by one attach. Immutable once published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    /// Target process id.
    pub pid: ProcessId,
    /// Base of the anchor module.
    pub module_base: RemoteAddress,
    /// Object manager the world is discovered from.
    pub object_manager: RemoteAddress,
}

/// Per-attach handle threaded through the world mirror.
pub struct SessionContext {
    session: Session,
    memory: RemoteMemory,
    config: Arc<MirrorConfig>,
    catalog: Arc<QuestCatalog>,
    store: Arc<dyn RelationshipStore>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Bundles an attach result with the shared collaborators.
    #[must_use]
    pub fn new(
        session: Session,
        memory: RemoteMemory,
        config: Arc<MirrorConfig>,
        catalog: Arc<QuestCatalog>,
        store: Arc<dyn RelationshipStore>,
    ) -> Self {
        Self {
            session,
            memory,
            config,
            catalog,
            store,
        }
    }

    /// Resolved addresses.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Target process id.
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.session.pid
    }

    /// Raw access bound to the target process.
    #[must_use]
    pub const fn memory(&self) -> &RemoteMemory {
        &self.memory
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Quest catalog.
    #[must_use]
    pub fn catalog(&self) -> &QuestCatalog {
        &self.catalog
    }

    /// Group relationship persistence.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn RelationshipStore> {
        &self.store
    }
}
