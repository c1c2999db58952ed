//! # Quest Tracking
//!
//! Outstanding quest items and quest locations of the local player.
//!
//! The remote side only knows which quests are started and which condition
//! ids are completed; what each objective asks for comes from a
//! [`QuestCatalog`] supplied by the data collaborator.
//!
//! ## Refresh
//!
//! 1. Read the profile's quest status list; keep entries whose status is
//!    `started_status` and whose id is in the catalog.
//! 2. Read each kept quest's completed condition ids.
//! 3. For every objective not completed and of a tracked kind:
//!    item objectives contribute their item id, zone objectives on the
//!    current map contribute a location keyed `quest:objective:zone`.
//! 4. Mark-and-sweep: anything not re-observed is dropped.
//!
//! Refreshes closer together than the configured interval are skipped. The
//! interval counts from the last refresh that read the profile successfully.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use umbra_core::{CancellationToken, Vec3};
use umbra_memory::{read_address_list, read_managed_string, RemoteAddress};

use crate::config::ConfigError;
use crate::context::SessionContext;
use crate::error::MirrorResult;

/// What an objective asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Unrecognized.
    #[default]
    Unknown,
    /// Find a quest item.
    FindQuestItem,
    /// Hand in a quest item.
    GiveQuestItem,
    /// Plant an item at a zone.
    PlantItem,
    /// Plant a quest item at a zone.
    PlantQuestItem,
    /// Assemble a weapon.
    BuildWeapon,
    /// Find an item in raid.
    FindItem,
    /// Hand in items.
    GiveItem,
    /// Visit a zone.
    Visit,
    /// Kill targets.
    Shoot,
    /// Reach a skill level.
    Skill,
    /// Extract from a raid.
    Extract,
    /// Mark a zone.
    Mark,
    /// Reach an experience level.
    Experience,
    /// Use an item.
    UseItem,
    /// Sell items.
    SellItem,
    /// Reach a trader level.
    TraderLevel,
    /// Depend on another quest.
    TaskStatus,
    /// Reach a trader standing.
    TraderStanding,
}

impl ObjectiveKind {
    /// False for kinds that have nothing to show in a raid.
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        !matches!(
            self,
            Self::BuildWeapon | Self::GiveQuestItem | Self::Extract | Self::Shoot | Self::TraderLevel | Self::GiveItem
        )
    }

    /// Kinds whose target is an item.
    #[must_use]
    pub const fn wants_item(self) -> bool {
        matches!(self, Self::FindQuestItem | Self::FindItem)
    }

    /// Kinds whose target is a zone.
    #[must_use]
    pub const fn wants_zone(self) -> bool {
        matches!(self, Self::Visit | Self::Mark | Self::PlantItem | Self::PlantQuestItem)
    }
}

/// A zone on a map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestZone {
    /// Zone id.
    pub id: String,
    /// Map the zone is on.
    pub map_id: String,
    /// Zone centre.
    pub position: Vec3,
}

/// One objective (condition) of a quest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestObjective {
    /// Condition id, matched against the completed set.
    pub id: String,
    /// What is asked.
    #[serde(default)]
    pub kind: ObjectiveKind,
    /// Target item id, for item objectives.
    #[serde(default)]
    pub item_id: Option<String>,
    /// Target zones, for zone objectives.
    #[serde(default)]
    pub zones: Vec<QuestZone>,
}

/// Static definition of a quest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestDefinition {
    /// Quest id as stored remotely.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Objectives.
    #[serde(default)]
    pub objectives: Vec<QuestObjective>,
}

/// Every quest the mirror knows about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuestCatalog {
    quests: HashMap<String, QuestDefinition>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "quest")]
    quests: Vec<QuestDefinition>,
}

impl QuestCatalog {
    /// Builds a catalog; later duplicates replace earlier ones.
    #[must_use]
    pub fn new(quests: impl IntoIterator<Item = QuestDefinition>) -> Self {
        Self {
            quests: quests.into_iter().map(|q| (q.id.clone(), q)).collect(),
        }
    }

    /// Parses `[[quest]]` tables.
    ///
    /// # Errors
    ///
    /// `Parse` on malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: CatalogFile = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self::new(file.quests))
    }

    /// Looks up a quest.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&QuestDefinition> {
        self.quests.get(id)
    }

    /// Number of quests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quests.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

/// An outstanding zone objective on the current map.
#[derive(Clone, Debug, PartialEq)]
pub struct QuestLocation {
    /// `quest:objective:zone`.
    pub key: String,
    /// Quest id.
    pub quest_id: String,
    /// Objective id.
    pub objective_id: String,
    /// Zone centre.
    pub position: Vec3,
}

/// A started quest as read from the profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuestProgress {
    /// Quest id.
    pub id: String,
    /// Completed condition ids.
    pub completed: HashSet<String>,
}

/// What to show for the given progress on `map_id`.
#[must_use]
pub fn outstanding(
    catalog: &QuestCatalog,
    progress: &[QuestProgress],
    map_id: &str,
) -> (HashSet<String>, HashMap<String, QuestLocation>) {
    let mut items = HashSet::new();
    let mut locations = HashMap::new();

    for quest in progress {
        let Some(definition) = catalog.get(&quest.id) else {
            continue;
        };
        for objective in &definition.objectives {
            if quest.completed.contains(&objective.id) || !objective.kind.is_tracked() {
                continue;
            }
            if objective.kind.wants_item() {
                if let Some(item) = &objective.item_id {
                    items.insert(item.clone());
                }
            }
            if objective.kind.wants_zone() {
                for zone in objective.zones.iter().filter(|z| z.map_id == map_id) {
                    let key = format!("{}:{}:{}", quest.id, objective.id, zone.id);
                    locations.insert(
                        key.clone(),
                        QuestLocation {
                            key,
                            quest_id: quest.id.clone(),
                            objective_id: objective.id.clone(),
                            position: zone.position,
                        },
                    );
                }
            }
        }
    }
    (items, locations)
}

#[derive(Debug, Default)]
struct TrackerState {
    last_refresh: Option<Instant>,
    started: HashSet<String>,
    items: HashSet<String>,
    locations: HashMap<String, QuestLocation>,
}

/// Quest state of the local player in one world.
#[derive(Debug)]
pub struct QuestTracker {
    ctx: Arc<SessionContext>,
    map_id: String,
    interval: Duration,
    state: Mutex<TrackerState>,
}

impl QuestTracker {
    /// Tracker for `map_id`.
    #[must_use]
    pub fn new(ctx: Arc<SessionContext>, map_id: String) -> Self {
        let interval = ctx.config().cadence.quest_refresh();
        Self {
            ctx,
            map_id,
            interval,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Refreshes from the local player's profile. Returns false if skipped
    /// by the rate limit.
    ///
    /// # Errors
    ///
    /// A failed read of the profile or the status list, or `Cancelled`
    /// between quest entries. Neither counts against the rate limit.
    pub fn refresh(&self, local: RemoteAddress, token: &CancellationToken) -> MirrorResult<bool> {
        if self
            .state
            .lock()
            .last_refresh
            .is_some_and(|at| at.elapsed() < self.interval)
        {
            return Ok(false);
        }

        let progress = self.read_progress(local, token)?;
        let (items, locations) = outstanding(self.ctx.catalog(), &progress, &self.map_id);

        let mut state = self.state.lock();
        state.last_refresh = Some(Instant::now());
        state.started = progress.into_iter().map(|q| q.id).collect();
        state.items.retain(|item| items.contains(item));
        state.items.extend(items);
        state.locations.retain(|key, _| locations.contains_key(key));
        for (key, location) in locations {
            state.locations.entry(key).or_insert(location);
        }
        trace!(
            started = state.started.len(),
            items = state.items.len(),
            locations = state.locations.len(),
            "quests refreshed"
        );
        Ok(true)
    }

    fn read_progress(&self, local: RemoteAddress, token: &CancellationToken) -> MirrorResult<Vec<QuestProgress>> {
        let memory = self.ctx.memory();
        let config = self.ctx.config();
        let layout = &config.layout;
        let quests = &layout.quests;

        let list = memory.read_ptr_chain(local, &[layout.actor.profile_offset, quests.data_offset], false)?;
        let entries = read_address_list(memory, list, &layout.list, config.limits.max_quests, false)?;

        let mut progress = Vec::new();
        for entry in entries {
            token.check()?;
            let status = match memory.read::<i32>(entry.offset(quests.status_offset), false) {
                Ok(status) => status,
                Err(e) => {
                    trace!(entry = %entry, "quest status unreadable: {e}");
                    continue;
                }
            };
            if status != quests.started_status {
                continue;
            }
            let id = match memory
                .read_ptr(entry.offset(quests.id_offset), true)
                .and_then(|id| read_managed_string(memory, id, &layout.string, true))
            {
                Ok(id) => id,
                Err(e) => {
                    trace!(entry = %entry, "quest id unreadable: {e}");
                    continue;
                }
            };
            if self.ctx.catalog().get(&id).is_none() {
                continue;
            }
            let completed = self.read_completed(entry).unwrap_or_else(|e| {
                debug!(quest = id.as_str(), "completed conditions unreadable: {e}");
                HashSet::new()
            });
            progress.push(QuestProgress { id, completed });
        }
        Ok(progress)
    }

    fn read_completed(&self, entry: RemoteAddress) -> MirrorResult<HashSet<String>> {
        let memory = self.ctx.memory();
        let config = self.ctx.config();
        let layout = &config.layout;
        let list = memory.read_ptr(entry.offset(layout.quests.completed_offset), false)?;
        let ids = read_address_list(memory, list, &layout.list, config.limits.max_conditions, false)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| read_managed_string(memory, id, &layout.string, true).ok())
            .collect())
    }

    /// Map the tracker filters zones by.
    #[must_use]
    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    /// Started quest ids known to the catalog.
    #[must_use]
    pub fn started(&self) -> HashSet<String> {
        self.state.lock().started.clone()
    }

    /// Outstanding item ids.
    #[must_use]
    pub fn items(&self) -> HashSet<String> {
        self.state.lock().items.clone()
    }

    /// Outstanding locations on this map.
    #[must_use]
    pub fn locations(&self) -> Vec<QuestLocation> {
        self.state.lock().locations.values().cloned().collect()
    }
}
