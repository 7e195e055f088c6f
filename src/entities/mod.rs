//! Entity model: Suite, Experiment, Simulation.
//!
//! The three kinds form a strict containment hierarchy. A suite exclusively
//! owns its experiments and an experiment its simulations; children carry a
//! `parent_id` back-pointer instead of an owning reference, so there are no
//! reference cycles. The same entity may be viewed through several platform
//! handles but exists once.

pub mod task;

use crate::assets::AssetCollection;
use crate::ids::{EntityId, TagMap};
use crate::platform::Platform;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use task::Task;

/// Unified entity state all backends map into.
///
/// `Succeeded` and `Failed` are terminal; transitions are monotone on a
/// single entity, so an observed terminal state never changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    #[default]
    Created,
    Running,
    Succeeded,
    Failed,
}

impl EntityStatus {
    /// True for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityStatus::Succeeded | EntityStatus::Failed)
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityStatus::Created => "CREATED",
            EntityStatus::Running => "RUNNING",
            EntityStatus::Succeeded => "SUCCEEDED",
            EntityStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Entity kind marker used in metadata and directory prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Suite,
    Experiment,
    Simulation,
}

impl ItemType {
    /// Directory prefix used when an entity has no name.
    pub fn dir_prefix(&self) -> &'static str {
        match self {
            ItemType::Suite => "Suite",
            ItemType::Experiment => "Experiment",
            ItemType::Simulation => "Simulation",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_prefix())
    }
}

/// A two-argument creation hook `(entity, platform)`.
///
/// Hooks run in insertion order; the first error aborts creation of the
/// owning entity and surfaces as [`Error::HookFailure`]. The two-argument
/// shape is enforced by the type, so there is no runtime signature check.
pub type CreationHook<E> = Arc<dyn Fn(&mut E, &dyn Platform) -> Result<()> + Send + Sync>;

/// Ordered hook lists for one entity type.
pub struct HookSet<E> {
    hooks: Vec<CreationHook<E>>,
}

impl<E> HookSet<E> {
    /// Register a hook at the end of the list.
    pub fn add(&mut self, hook: CreationHook<E>) {
        self.hooks.push(hook);
    }

    /// Snapshot of the hooks for execution.
    ///
    /// Callers clone the list before running so a hook can mutate the
    /// entity the set lives on.
    pub fn snapshot(&self) -> Vec<CreationHook<E>> {
        self.hooks.clone()
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True when no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl<E> Default for HookSet<E> {
    fn default() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl<E> Clone for HookSet<E> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<E> fmt::Debug for HookSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookSet({} hooks)", self.hooks.len())
    }
}

macro_rules! entity_common {
    ($ty:ty) => {
        impl $ty {
            /// The assigned id, if the entity has been persisted.
            pub fn id(&self) -> Option<&EntityId> {
                self.id.as_ref()
            }

            /// Assign an id exactly once.
            ///
            /// Ids are immutable after first persistence; a second
            /// assignment fails with [`Error::IdReassigned`].
            pub fn assign_id(&mut self, id: EntityId) -> Result<()> {
                if let Some(existing) = &self.id {
                    return Err(Error::IdReassigned(existing.to_string()));
                }
                self.id = Some(id);
                Ok(())
            }

            /// Assign a freshly issued id if none exists, returning it.
            pub fn ensure_id(&mut self) -> EntityId {
                if self.id.is_none() {
                    self.id = Some(EntityId::generate());
                }
                self.id.clone().unwrap_or_else(EntityId::generate)
            }

            /// Apply a status observation, honoring terminal monotonicity.
            ///
            /// Returns true when the status actually changed. Once an
            /// entity is terminal, further observations are ignored.
            pub fn update_status(&mut self, status: EntityStatus) -> bool {
                if self.status.is_terminal() || self.status == status {
                    return false;
                }
                self.status = status;
                self.status_changed_at = Some(Utc::now());
                true
            }
        }

        // Entities with the same id compare equal regardless of transient
        // fields (hooks, assets, children). Before persistence there is no
        // id, so equality falls back to the durable fields.
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                match (&self.id, &other.id) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => {
                        self.name == other.name
                            && self.tags == other.tags
                            && self.status == other.status
                    }
                    _ => false,
                }
            }
        }
    };
}

/// Top-level container grouping experiments.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    /// Assigned on first persistence.
    pub(crate) id: Option<EntityId>,
    /// Optional display name; sanitized into the directory name.
    pub name: Option<String>,
    /// Tags carried into metadata.
    pub tags: TagMap,
    /// Unified state.
    pub status: EntityStatus,
    /// Last status transition time.
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Owned experiments.
    pub experiments: Vec<Experiment>,
    /// Hooks run before the backend sees the suite.
    pub pre_creation_hooks: HookSet<Suite>,
    /// Hooks run after the backend acknowledges the suite.
    pub post_creation_hooks: HookSet<Suite>,
}

entity_common!(Suite);

impl Suite {
    /// Create an unnamed suite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named suite.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Attach an experiment, setting its parent pointer.
    pub fn add_experiment(&mut self, mut experiment: Experiment) {
        experiment.parent_id = self.id.clone();
        self.experiments.push(experiment);
    }
}

/// A parameter sweep over one base task: the unit users run.
#[derive(Debug, Clone, Default)]
pub struct Experiment {
    /// Assigned on first persistence.
    pub(crate) id: Option<EntityId>,
    /// Optional display name; sanitized into the directory name.
    pub name: Option<String>,
    /// Owning suite id, when attached to a suite.
    pub parent_id: Option<EntityId>,
    /// Tags carried into metadata.
    pub tags: TagMap,
    /// Unified state.
    pub status: EntityStatus,
    /// Last status transition time.
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Common assets shared by every child simulation.
    pub assets: AssetCollection,
    /// Owned simulations.
    pub simulations: Vec<Simulation>,
    /// Hooks run before the backend sees the experiment.
    pub pre_creation_hooks: HookSet<Experiment>,
    /// Hooks run after the backend acknowledges the experiment.
    pub post_creation_hooks: HookSet<Experiment>,
}

entity_common!(Experiment);

impl Experiment {
    /// Create an unnamed experiment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named experiment.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Attach a simulation, setting its parent pointer.
    pub fn add_simulation(&mut self, mut simulation: Simulation) {
        simulation.parent_id = self.id.clone();
        self.simulations.push(simulation);
    }

    /// Terminal roll-up: `Succeeded` iff all children succeeded, `Failed`
    /// otherwise. `None` while any child is non-terminal or none exist.
    pub fn aggregate_status(&self) -> Option<EntityStatus> {
        if self.simulations.is_empty() {
            return None;
        }
        if self.simulations.iter().any(|s| !s.status.is_terminal()) {
            return None;
        }
        if self
            .simulations
            .iter()
            .all(|s| s.status == EntityStatus::Succeeded)
        {
            Some(EntityStatus::Succeeded)
        } else {
            Some(EntityStatus::Failed)
        }
    }
}

/// One fully-parameterized execution of a task.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Assigned on first persistence.
    pub(crate) id: Option<EntityId>,
    /// Optional display name; sanitized into the directory name.
    pub name: Option<String>,
    /// Owning experiment id.
    pub parent_id: Option<EntityId>,
    /// Tags; sweep callbacks merge theirs in expansion order.
    pub tags: TagMap,
    /// Unified state.
    pub status: EntityStatus,
    /// Last status transition time.
    pub status_changed_at: Option<DateTime<Utc>>,
    /// The task this simulation executes.
    pub task: Task,
    /// Per-simulation assets, in addition to the experiment's common set.
    pub assets: AssetCollection,
    /// Hooks run before the backend sees the simulation.
    pub pre_creation_hooks: HookSet<Simulation>,
    /// Hooks run after the backend acknowledges the simulation.
    pub post_creation_hooks: HookSet<Simulation>,
}

entity_common!(Simulation);

impl Simulation {
    /// Create a simulation around a task.
    pub fn new(task: Task) -> Self {
        Self {
            id: None,
            name: None,
            parent_id: None,
            tags: TagMap::new(),
            status: EntityStatus::Created,
            status_changed_at: None,
            task,
            assets: AssetCollection::new(),
            pre_creation_hooks: HookSet::default(),
            post_creation_hooks: HookSet::default(),
        }
    }

    /// Merge callback-produced tags; later keys overwrite earlier ones.
    pub fn merge_tags(&mut self, tags: TagMap) {
        for (k, v) in tags {
            self.tags.insert(k, v);
        }
    }
}

/// Run an entity's pre-creation hooks against a platform.
///
/// The list is snapshotted first so hooks may mutate the entity (including
/// its hook sets) without aliasing.
pub fn run_hooks<E>(
    hooks: Vec<CreationHook<E>>,
    entity: &mut E,
    entity_id: &str,
    platform: &dyn Platform,
) -> Result<()> {
    for hook in hooks {
        hook(entity, platform).map_err(|e| Error::HookFailure {
            entity_id: entity_id.to_string(),
            platform: platform.name().to_string(),
            cause: e.to_string(),
        })?;
    }
    Ok(())
}
