//! Platform abstraction: a uniform capability set over heterogeneous
//! execution backends.
//!
//! A platform is the sum of per-entity operation traits (`SuiteOps`,
//! `ExperimentOps`, `SimulationOps`, `AssetOps`, `MetadataOps`). Callers
//! only ever see the unified entity model through these traits; raw backend
//! records are opt-in via the `raw` flag on `get`.

pub mod container;
pub mod file;
pub mod layout;
pub mod remote;
pub mod slurm;

use crate::assets::Asset;
use crate::entities::{run_hooks, EntityStatus, Experiment, ItemType, Simulation, Suite};
use crate::ids::{EntityId, TagQuery};
use crate::status::{wait_on_experiment, WaitOutcome};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// A backend record for one entity.
///
/// `raw` carries the backend-native payload only when explicitly requested;
/// the uniform fields are enough for all cross-backend callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRecord {
    /// Canonical entity id.
    pub id: EntityId,
    /// Entity kind.
    pub item_type: ItemType,
    /// Unified status as last observed by the backend.
    pub status: EntityStatus,
    /// Backend-native payload; `Null` unless `raw` access was requested.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Suite operations.
pub trait SuiteOps {
    /// Persist a suite; idempotent for an already-assigned id.
    fn create_suite(&self, suite: &mut Suite) -> Result<EntityId>;

    /// Fetch the backend record; `raw` opts into the native payload.
    fn get_suite(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord>;

    /// Delete the suite record and everything it owns.
    fn delete_suite(&self, id: &EntityId) -> Result<()>;
}

/// Experiment operations.
pub trait ExperimentOps {
    /// Persist an experiment and its common assets.
    ///
    /// Common assets must be durable before any child simulation is
    /// commissioned.
    fn create_experiment(&self, experiment: &mut Experiment) -> Result<EntityId>;

    /// Fetch the backend record; `raw` opts into the native payload.
    fn get_experiment(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord>;

    /// Ask the backend to begin executing all of the experiment's
    /// simulations, in sweep-expansion order.
    fn run_experiment(&self, experiment: &mut Experiment) -> Result<()>;

    /// Best-effort cancellation.
    fn cancel_experiment(&self, experiment: &mut Experiment, force: bool) -> Result<()>;

    /// Poll the backend and update the experiment and its descendants.
    fn refresh_experiment_status(&self, experiment: &mut Experiment) -> Result<()>;

    /// Delete the experiment record and its tree.
    fn delete_experiment(&self, id: &EntityId) -> Result<()>;
}

/// Simulation operations.
pub trait SimulationOps {
    /// Persist one simulation under its experiment.
    fn create_simulation(
        &self,
        experiment: &Experiment,
        simulation: &mut Simulation,
    ) -> Result<EntityId>;

    /// Fetch the backend record; `raw` opts into the native payload.
    fn get_simulation(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord>;

    /// Poll the backend for one simulation's status.
    fn refresh_simulation_status(&self, simulation: &mut Simulation) -> Result<()>;
}

/// Asset operations.
pub trait AssetOps {
    /// List an experiment's assets.
    ///
    /// With `children` set, recurses into the contained simulations.
    /// `filters` restricts the result by the owning entity's tags.
    fn list_assets(
        &self,
        experiment: &Experiment,
        children: bool,
        filters: Option<&TagQuery>,
    ) -> Result<Vec<Asset>>;
}

/// Metadata operations: rehydrate entities from backend records alone.
pub trait MetadataOps {
    /// Load a suite, including its experiments, from persisted metadata.
    fn load_suite(&self, id: &EntityId) -> Result<Suite>;

    /// Load an experiment, including its simulations.
    fn load_experiment(&self, id: &EntityId) -> Result<Experiment>;

    /// Load a single simulation.
    fn load_simulation(&self, id: &EntityId) -> Result<Simulation>;

    /// Filesystem location for an entity, for backends that have one.
    fn entity_path(&self, id: &EntityId) -> Option<PathBuf>;
}

/// The full platform capability set.
pub trait Platform:
    SuiteOps + ExperimentOps + SimulationOps + AssetOps + MetadataOps + Send + Sync
{
    /// Platform name used in diagnostics and error values.
    fn name(&self) -> &str;
}

/// Options for [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Expand and persist without commissioning anything.
    pub dry_run: bool,
    /// Block until every simulation is terminal.
    pub wait_until_done: bool,
    /// Wait budget; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            wait_until_done: true,
            timeout: None,
        }
    }
}

/// Persist a suite on a platform, running its creation hooks.
pub fn create_suite(platform: &dyn Platform, suite: &mut Suite) -> Result<EntityId> {
    let id = suite.ensure_id();
    let pre = suite.pre_creation_hooks.snapshot();
    run_hooks(pre, suite, id.as_str(), platform)?;
    let id = platform.create_suite(suite)?;
    let post = suite.post_creation_hooks.snapshot();
    run_hooks(post, suite, id.as_str(), platform)?;
    Ok(id)
}

/// Persist an experiment and a stream of simulations, then commission them.
///
/// Order of operations follows the platform contract: experiment (and its
/// common assets) first, then each simulation in expansion order with its
/// pre-hooks before the backend sees it and post-hooks after the backend
/// acknowledges it. Completion order across simulations is not guaranteed.
pub fn run<I>(
    platform: &dyn Platform,
    experiment: &mut Experiment,
    simulations: I,
    options: &RunOptions,
) -> Result<WaitOutcome>
where
    I: IntoIterator<Item = Result<Simulation>>,
{
    let experiment_id = experiment.ensure_id();
    let pre = experiment.pre_creation_hooks.snapshot();
    run_hooks(pre, experiment, experiment_id.as_str(), platform)?;
    platform.create_experiment(experiment)?;
    let post = experiment.post_creation_hooks.snapshot();
    run_hooks(post, experiment, experiment_id.as_str(), platform)?;

    // A hook failure aborts only the simulation that owns the hook; its
    // siblings are still attempted, and the first failure surfaces once
    // the whole stream has been walked.
    let mut first_hook_failure: Option<crate::Error> = None;
    for simulation in simulations {
        let mut simulation = simulation?;
        simulation.parent_id = Some(experiment_id.clone());
        let sim_id = simulation.ensure_id();
        let pre = simulation.pre_creation_hooks.snapshot();
        if let Err(e) = run_hooks(pre, &mut simulation, sim_id.as_str(), platform) {
            warn!(simulation = %sim_id, error = %e, "creation hook failed; skipping simulation");
            first_hook_failure.get_or_insert(e);
            continue;
        }
        platform.create_simulation(experiment, &mut simulation)?;
        let post = simulation.post_creation_hooks.snapshot();
        if let Err(e) = run_hooks(post, &mut simulation, sim_id.as_str(), platform) {
            warn!(simulation = %sim_id, error = %e, "post-creation hook failed");
            first_hook_failure.get_or_insert(e);
            continue;
        }
        experiment.simulations.push(simulation);
    }
    if let Some(failure) = first_hook_failure {
        return Err(failure);
    }

    info!(
        experiment = %experiment_id,
        simulations = experiment.simulations.len(),
        platform = platform.name(),
        "experiment persisted"
    );

    if options.dry_run {
        return Ok(WaitOutcome::DryRun);
    }

    platform.run_experiment(experiment)?;

    if options.wait_until_done {
        wait_on_experiment(platform, experiment, options.timeout)
    } else {
        Ok(WaitOutcome::Running)
    }
}
