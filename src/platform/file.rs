//! Local filesystem backend.
//!
//! Materializes the canonical tree under a configured job directory and
//! runs simulations as local processes, bounded by `max_jobs`. The
//! launcher script owns the status sentinel: it writes `100` before the
//! task starts and `0`/`-1` on exit, so status survives process restarts.

use crate::assets::{Asset, AssetCollection};
use crate::entities::task::Task;
use crate::entities::{EntityStatus, Experiment, ItemType, Simulation, Suite};
use crate::ids::{EntityId, TagQuery};
use crate::platform::layout::{
    self, ASSETS_DIR, BATCH_SCRIPT, CONFIG_FILE, JOB_ID_FILE, JOB_STATUS_FILE, METADATA_FILE,
    RUN_SIMULATION_SCRIPT, SIM_RUN_SCRIPT, STDERR_FILE, STDOUT_FILE,
};
use crate::platform::{
    AssetOps, ExperimentOps, MetadataOps, Platform, PlatformRecord, SimulationOps, SuiteOps,
};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on concurrently running local simulations.
pub const DEFAULT_MAX_JOBS: usize = 4;

/// Platform that runs simulations as local processes.
#[derive(Debug, Clone)]
pub struct FilePlatform {
    job_directory: PathBuf,
    /// Concurrent simulation bound.
    pub max_jobs: usize,
    /// Prefer a symlinked `Assets` directory; copy on failure.
    pub sym_link: bool,
    /// MPI rank count; values >= 2 prefix the command with the launcher.
    pub ntasks: usize,
    /// MPI launcher binary.
    pub mpi_launcher: String,
}

impl FilePlatform {
    /// Create a platform rooted at `job_directory`.
    ///
    /// The directory is created if missing; an unwritable root is fatal at
    /// initialization.
    pub fn new(job_directory: impl Into<PathBuf>) -> Result<Self> {
        let job_directory = job_directory.into();
        fs::create_dir_all(&job_directory)
            .map_err(|_| Error::PermissionDenied(job_directory.display().to_string()))?;

        // Probe writability up front rather than failing mid-run.
        let probe = job_directory.join(".write_probe");
        fs::write(&probe, b"")
            .map_err(|_| Error::PermissionDenied(job_directory.display().to_string()))?;
        let _ = fs::remove_file(&probe);

        Ok(Self {
            job_directory,
            max_jobs: DEFAULT_MAX_JOBS,
            sym_link: true,
            ntasks: 1,
            mpi_launcher: "mpirun".to_string(),
        })
    }

    /// The configured job directory root.
    pub fn job_directory(&self) -> &Path {
        &self.job_directory
    }

    /// Directory for a suite.
    pub(crate) fn suite_dir(&self, suite: &Suite, id: &EntityId) -> PathBuf {
        self.job_directory
            .join(layout::dir_name(suite.name.as_deref(), ItemType::Suite, id))
    }

    /// Directory for an experiment; experiments without a suite get a
    /// default unnamed suite so the tree shape is uniform.
    fn experiment_dir(&self, experiment: &Experiment, id: &EntityId) -> Result<PathBuf> {
        let parent = match &experiment.parent_id {
            Some(parent_id) => layout::find_dir_by_id(&self.job_directory, parent_id)
                .ok_or_else(|| Error::NotFound(parent_id.to_string()))?,
            None => {
                return Err(Error::InvalidInput(
                    "experiment has no parent suite; create one first".to_string(),
                ))
            }
        };
        Ok(parent.join(layout::dir_name(
            experiment.name.as_deref(),
            ItemType::Experiment,
            id,
        )))
    }

    fn simulation_dir(&self, experiment_dir: &Path, simulation: &Simulation, id: &EntityId) -> PathBuf {
        experiment_dir.join(layout::dir_name(
            simulation.name.as_deref(),
            ItemType::Simulation,
            id,
        ))
    }

    /// Resolve an existing entity directory by id.
    fn dir_for(&self, id: &EntityId) -> Result<PathBuf> {
        layout::find_dir_by_id(&self.job_directory, id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// The command line a simulation's launcher runs, including the MPI
    /// prefix when `ntasks` asks for one.
    fn task_command(&self, task: &Task) -> String {
        let base = task.command_line();
        if self.ntasks >= 2 {
            format!("{} -n {} {}", self.mpi_launcher, self.ntasks, base)
        } else {
            base
        }
    }

    fn write_simulation_launcher(&self, sim_dir: &Path, task: &Task) -> Result<()> {
        let script = format!(
            "#!/usr/bin/env bash\n\
             cd \"$(dirname \"$0\")\"\n\
             echo \"100\" > {status}\n\
             {command} > {stdout} 2> {stderr}\n\
             code=$?\n\
             if [ $code -eq 0 ]; then\n\
             \techo \"0\" > {status}\n\
             else\n\
             \techo \"-1\" > {status}\n\
             fi\n\
             exit $code\n",
            status = JOB_STATUS_FILE,
            command = self.task_command(task),
            stdout = STDOUT_FILE,
            stderr = STDERR_FILE,
        );
        write_script(&sim_dir.join(SIM_RUN_SCRIPT), &script)
    }

    fn write_experiment_scripts(&self, experiment_dir: &Path) -> Result<()> {
        let run_simulation = format!(
            "#!/usr/bin/env bash\n\
             cd \"$(dirname \"$0\")/$1\"\n\
             bash {run}\n",
            run = SIM_RUN_SCRIPT,
        );
        write_script(&experiment_dir.join(RUN_SIMULATION_SCRIPT), &run_simulation)?;

        let batch = format!(
            "#!/usr/bin/env bash\n\
             cd \"$(dirname \"$0\")\"\n\
             for d in */; do\n\
             \t[ -f \"$d{run}\" ] || continue\n\
             \tbash {dispatch} \"$d\" &\n\
             \twhile [ \"$(jobs -rp | wc -l)\" -ge {max_jobs} ]; do\n\
             \t\twait -n\n\
             \tdone\n\
             done\n\
             wait\n",
            run = SIM_RUN_SCRIPT,
            dispatch = RUN_SIMULATION_SCRIPT,
            max_jobs = self.max_jobs,
        );
        write_script(&experiment_dir.join(BATCH_SCRIPT), &batch)
    }

    fn write_simulation_tree(
        &self,
        experiment_dir: &Path,
        simulation: &mut Simulation,
        id: &EntityId,
    ) -> Result<PathBuf> {
        let sim_dir = self.simulation_dir(experiment_dir, simulation, id);
        fs::create_dir_all(&sim_dir)?;

        if let Task::JsonConfigured(task) = &simulation.task {
            fs::write(sim_dir.join(CONFIG_FILE), task.config_json()?)?;
        }
        self.write_simulation_launcher(&sim_dir, &simulation.task)?;
        layout::link_assets(&experiment_dir.join(ASSETS_DIR), &sim_dir, self.sym_link)?;

        // Per-simulation assets land in the simulation directory itself.
        for asset in simulation.assets.iter() {
            let target = asset.target_path(&sim_dir);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, asset.bytes()?)?;
        }

        let mut meta =
            layout::EntityMetadata::new(id.clone(), ItemType::Simulation, simulation.status);
        meta.parent_id = simulation.parent_id.clone();
        meta.name = simulation.name.clone();
        meta.tags = simulation.tags.clone();
        meta.task = Some(simulation.task.clone());
        layout::write_metadata(&sim_dir, &meta)?;
        Ok(sim_dir)
    }

    /// Spawn the launcher for one simulation directory.
    fn spawn_simulation(&self, sim_dir: &Path) -> Result<Child> {
        Command::new("bash")
            .arg(SIM_RUN_SCRIPT)
            .current_dir(sim_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::BackendUnavailable {
                platform: "file".to_string(),
                attempts: 1,
                cause: format!("failed to spawn launcher in {}: {}", sim_dir.display(), e),
            })
    }

    fn refresh_simulation_in_dir(simulation: &mut Simulation, sim_dir: &Path) -> bool {
        let observed = layout::read_job_status(sim_dir);
        let changed = simulation.update_status(observed);
        if changed {
            if let Ok(mut meta) = layout::read_metadata(sim_dir) {
                meta.status = simulation.status;
                meta.status_changed_at = simulation.status_changed_at;
                let _ = layout::write_metadata(sim_dir, &meta);
            }
        }
        changed
    }
}

impl SuiteOps for FilePlatform {
    fn create_suite(&self, suite: &mut Suite) -> Result<EntityId> {
        let id = suite.ensure_id();
        let dir = self.suite_dir(suite, &id);
        if dir.join(METADATA_FILE).exists() {
            // Idempotent for an already-persisted id.
            return Ok(id);
        }
        fs::create_dir_all(&dir)?;

        let mut meta = layout::EntityMetadata::new(id.clone(), ItemType::Suite, suite.status);
        meta.name = suite.name.clone();
        meta.tags = suite.tags.clone();
        layout::write_metadata(&dir, &meta)?;
        debug!(suite = %id, dir = %dir.display(), "suite persisted");
        Ok(id)
    }

    fn get_suite(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        let dir = self.dir_for(id)?;
        let meta = layout::read_metadata(&dir)?;
        Ok(record_from_metadata(meta, raw))
    }

    fn delete_suite(&self, id: &EntityId) -> Result<()> {
        let dir = self.dir_for(id)?;
        let meta = layout::read_metadata(&dir)?;
        ensure_deletable(&meta)?;
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

impl ExperimentOps for FilePlatform {
    fn create_experiment(&self, experiment: &mut Experiment) -> Result<EntityId> {
        let id = experiment.ensure_id();

        // Experiments are always rooted in a suite; create a default one
        // when the caller did not supply any.
        if experiment.parent_id.is_none() {
            let mut suite = Suite::new();
            let suite_id = self.create_suite(&mut suite)?;
            experiment.parent_id = Some(suite_id);
        }

        let dir = self.experiment_dir(experiment, &id)?;
        fs::create_dir_all(&dir)?;

        // Common assets are durable before any simulation is commissioned.
        layout::materialize_assets(&experiment.assets, &dir.join(ASSETS_DIR))?;
        self.write_experiment_scripts(&dir)?;

        let mut meta = layout::EntityMetadata::new(id.clone(), ItemType::Experiment, experiment.status);
        meta.parent_id = experiment.parent_id.clone();
        meta.name = experiment.name.clone();
        meta.tags = experiment.tags.clone();
        meta.assets = Some(experiment.assets.manifest()?);
        layout::write_metadata(&dir, &meta)?;
        debug!(experiment = %id, dir = %dir.display(), "experiment persisted");
        Ok(id)
    }

    fn get_experiment(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        let dir = self.dir_for(id)?;
        let meta = layout::read_metadata(&dir)?;
        Ok(record_from_metadata(meta, raw))
    }

    fn run_experiment(&self, experiment: &mut Experiment) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self.dir_for(&id)?;

        // Commission order follows sweep-expansion order; completion order
        // is whatever the scheduler gives us.
        let mut active: Vec<Child> = Vec::new();
        for simulation in &mut experiment.simulations {
            let sim_id = simulation
                .id()
                .cloned()
                .ok_or_else(|| Error::InvalidInput("simulation was never persisted".to_string()))?;
            let sim_dir = self.simulation_dir(&experiment_dir, simulation, &sim_id);

            while active.len() >= self.max_jobs {
                reap_finished(&mut active);
                if active.len() >= self.max_jobs {
                    thread::sleep(Duration::from_millis(50));
                }
            }

            let child = self.spawn_simulation(&sim_dir)?;
            fs::write(sim_dir.join(JOB_ID_FILE), child.id().to_string())?;
            simulation.update_status(EntityStatus::Running);
            active.push(child);
        }

        experiment.update_status(EntityStatus::Running);
        info!(experiment = %id, jobs = experiment.simulations.len(), "experiment commissioned");
        Ok(())
    }

    fn cancel_experiment(&self, experiment: &mut Experiment, force: bool) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self.dir_for(&id)?;

        for simulation in &mut experiment.simulations {
            if simulation.status.is_terminal() {
                continue;
            }
            if let Some(sim_id) = simulation.id().cloned() {
                let sim_dir = self.simulation_dir(&experiment_dir, simulation, &sim_id);
                if force {
                    if let Ok(pid) = fs::read_to_string(sim_dir.join(JOB_ID_FILE)) {
                        kill_pid(pid.trim());
                    }
                }
                fs::write(sim_dir.join(JOB_STATUS_FILE), "-1")?;
            }
            simulation.update_status(EntityStatus::Failed);
        }
        experiment.update_status(EntityStatus::Failed);
        Ok(())
    }

    fn refresh_experiment_status(&self, experiment: &mut Experiment) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self.dir_for(&id)?;

        for simulation in &mut experiment.simulations {
            if simulation.status.is_terminal() {
                continue;
            }
            if let Some(sim_id) = simulation.id().cloned() {
                let sim_dir = self.simulation_dir(&experiment_dir, simulation, &sim_id);
                Self::refresh_simulation_in_dir(simulation, &sim_dir);
            }
        }

        if let Some(terminal) = experiment.aggregate_status() {
            if experiment.update_status(terminal) {
                if let Ok(mut meta) = layout::read_metadata(&experiment_dir) {
                    meta.status = experiment.status;
                    meta.status_changed_at = experiment.status_changed_at;
                    layout::write_metadata(&experiment_dir, &meta)?;
                }
            }
        }
        Ok(())
    }

    fn delete_experiment(&self, id: &EntityId) -> Result<()> {
        let dir = self.dir_for(id)?;
        let meta = layout::read_metadata(&dir)?;
        ensure_deletable(&meta)?;
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

impl SimulationOps for FilePlatform {
    fn create_simulation(
        &self,
        experiment: &Experiment,
        simulation: &mut Simulation,
    ) -> Result<EntityId> {
        let experiment_id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self.dir_for(&experiment_id)?;

        let id = simulation.ensure_id();
        simulation.parent_id = Some(experiment_id);
        self.write_simulation_tree(&experiment_dir, simulation, &id)?;
        Ok(id)
    }

    fn get_simulation(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        let dir = self.dir_for(id)?;
        let mut meta = layout::read_metadata(&dir)?;
        // The status sentinel outranks the metadata copy.
        let observed = layout::read_job_status(&dir);
        if observed != EntityStatus::Created {
            meta.status = observed;
        }
        Ok(record_from_metadata(meta, raw))
    }

    fn refresh_simulation_status(&self, simulation: &mut Simulation) -> Result<()> {
        if simulation.status.is_terminal() {
            return Ok(());
        }
        let id = simulation
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("simulation was never persisted".to_string()))?;
        let dir = self.dir_for(&id)?;
        Self::refresh_simulation_in_dir(simulation, &dir);
        Ok(())
    }
}

impl AssetOps for FilePlatform {
    fn list_assets(
        &self,
        experiment: &Experiment,
        children: bool,
        filters: Option<&TagQuery>,
    ) -> Result<Vec<Asset>> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self.dir_for(&id)?;

        let mut collection = AssetCollection::new();
        let assets_dir = experiment_dir.join(ASSETS_DIR);
        if assets_dir.is_dir() {
            collection.add_directory(&assets_dir, true)?;
        }

        if children {
            for simulation in &experiment.simulations {
                if let Some(query) = filters {
                    if !query.matches(&simulation.tags) {
                        continue;
                    }
                }
                for asset in simulation.assets.iter() {
                    // Per-simulation duplicates of common assets collapse.
                    let _ = collection.add_asset(asset.clone(), false);
                }
            }
        }

        Ok(collection.iter().cloned().collect())
    }
}

impl MetadataOps for FilePlatform {
    fn load_suite(&self, id: &EntityId) -> Result<Suite> {
        let dir = self.dir_for(id)?;
        let meta = layout::read_metadata(&dir)?;
        if meta.item_type != ItemType::Suite {
            return Err(Error::NotFound(format!("{} is not a suite", id)));
        }

        let mut suite = Suite::new();
        suite.assign_id(meta.id.clone())?;
        suite.name = meta.name;
        suite.tags = meta.tags;
        suite.status = meta.status;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(exp_id) = entry
                .file_name()
                .to_str()
                .and_then(layout::id_from_dir_name)
            {
                if let Ok(experiment) = self.load_experiment(&exp_id) {
                    suite.experiments.push(experiment);
                }
            }
        }
        Ok(suite)
    }

    fn load_experiment(&self, id: &EntityId) -> Result<Experiment> {
        let dir = self.dir_for(id)?;
        let meta = layout::read_metadata(&dir)?;
        if meta.item_type != ItemType::Experiment {
            return Err(Error::NotFound(format!("{} is not an experiment", id)));
        }

        let mut experiment = Experiment::new();
        experiment.assign_id(meta.id.clone())?;
        experiment.name = meta.name;
        experiment.parent_id = meta.parent_id;
        experiment.tags = meta.tags;
        experiment.status = meta.status;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !path.join(METADATA_FILE).exists() {
                continue;
            }
            if let Ok(simulation) = hydrate_simulation(&path) {
                experiment.simulations.push(simulation);
            }
        }
        // Expansion order is not recoverable from readdir; sort by id for a
        // stable view.
        experiment
            .simulations
            .sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(experiment)
    }

    fn load_simulation(&self, id: &EntityId) -> Result<Simulation> {
        let dir = self.dir_for(id)?;
        hydrate_simulation(&dir)
    }

    fn entity_path(&self, id: &EntityId) -> Option<PathBuf> {
        layout::find_dir_by_id(&self.job_directory, id)
    }
}

impl Platform for FilePlatform {
    fn name(&self) -> &str {
        "file"
    }
}

fn hydrate_simulation(dir: &Path) -> Result<Simulation> {
    let meta = layout::read_metadata(dir)?;
    if meta.item_type != ItemType::Simulation {
        return Err(Error::NotFound(format!(
            "{} is not a simulation",
            dir.display()
        )));
    }
    let task = meta.task.ok_or_else(|| {
        Error::Other(format!("simulation metadata in {} has no task", dir.display()))
    })?;

    let mut simulation = Simulation::new(task);
    simulation.assign_id(meta.id.clone())?;
    simulation.name = meta.name;
    simulation.parent_id = meta.parent_id;
    simulation.tags = meta.tags;
    simulation.status = meta.status;

    // The sentinel file is the source of truth when present.
    let observed = layout::read_job_status(dir);
    if observed != EntityStatus::Created {
        simulation.update_status(observed);
    }
    Ok(simulation)
}

fn record_from_metadata(meta: layout::EntityMetadata, raw: bool) -> PlatformRecord {
    let raw_value = if raw {
        serde_json::to_value(&meta).unwrap_or(serde_json::Value::Null)
    } else {
        serde_json::Value::Null
    };
    PlatformRecord {
        id: meta.id,
        item_type: meta.item_type,
        status: meta.status,
        raw: raw_value,
    }
}

fn ensure_deletable(meta: &layout::EntityMetadata) -> Result<()> {
    if meta.status == EntityStatus::Running {
        return Err(Error::InvalidInput(format!(
            "entity {} is running; cancel it before deleting",
            meta.id
        )));
    }
    Ok(())
}

fn reap_finished(active: &mut Vec<Child>) {
    active.retain_mut(|child| match child.try_wait() {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(e) => {
            warn!(error = %e, "failed to poll launcher process");
            false
        }
    });
}

#[cfg(unix)]
fn kill_pid(pid: &str) {
    let _ = Command::new("kill").arg(pid).status();
}

#[cfg(not(unix))]
fn kill_pid(pid: &str) {
    let _ = Command::new("taskkill").args(["/PID", pid, "/F"]).status();
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, body)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_script(path: &Path, body: &str) -> Result<()> {
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::task::{CommandTask, JsonConfiguredTask};
    use crate::test_utils::TestEnv;

    fn command_sim(cmd: &str) -> Simulation {
        Simulation::new(Task::Command(CommandTask::new(
            "sh",
            vec!["-c".to_string(), cmd.to_string()],
        )))
    }

    fn persisted_experiment(platform: &FilePlatform) -> Experiment {
        let mut experiment = Experiment::named("exp");
        platform.create_experiment(&mut experiment).unwrap();
        experiment
    }

    #[test]
    fn test_create_experiment_creates_default_suite() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let experiment = persisted_experiment(&platform);

        let suite_id = experiment.parent_id.clone().unwrap();
        let suite_dir = platform.entity_path(&suite_id).unwrap();
        assert!(suite_dir
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("Suite_"));
        assert!(suite_dir.join(METADATA_FILE).exists());
    }

    #[test]
    fn test_create_suite_is_idempotent() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut suite = Suite::named("s");
        let first = platform.create_suite(&mut suite).unwrap();
        let second = platform.create_suite(&mut suite).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_simulation_tree_contents() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = persisted_experiment(&platform);

        let mut task = JsonConfiguredTask::new("model.py");
        task.set_parameter("a", 3.into());
        let mut simulation = Simulation::new(Task::JsonConfigured(task));
        let sim_id = platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.add_simulation(simulation);

        let sim_dir = platform.entity_path(&sim_id).unwrap();
        assert!(sim_dir.join(METADATA_FILE).exists());
        assert!(sim_dir.join(SIM_RUN_SCRIPT).exists());
        assert!(sim_dir.join(CONFIG_FILE).exists());

        let config: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(sim_dir.join(CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(config["a"], serde_json::json!(3));
    }

    #[test]
    fn test_run_experiment_to_success() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = persisted_experiment(&platform);

        for _ in 0..3 {
            let mut simulation = command_sim("exit 0");
            platform
                .create_simulation(&experiment, &mut simulation)
                .unwrap();
            experiment.simulations.push(simulation);
        }

        platform.run_experiment(&mut experiment).unwrap();

        // Poll until the launchers settle.
        for _ in 0..100 {
            platform.refresh_experiment_status(&mut experiment).unwrap();
            if experiment.status.is_terminal() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(experiment.status, EntityStatus::Succeeded);
        for simulation in &experiment.simulations {
            assert_eq!(simulation.status, EntityStatus::Succeeded);
        }
    }

    #[test]
    fn test_failed_simulation_fails_experiment() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = persisted_experiment(&platform);

        for cmd in ["exit 0", "exit 3"] {
            let mut simulation = command_sim(cmd);
            platform
                .create_simulation(&experiment, &mut simulation)
                .unwrap();
            experiment.simulations.push(simulation);
        }

        platform.run_experiment(&mut experiment).unwrap();
        for _ in 0..100 {
            platform.refresh_experiment_status(&mut experiment).unwrap();
            if experiment.status.is_terminal() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(experiment.status, EntityStatus::Failed);
    }

    #[test]
    fn test_job_files_written() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = persisted_experiment(&platform);

        let mut simulation = command_sim("echo hi");
        let sim_id = platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);

        platform.run_experiment(&mut experiment).unwrap();
        let sim_dir = platform.entity_path(&sim_id).unwrap();
        assert!(sim_dir.join(JOB_ID_FILE).exists());

        for _ in 0..100 {
            platform.refresh_experiment_status(&mut experiment).unwrap();
            if experiment.status.is_terminal() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(
            fs::read_to_string(sim_dir.join(JOB_STATUS_FILE)).unwrap().trim(),
            "0"
        );
        assert_eq!(
            fs::read_to_string(sim_dir.join(STDOUT_FILE)).unwrap().trim(),
            "hi"
        );
    }

    #[test]
    fn test_mpi_prefix_applied() {
        let env = TestEnv::new();
        let mut platform = env.file_platform();
        platform.ntasks = 4;
        let task = Task::Command(CommandTask::new("model", vec![]));
        assert_eq!(platform.task_command(&task), "mpirun -n 4 model");

        platform.ntasks = 1;
        assert_eq!(platform.task_command(&task), "model");
    }

    #[test]
    fn test_delete_running_experiment_rejected() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = persisted_experiment(&platform);
        let id = experiment.id().cloned().unwrap();

        // Force the persisted status to running.
        let dir = platform.entity_path(&id).unwrap();
        let mut meta = layout::read_metadata(&dir).unwrap();
        meta.status = EntityStatus::Running;
        layout::write_metadata(&dir, &meta).unwrap();

        assert!(matches!(
            platform.delete_experiment(&id),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_experiment_rehydrates() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = persisted_experiment(&platform);

        let mut simulation = command_sim("exit 0");
        simulation.tags.insert("a".to_string(), 1.into());
        platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);

        let id = experiment.id().cloned().unwrap();
        let loaded = platform.load_experiment(&id).unwrap();
        assert_eq!(loaded.simulations.len(), 1);
        assert_eq!(
            loaded.simulations[0].tags.get("a").map(|v| v.coerced()),
            Some("1".to_string())
        );
    }

    #[test]
    fn test_get_with_raw_flag() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let experiment = persisted_experiment(&platform);
        let id = experiment.id().cloned().unwrap();

        let plain = platform.get_experiment(&id, false).unwrap();
        assert!(plain.raw.is_null());
        let raw = platform.get_experiment(&id, true).unwrap();
        assert_eq!(raw.raw["id"], serde_json::json!(id.as_str()));
    }
}
