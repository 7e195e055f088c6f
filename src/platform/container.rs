//! Container backend: the filesystem layout, executed inside one
//! long-running container.
//!
//! The job directory is bind-mounted into the container at the same path,
//! so scripts written by the filesystem layer run unmodified. Container
//! discovery is idempotent: a matching running container is reused, a
//! stopped one restarted, and only then is a fresh one started. The chosen
//! container id is persisted under the job directory so a reconnecting
//! client finds the same container.

use crate::assets::Asset;
use crate::entities::{Experiment, Simulation, Suite};
use crate::ids::{EntityId, TagQuery};
use crate::platform::file::FilePlatform;
use crate::platform::layout::BATCH_SCRIPT;
use crate::platform::{
    AssetOps, ExperimentOps, MetadataOps, Platform, PlatformRecord, SimulationOps, SuiteOps,
};
use crate::{Error, Result};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};
use wait_timeout::ChildExt;

/// File under the job directory recording the active container id.
pub const CONTAINER_ID_FILE: &str = "container.id";
/// Default image when none is configured.
pub const DEFAULT_IMAGE: &str = "docker.io/library/python:3.11-slim";

/// Budget for runtime probe commands.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Platform that runs the filesystem layout inside a container.
#[derive(Debug, Clone)]
pub struct ContainerPlatform {
    file: FilePlatform,
    /// Image the execution container is started from.
    pub image: String,
    /// Container runtime binary.
    pub runtime: String,
    /// Extra bind mounts, `host:container` form.
    pub extra_binds: Vec<String>,
}

impl ContainerPlatform {
    pub fn new(job_directory: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: FilePlatform::new(job_directory)?,
            image: DEFAULT_IMAGE.to_string(),
            runtime: "docker".to_string(),
            extra_binds: Vec::new(),
        })
    }

    /// The underlying filesystem platform.
    pub fn file_platform(&self) -> &FilePlatform {
        &self.file
    }

    /// The bind specs this platform requires, job directory first.
    fn binds(&self) -> Vec<String> {
        let root = self.file.job_directory().display().to_string();
        let mut binds = vec![format!("{}:{}", root, root)];
        binds.extend(self.extra_binds.iter().cloned());
        binds
    }

    fn id_file(&self) -> PathBuf {
        self.file.job_directory().join(CONTAINER_ID_FILE)
    }

    /// Run a runtime subcommand, returning trimmed stdout.
    fn runtime_command(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.runtime)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::BackendUnavailable {
                platform: "container".to_string(),
                attempts: 1,
                cause: format!("failed to invoke {}: {}", self.runtime, e),
            })?;
        if !output.status.success() {
            return Err(Error::BackendRejection {
                entity_id: String::new(),
                platform: "container".to_string(),
                cause: format!(
                    "{} {} failed: {}",
                    self.runtime,
                    args.first().unwrap_or(&""),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Check the runtime responds at all, with a short budget.
    fn verify_runtime(&self) -> Result<()> {
        let mut child = Command::new(&self.runtime)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::BackendUnavailable {
                platform: "container".to_string(),
                attempts: 1,
                cause: format!("container runtime {} not found: {}", self.runtime, e),
            })?;
        match child.wait_timeout(PROBE_TIMEOUT) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => Err(Error::BackendUnavailable {
                platform: "container".to_string(),
                attempts: 1,
                cause: format!("{} --version exited with {}", self.runtime, status),
            }),
            Ok(None) => {
                let _ = child.kill();
                Err(Error::BackendUnavailable {
                    platform: "container".to_string(),
                    attempts: 1,
                    cause: format!("{} --version did not respond", self.runtime),
                })
            }
            Err(e) => Err(Error::BackendUnavailable {
                platform: "container".to_string(),
                attempts: 1,
                cause: e.to_string(),
            }),
        }
    }

    /// Make sure the configured image is present locally.
    fn ensure_image(&self) -> Result<()> {
        if self
            .runtime_command(&["image", "inspect", "--format", "{{.Id}}", &self.image])
            .is_ok()
        {
            return Ok(());
        }
        info!(image = %self.image, "image not present locally, pulling");
        self.runtime_command(&["pull", &self.image]).map(|_| ())
    }

    /// Inspect a container's run state; `None` when it does not exist.
    fn container_state(&self, container_id: &str) -> Option<String> {
        self.runtime_command(&[
            "inspect",
            "--format",
            "{{.State.Status}}",
            container_id,
        ])
        .ok()
    }

    /// The host-side sources of every bind this platform requires.
    fn bind_sources(&self) -> Vec<String> {
        self.binds()
            .iter()
            .filter_map(|bind| bind.split(':').next())
            .map(str::to_string)
            .collect()
    }

    /// Find a container started from our image whose mounts cover every
    /// required bind source, the job directory and extra binds alike.
    fn find_matching_container(&self) -> Result<Option<(String, String)>> {
        let listing = self.runtime_command(&[
            "ps",
            "-a",
            "--filter",
            &format!("ancestor={}", self.image),
            "--format",
            "{{.ID}}\t{{.State}}\t{{.Mounts}}",
        ])?;
        let required = self.bind_sources();
        for line in listing.lines() {
            let mut fields = line.split('\t');
            let (Some(id), Some(state)) = (fields.next(), fields.next()) else {
                continue;
            };
            let mounts = fields.next().unwrap_or("");
            if required.iter().all(|source| mounts_cover(mounts, source)) {
                return Ok(Some((id.to_string(), state.to_string())));
            }
        }
        Ok(None)
    }

    fn start_new_container(&self) -> Result<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--restart".to_string(),
            "unless-stopped".to_string(),
        ];
        for bind in self.binds() {
            args.push("-v".to_string());
            args.push(bind);
        }
        args.push(self.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.runtime_command(&arg_refs)?;
        info!(container = %id, image = %self.image, "started execution container");
        Ok(id)
    }

    /// Resolve the container all work runs in, creating one if needed.
    pub fn ensure_container(&self) -> Result<String> {
        self.verify_runtime()?;
        self.ensure_image()?;

        // A persisted id wins when the container still exists.
        if let Ok(persisted) = fs::read_to_string(self.id_file()) {
            let persisted = persisted.trim().to_string();
            match self.container_state(&persisted).as_deref() {
                Some("running") => return Ok(persisted),
                Some("exited") | Some("created") | Some("paused") => {
                    self.runtime_command(&["start", &persisted])?;
                    debug!(container = %persisted, "restarted persisted container");
                    return Ok(persisted);
                }
                _ => {}
            }
        }

        let id = match self.find_matching_container()? {
            Some((id, state)) if state == "running" => id,
            Some((id, _)) => {
                self.runtime_command(&["start", &id])?;
                id
            }
            None => self.start_new_container()?,
        };
        fs::write(self.id_file(), &id)?;
        Ok(id)
    }

    /// Stop the execution container for this job directory.
    pub fn stop_container(&self, container_id: &str) -> Result<()> {
        self.runtime_command(&["stop", container_id])?;
        Ok(())
    }

    /// Normalize script line endings inside the container.
    ///
    /// Scripts written by a Windows host may carry CRLF, which bash in the
    /// container rejects. The rewrite is a no-op on files already LF-only.
    fn normalize_line_endings(&self, container_id: &str, experiment_dir: &str) -> Result<()> {
        if !cfg!(windows) {
            return Ok(());
        }
        self.runtime_command(&[
            "exec",
            container_id,
            "bash",
            "-c",
            &format!(
                "find '{}' -name '*.sh' -exec sed -i 's/\\r$//' {{}} +",
                experiment_dir
            ),
        ])?;
        Ok(())
    }
}

impl SuiteOps for ContainerPlatform {
    fn create_suite(&self, suite: &mut Suite) -> Result<EntityId> {
        self.file.create_suite(suite)
    }

    fn get_suite(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        self.file.get_suite(id, raw)
    }

    fn delete_suite(&self, id: &EntityId) -> Result<()> {
        self.file.delete_suite(id)
    }
}

impl ExperimentOps for ContainerPlatform {
    fn create_experiment(&self, experiment: &mut Experiment) -> Result<EntityId> {
        self.file.create_experiment(experiment)
    }

    fn get_experiment(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        self.file.get_experiment(id, raw)
    }

    fn run_experiment(&self, experiment: &mut Experiment) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self
            .file
            .entity_path(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let experiment_dir = experiment_dir.display().to_string();

        let container_id = self.ensure_container()?;
        self.normalize_line_endings(&container_id, &experiment_dir)?;

        self.runtime_command(&[
            "exec",
            "-d",
            &container_id,
            "bash",
            &format!("{}/{}", experiment_dir, BATCH_SCRIPT),
        ])?;

        for simulation in &mut experiment.simulations {
            simulation.update_status(crate::entities::EntityStatus::Running);
        }
        experiment.update_status(crate::entities::EntityStatus::Running);
        info!(experiment = %id, container = %container_id, "batch dispatched in container");
        Ok(())
    }

    fn cancel_experiment(&self, experiment: &mut Experiment, force: bool) -> Result<()> {
        // Sentinel writes happen on the shared mount, so the filesystem
        // cancel path applies unchanged.
        self.file.cancel_experiment(experiment, force)
    }

    fn refresh_experiment_status(&self, experiment: &mut Experiment) -> Result<()> {
        self.file.refresh_experiment_status(experiment)
    }

    fn delete_experiment(&self, id: &EntityId) -> Result<()> {
        self.file.delete_experiment(id)
    }
}

impl SimulationOps for ContainerPlatform {
    fn create_simulation(
        &self,
        experiment: &Experiment,
        simulation: &mut Simulation,
    ) -> Result<EntityId> {
        self.file.create_simulation(experiment, simulation)
    }

    fn get_simulation(&self, id: &EntityId, raw: bool) -> Result<PlatformRecord> {
        self.file.get_simulation(id, raw)
    }

    fn refresh_simulation_status(&self, simulation: &mut Simulation) -> Result<()> {
        self.file.refresh_simulation_status(simulation)
    }
}

impl AssetOps for ContainerPlatform {
    fn list_assets(
        &self,
        experiment: &Experiment,
        children: bool,
        filters: Option<&TagQuery>,
    ) -> Result<Vec<Asset>> {
        self.file.list_assets(experiment, children, filters)
    }
}

impl MetadataOps for ContainerPlatform {
    fn load_suite(&self, id: &EntityId) -> Result<Suite> {
        self.file.load_suite(id)
    }

    fn load_experiment(&self, id: &EntityId) -> Result<Experiment> {
        self.file.load_experiment(id)
    }

    fn load_simulation(&self, id: &EntityId) -> Result<Simulation> {
        self.file.load_simulation(id)
    }

    fn entity_path(&self, id: &EntityId) -> Option<PathBuf> {
        self.file.entity_path(id)
    }
}

impl Platform for ContainerPlatform {
    fn name(&self) -> &str {
        "container"
    }
}

/// Whether a runtime mounts listing covers `root` as a bind source.
///
/// `docker ps --format {{.Mounts}}` prints comma-separated sources,
/// truncating long paths with a trailing ellipsis.
fn mounts_cover(mounts: &str, root: &str) -> bool {
    mounts.split(',').any(|mount| {
        let mount = mount.trim();
        if let Some(prefix) = mount.strip_suffix('…') {
            !prefix.is_empty() && root.starts_with(prefix)
        } else {
            mount == root
        }
    })
}
