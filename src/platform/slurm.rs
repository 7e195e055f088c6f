//! Slurm backend: the filesystem layout, submitted as a job array.
//!
//! One `sbatch.sh` per experiment carries the resource directives and a
//! job array whose indices map onto the simulation directories in sweep
//! order. The per-simulation launcher still owns the status sentinel, so
//! `job_status.txt` stays the source of truth; `sacct` is only a fallback
//! for simulations whose launcher never got to run.

use crate::assets::Asset;
use crate::entities::{EntityStatus, Experiment, Simulation, Suite};
use crate::ids::{EntityId, TagQuery};
use crate::platform::file::FilePlatform;
use crate::platform::layout::{self, JOB_ID_FILE, SIM_RUN_SCRIPT};
use crate::platform::{
    AssetOps, ExperimentOps, MetadataOps, Platform, PlatformRecord, SimulationOps, SuiteOps,
};
use crate::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Batch script filename at the experiment level.
pub const SBATCH_SCRIPT: &str = "sbatch.sh";

/// Resource directives rendered into `sbatch.sh`.
///
/// `None` fields are omitted from the script rather than defaulted, so the
/// cluster's own defaults apply.
#[derive(Debug, Clone, Default)]
pub struct SlurmJobConfig {
    pub partition: Option<String>,
    pub nodes: Option<u32>,
    pub ntasks: Option<u32>,
    pub cpus_per_task: Option<u32>,
    pub mem_per_cpu: Option<String>,
    pub time: Option<String>,
    pub account: Option<String>,
    pub mail_user: Option<String>,
    pub mail_type: Option<String>,
    pub exclusive: bool,
    pub requeue: bool,
    /// Environment modules loaded before the array body runs.
    pub modules: Vec<String>,
    /// Array concurrency cap, rendered as `--array=1-N%cap`.
    pub max_running_jobs: Option<u32>,
}

/// Platform that submits experiments through Slurm.
#[derive(Debug, Clone)]
pub struct SlurmPlatform {
    file: FilePlatform,
    /// Resource directives for submitted jobs.
    pub config: SlurmJobConfig,
}

impl SlurmPlatform {
    pub fn new(job_directory: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: FilePlatform::new(job_directory)?,
            config: SlurmJobConfig::default(),
        })
    }

    /// The underlying filesystem platform.
    pub fn file_platform(&self) -> &FilePlatform {
        &self.file
    }

    /// Render the batch script for an experiment's simulation directories.
    fn render_sbatch(&self, experiment_name: Option<&str>, sim_dirs: &[String]) -> String {
        let mut script = String::from("#!/bin/bash\n");
        if let Some(name) = experiment_name {
            let _ = writeln!(script, "#SBATCH --job-name={}", name.replace(' ', "_"));
        }
        if let Some(v) = &self.config.partition {
            let _ = writeln!(script, "#SBATCH --partition={}", v);
        }
        if let Some(v) = self.config.nodes {
            let _ = writeln!(script, "#SBATCH --nodes={}", v);
        }
        if let Some(v) = self.config.ntasks {
            let _ = writeln!(script, "#SBATCH --ntasks={}", v);
        }
        if let Some(v) = self.config.cpus_per_task {
            let _ = writeln!(script, "#SBATCH --cpus-per-task={}", v);
        }
        if let Some(v) = &self.config.mem_per_cpu {
            let _ = writeln!(script, "#SBATCH --mem-per-cpu={}", v);
        }
        if let Some(v) = &self.config.time {
            let _ = writeln!(script, "#SBATCH --time={}", v);
        }
        if let Some(v) = &self.config.account {
            let _ = writeln!(script, "#SBATCH --account={}", v);
        }
        if let Some(v) = &self.config.mail_user {
            let _ = writeln!(script, "#SBATCH --mail-user={}", v);
        }
        if let Some(v) = &self.config.mail_type {
            let _ = writeln!(script, "#SBATCH --mail-type={}", v);
        }
        if self.config.exclusive {
            script.push_str("#SBATCH --exclusive\n");
        }
        if self.config.requeue {
            script.push_str("#SBATCH --requeue\n");
        } else {
            script.push_str("#SBATCH --no-requeue\n");
        }
        match self.config.max_running_jobs {
            Some(cap) => {
                let _ = writeln!(script, "#SBATCH --array=1-{}%{}", sim_dirs.len(), cap);
            }
            None => {
                let _ = writeln!(script, "#SBATCH --array=1-{}", sim_dirs.len());
            }
        }
        script.push('\n');
        for module in &self.config.modules {
            let _ = writeln!(script, "module load {}", module);
        }

        script.push_str("\ndirs=(\n");
        for dir in sim_dirs {
            let _ = writeln!(script, "\"{}\"", dir);
        }
        script.push_str(")\n");
        let _ = writeln!(
            script,
            "cd \"$(dirname \"$0\")/${{dirs[$((SLURM_ARRAY_TASK_ID - 1))]}}\""
        );
        let _ = writeln!(script, "bash {}", SIM_RUN_SCRIPT);
        script
    }

    fn run_slurm_command(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::BackendUnavailable {
                platform: "slurm".to_string(),
                attempts: 1,
                cause: format!("failed to invoke {}: {}", program, e),
            })?;
        if !output.status.success() {
            return Err(Error::BackendRejection {
                entity_id: String::new(),
                platform: "slurm".to_string(),
                cause: format!(
                    "{} failed: {}",
                    program,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Query sacct for one job step and map its state to a sentinel value.
    fn sacct_status(&self, job_ref: &str) -> Result<Option<EntityStatus>> {
        let stdout = self.run_slurm_command(
            "sacct",
            &["-j", job_ref, "--format=State", "--noheader", "--parsable2"],
        )?;
        let Some(state) = stdout.lines().next() else {
            return Ok(None);
        };
        Ok(map_sacct_state(state)
            .map(|sentinel| layout::status_from_job_file(Some(sentinel))))
    }
}

impl SuiteOps for SlurmPlatform {
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

impl ExperimentOps for SlurmPlatform {
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

        // Array indices follow sweep-expansion order.
        let mut sim_dirs = Vec::with_capacity(experiment.simulations.len());
        for simulation in &experiment.simulations {
            let sim_id = simulation
                .id()
                .cloned()
                .ok_or_else(|| Error::InvalidInput("simulation was never persisted".to_string()))?;
            sim_dirs.push(layout::dir_name(
                simulation.name.as_deref(),
                crate::entities::ItemType::Simulation,
                &sim_id,
            ));
        }
        if sim_dirs.is_empty() {
            return Err(Error::InvalidInput(
                "experiment has no simulations to submit".to_string(),
            ));
        }

        let script = self.render_sbatch(experiment.name.as_deref(), &sim_dirs);
        let script_path = experiment_dir.join(SBATCH_SCRIPT);
        fs::write(&script_path, script)?;

        let stdout = self.run_slurm_command("sbatch", &[&script_path.display().to_string()])?;
        let job_id = parse_job_id(&stdout).ok_or_else(|| Error::BackendRejection {
            entity_id: id.to_string(),
            platform: "slurm".to_string(),
            cause: format!("could not parse job id from sbatch output: {:?}", stdout),
        })?;

        fs::write(experiment_dir.join(JOB_ID_FILE), &job_id)?;
        for (index, dir) in sim_dirs.iter().enumerate() {
            fs::write(
                experiment_dir.join(dir).join(JOB_ID_FILE),
                format!("{}_{}", job_id, index + 1),
            )?;
        }

        for simulation in &mut experiment.simulations {
            simulation.update_status(EntityStatus::Running);
        }
        experiment.update_status(EntityStatus::Running);
        info!(experiment = %id, job = %job_id, tasks = sim_dirs.len(), "job array submitted");
        Ok(())
    }

    fn cancel_experiment(&self, experiment: &mut Experiment, _force: bool) -> Result<()> {
        let id = experiment
            .id()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("experiment was never persisted".to_string()))?;
        let experiment_dir = self
            .file
            .entity_path(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let job_id = fs::read_to_string(experiment_dir.join(JOB_ID_FILE))
            .map_err(|_| Error::NotFound(format!("no persisted job id for experiment {}", id)))?;
        self.run_slurm_command("scancel", &[job_id.trim()])?;

        for simulation in &mut experiment.simulations {
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
        let experiment_dir = self
            .file
            .entity_path(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        for simulation in &mut experiment.simulations {
            if simulation.status.is_terminal() {
                continue;
            }
            let Some(sim_id) = simulation.id().cloned() else {
                continue;
            };
            let sim_dir = experiment_dir.join(layout::dir_name(
                simulation.name.as_deref(),
                crate::entities::ItemType::Simulation,
                &sim_id,
            ));

            // The sentinel file wins; sacct only covers jobs whose
            // launcher never started.
            let observed = layout::read_job_status(&sim_dir);
            if observed != EntityStatus::Created {
                simulation.update_status(observed);
                continue;
            }
            if let Ok(job_ref) = fs::read_to_string(sim_dir.join(JOB_ID_FILE)) {
                match self.sacct_status(job_ref.trim()) {
                    Ok(Some(status)) => {
                        simulation.update_status(status);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(simulation = %sim_id, error = %e, "sacct probe failed");
                    }
                }
            }
        }

        if let Some(terminal) = experiment.aggregate_status() {
            experiment.update_status(terminal);
        }
        Ok(())
    }

    fn delete_experiment(&self, id: &EntityId) -> Result<()> {
        self.file.delete_experiment(id)
    }
}

impl SimulationOps for SlurmPlatform {
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

impl AssetOps for SlurmPlatform {
    fn list_assets(
        &self,
        experiment: &Experiment,
        children: bool,
        filters: Option<&TagQuery>,
    ) -> Result<Vec<Asset>> {
        self.file.list_assets(experiment, children, filters)
    }
}

impl MetadataOps for SlurmPlatform {
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

impl Platform for SlurmPlatform {
    fn name(&self) -> &str {
        "slurm"
    }
}

/// Extract the leading job id from sbatch stdout.
///
/// Accepts both the human form (`Submitted batch job 123`) and the
/// parsable form (`123;cluster`).
fn parse_job_id(stdout: &str) -> Option<String> {
    let digits: String = stdout
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Map a sacct state code onto a status sentinel value.
///
/// States may carry a qualifier (`CANCELLED by 1234`) or a `+` suffix.
fn map_sacct_state(state: &str) -> Option<&'static str> {
    let code = state
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('+');
    match code {
        "COMPLETED" | "SUCCEEDED" => Some("0"),
        "CANCELLED" | "FAILED" | "NODE_FAIL" | "TIMEOUT" => Some("-1"),
        "PENDING" | "RUNNING" | "CONFIGURING" | "COMPLETING" => Some("100"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    #[test]
    fn test_parse_job_id_forms() {
        assert_eq!(
            parse_job_id("Submitted batch job 4215978"),
            Some("4215978".to_string())
        );
        assert_eq!(parse_job_id("4215978;cluster0"), Some("4215978".to_string()));
        assert_eq!(parse_job_id("error: no partition"), None);
    }

    #[test]
    fn test_sacct_state_mapping() {
        assert_eq!(map_sacct_state("COMPLETED"), Some("0"));
        assert_eq!(map_sacct_state("CANCELLED by 1234"), Some("-1"));
        assert_eq!(map_sacct_state("FAILED"), Some("-1"));
        assert_eq!(map_sacct_state("NODE_FAIL"), Some("-1"));
        assert_eq!(map_sacct_state("TIMEOUT"), Some("-1"));
        assert_eq!(map_sacct_state("PENDING"), Some("100"));
        assert_eq!(map_sacct_state("RUNNING+"), Some("100"));
        assert_eq!(map_sacct_state("COMPLETING"), Some("100"));
        assert_eq!(map_sacct_state("REQUEUED"), None);
    }

    #[test]
    fn test_sbatch_rendering() {
        let env = TestEnv::new();
        let mut platform = SlurmPlatform::new(env.path()).unwrap();
        platform.config.partition = Some("general".to_string());
        platform.config.ntasks = Some(2);
        platform.config.mem_per_cpu = Some("4G".to_string());
        platform.config.time = Some("01:00:00".to_string());
        platform.config.exclusive = true;
        platform.config.modules = vec!["gcc/12".to_string(), "openmpi".to_string()];
        platform.config.max_running_jobs = Some(8);

        let dirs = vec!["Simulation_a".to_string(), "Simulation_b".to_string()];
        let script = platform.render_sbatch(Some("flu sweep"), &dirs);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=flu_sweep"));
        assert!(script.contains("#SBATCH --partition=general"));
        assert!(script.contains("#SBATCH --ntasks=2"));
        assert!(script.contains("#SBATCH --mem-per-cpu=4G"));
        assert!(script.contains("#SBATCH --time=01:00:00"));
        assert!(script.contains("#SBATCH --exclusive"));
        assert!(script.contains("#SBATCH --array=1-2%8"));
        assert!(script.contains("module load gcc/12"));
        assert!(script.contains("\"Simulation_a\""));
        assert!(script.contains("SLURM_ARRAY_TASK_ID"));
    }

    #[test]
    fn test_sbatch_omits_unset_directives() {
        let env = TestEnv::new();
        let platform = SlurmPlatform::new(env.path()).unwrap();
        let script = platform.render_sbatch(None, &["Simulation_x".to_string()]);
        assert!(!script.contains("--partition"));
        assert!(!script.contains("--account"));
        assert!(script.contains("#SBATCH --array=1-1\n"));
        assert!(script.contains("#SBATCH --no-requeue"));
    }

    #[test]
    fn test_run_without_simulations_rejected() {
        let env = TestEnv::new();
        let platform = SlurmPlatform::new(env.path()).unwrap();
        let mut experiment = Experiment::named("empty");
        platform.create_experiment(&mut experiment).unwrap();
        assert!(matches!(
            platform.run_experiment(&mut experiment),
            Err(Error::InvalidInput(_))
        ));
    }
}
