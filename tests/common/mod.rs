//! Common test utilities for simforge integration tests.
//!
//! Provides `TestEnv` for isolated job directories so tests never touch a
//! real simulation tree and stay parallel-safe.

#![allow(dead_code)]

use assert_cmd::Command;
use simforge::entities::task::{CommandTask, Task};
use simforge::entities::{Experiment, Simulation};
use simforge::platform::file::FilePlatform;
use simforge::platform::{ExperimentOps, SimulationOps};
pub use tempfile::TempDir;

/// A test environment with an isolated job directory.
pub struct TestEnv {
    pub job_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with an isolated job directory.
    pub fn new() -> Self {
        Self {
            job_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the sf binary pointed at the isolated directory.
    pub fn sf(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_sf"));
        cmd.args(["--job-directory", self.job_dir.path().to_str().unwrap()]);
        cmd.env_remove("IDMTOOLS_CONFIG_FILE");
        cmd
    }

    /// A file platform rooted at the isolated directory.
    pub fn platform(&self) -> FilePlatform {
        FilePlatform::new(self.job_dir.path()).unwrap()
    }

    /// Persist an experiment with `sims` trivial simulations.
    pub fn seed_experiment(&self, name: &str, sims: usize) -> Experiment {
        let platform = self.platform();
        let mut experiment = Experiment::named(name);
        platform.create_experiment(&mut experiment).unwrap();
        for _ in 0..sims {
            let mut simulation =
                Simulation::new(Task::Command(CommandTask::new("true", vec![])));
            platform
                .create_simulation(&experiment, &mut simulation)
                .unwrap();
            experiment.simulations.push(simulation);
        }
        experiment
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
