//! Status reconciliation: poll a backend until an experiment settles.
//!
//! Polling is geometric, starting at one second and doubling up to a
//! thirty second ceiling. Any observed transition resets the interval to
//! the floor so bursts of completions are picked up quickly.

use crate::entities::{EntityStatus, Experiment};
use crate::platform::Platform;
use crate::{Error, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Initial polling interval.
const POLL_FLOOR: Duration = Duration::from_secs(1);
/// Polling interval ceiling.
const POLL_CEILING: Duration = Duration::from_secs(30);
/// Consecutive probe failures before we complain out loud.
const PROBE_FAILURE_WARNING: u32 = 3;

/// Terminal verdict of a wait, or why the wait did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nothing was commissioned; the run was a rehearsal.
    DryRun,
    /// The experiment was commissioned and left running.
    Running,
    /// Every simulation succeeded.
    Succeeded,
    /// At least one simulation failed or was cancelled.
    Failed,
}

impl WaitOutcome {
    /// Whether the outcome represents a fully successful run.
    pub fn is_success(&self) -> bool {
        matches!(self, WaitOutcome::Succeeded)
    }
}

/// Snapshot of per-status counts across an experiment's simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub created: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Tally an experiment's simulations.
    pub fn of(experiment: &Experiment) -> Self {
        let mut counts = Self::default();
        for simulation in &experiment.simulations {
            match simulation.status {
                EntityStatus::Created => counts.created += 1,
                EntityStatus::Running => counts.running += 1,
                EntityStatus::Succeeded => counts.succeeded += 1,
                EntityStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Whether every simulation has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.created == 0 && self.running == 0
    }
}

/// Block until every simulation in `experiment` is terminal.
///
/// Returns [`WaitOutcome::Succeeded`] only when all simulations succeeded.
/// A `timeout` of `None` waits indefinitely; exceeding a budget yields
/// [`Error::TimeoutExceeded`] with the experiment left as last observed.
pub fn wait_on_experiment(
    platform: &dyn Platform,
    experiment: &mut Experiment,
    timeout: Option<Duration>,
) -> Result<WaitOutcome> {
    let started = Instant::now();
    let mut interval = POLL_FLOOR;
    let mut consecutive_failures: u32 = 0;
    let mut last_counts = StatusCounts::of(experiment);

    loop {
        match platform.refresh_experiment_status(experiment) {
            Ok(()) => {
                consecutive_failures = 0;
            }
            Err(e) => {
                consecutive_failures += 1;
                debug!(error = %e, attempt = consecutive_failures, "status probe failed");
                if consecutive_failures >= PROBE_FAILURE_WARNING {
                    warn!(
                        error = %e,
                        attempts = consecutive_failures,
                        platform = platform.name(),
                        "status probes are failing repeatedly"
                    );
                }
            }
        }

        let counts = StatusCounts::of(experiment);
        if counts.all_terminal() && !experiment.simulations.is_empty() {
            let outcome = if counts.failed == 0 {
                WaitOutcome::Succeeded
            } else {
                WaitOutcome::Failed
            };
            info!(
                experiment = %display_id(experiment),
                succeeded = counts.succeeded,
                failed = counts.failed,
                "experiment settled"
            );
            return Ok(outcome);
        }
        if experiment.simulations.is_empty() {
            // Nothing to wait for.
            return Ok(WaitOutcome::Succeeded);
        }

        if counts != last_counts {
            debug!(
                running = counts.running,
                succeeded = counts.succeeded,
                failed = counts.failed,
                pending = counts.created,
                "status transition observed"
            );
            last_counts = counts;
            interval = POLL_FLOOR;
        }

        // The budget is only exhausted once it has actually elapsed; the
        // last sleep is clamped so a final poll lands on the boundary.
        match timeout {
            Some(budget) => {
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    return Err(Error::TimeoutExceeded(format!(
                        "experiment {} still has {} unsettled simulations after {:?}",
                        display_id(experiment),
                        counts.created + counts.running,
                        budget
                    )));
                }
                thread::sleep(interval.min(budget - elapsed));
            }
            None => thread::sleep(interval),
        }
        interval = (interval * 2).min(POLL_CEILING);
    }
}

fn display_id(experiment: &Experiment) -> String {
    experiment
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<unassigned>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::task::{CommandTask, Task};
    use crate::entities::Simulation;
    use crate::platform::{ExperimentOps, SimulationOps};
    use crate::test_utils::TestEnv;

    fn command_sim(cmd: &str) -> Simulation {
        Simulation::new(Task::Command(CommandTask::new(
            "sh",
            vec!["-c".to_string(), cmd.to_string()],
        )))
    }

    #[test]
    fn test_counts_tally() {
        let mut experiment = Experiment::new();
        let mut ok = command_sim("exit 0");
        ok.update_status(EntityStatus::Succeeded);
        let mut bad = command_sim("exit 1");
        bad.update_status(EntityStatus::Failed);
        experiment.simulations.push(ok);
        experiment.simulations.push(bad);
        experiment.simulations.push(command_sim("exit 0"));

        let counts = StatusCounts::of(&experiment);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.created, 1);
        assert!(!counts.all_terminal());
    }

    #[test]
    fn test_wait_on_finished_experiment() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = Experiment::named("done");
        platform.create_experiment(&mut experiment).unwrap();

        let mut simulation = command_sim("exit 0");
        platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);

        platform.run_experiment(&mut experiment).unwrap();
        let outcome = wait_on_experiment(&platform, &mut experiment, None).unwrap();
        assert_eq!(outcome, WaitOutcome::Succeeded);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_wait_reports_failure() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = Experiment::named("broken");
        platform.create_experiment(&mut experiment).unwrap();

        let mut simulation = command_sim("exit 7");
        platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);

        platform.run_experiment(&mut experiment).unwrap();
        let outcome = wait_on_experiment(&platform, &mut experiment, None).unwrap();
        assert_eq!(outcome, WaitOutcome::Failed);
    }

    #[test]
    fn test_wait_times_out() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = Experiment::named("slow");
        platform.create_experiment(&mut experiment).unwrap();

        let mut simulation = command_sim("sleep 30");
        platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);

        platform.run_experiment(&mut experiment).unwrap();
        let err = wait_on_experiment(&platform, &mut experiment, Some(Duration::from_secs(2)))
            .unwrap_err();
        assert!(matches!(err, Error::TimeoutExceeded(_)));
        platform.cancel_experiment(&mut experiment, true).unwrap();
    }

    #[test]
    fn test_wait_settles_within_budget() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = Experiment::named("prompt");
        platform.create_experiment(&mut experiment).unwrap();

        // Finishes at ~1.5s; a 3s budget must not report a timeout even
        // though the next full back-off interval would overshoot it.
        let mut simulation = command_sim("sleep 1.5");
        platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);

        platform.run_experiment(&mut experiment).unwrap();
        let outcome =
            wait_on_experiment(&platform, &mut experiment, Some(Duration::from_secs(3))).unwrap();
        assert_eq!(outcome, WaitOutcome::Succeeded);
    }

    #[test]
    fn test_empty_experiment_settles_immediately() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let mut experiment = Experiment::named("empty");
        platform.create_experiment(&mut experiment).unwrap();

        let outcome = wait_on_experiment(&platform, &mut experiment, None).unwrap();
        assert_eq!(outcome, WaitOutcome::Succeeded);
    }
}
