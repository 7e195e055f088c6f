//! Command implementations for the `sf` CLI.
//!
//! Each command returns an [`Output`] carrying both a JSON value and a
//! human rendering; the caller picks one. Commands never print directly.

use crate::entities::ItemType;
use crate::ids::EntityId;
use crate::platform::container::ContainerPlatform;
use crate::platform::file::FilePlatform;
use crate::platform::layout::{
    self, JOB_ID_FILE, JOB_STATUS_FILE, METADATA_FILE, STDERR_FILE, STDOUT_FILE,
};
use crate::platform::MetadataOps;
use crate::status::StatusCounts;
use crate::{Error, Result};
use serde_json::json;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A command result in both machine and human form.
#[derive(Debug)]
pub struct Output {
    pub json: serde_json::Value,
    pub human: String,
}

impl Output {
    pub fn render(&self, human: bool) -> String {
        if human {
            self.human.clone()
        } else {
            self.json.to_string()
        }
    }
}

/// Process exit code for an error, per the CLI contract.
pub fn exit_code(error: &Error) -> i32 {
    match error {
        Error::InvalidId(_) | Error::InvalidInput(_) => 2,
        Error::BackendUnavailable { .. } => 3,
        _ => 1,
    }
}

fn parse_id(id: &str) -> Result<EntityId> {
    EntityId::parse(id)
}

/// Enumerate experiment directories with their metadata.
fn experiments_in(job_directory: &Path) -> Vec<(PathBuf, layout::EntityMetadata)> {
    let mut found = Vec::new();
    for entry in WalkDir::new(job_directory)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        if !entry.path().join(METADATA_FILE).exists() {
            continue;
        }
        if let Ok(meta) = layout::read_metadata(entry.path()) {
            if meta.item_type == ItemType::Experiment {
                found.push((entry.path().to_path_buf(), meta));
            }
        }
    }
    found
}

/// `sf status <id>`
pub fn status(job_directory: &Path, id: &str) -> Result<Output> {
    let id = parse_id(id)?;
    let dir = layout::find_dir_by_id(job_directory, &id)
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    let mut meta = layout::read_metadata(&dir)?;
    if meta.item_type == ItemType::Simulation {
        let observed = layout::read_job_status(&dir);
        if observed != crate::entities::EntityStatus::Created {
            meta.status = observed;
        }
    }
    Ok(Output {
        json: json!({
            "id": meta.id.as_str(),
            "item_type": meta.item_type,
            "name": meta.name,
            "status": meta.status,
        }),
        human: format!(
            "{} {} ({}): {}",
            meta.item_type,
            meta.id,
            meta.name.as_deref().unwrap_or("-"),
            meta.status
        ),
    })
}

/// `sf path <id>`
pub fn path(job_directory: &Path, id: &str) -> Result<Output> {
    let id = parse_id(id)?;
    let dir = layout::find_dir_by_id(job_directory, &id)
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    let display = dir.display().to_string();
    Ok(Output {
        json: json!({ "id": id.as_str(), "path": display }),
        human: display,
    })
}

/// `sf jobs`
pub fn jobs(job_directory: &Path) -> Result<Output> {
    let mut rows = Vec::new();
    let mut human = String::new();
    for (dir, meta) in experiments_in(job_directory) {
        let job_id = fs::read_to_string(dir.join(JOB_ID_FILE))
            .ok()
            .map(|s| s.trim().to_string());
        let _ = writeln!(
            human,
            "{}  {}  job={}  {}",
            meta.id,
            meta.name.as_deref().unwrap_or("-"),
            job_id.as_deref().unwrap_or("-"),
            meta.status
        );
        rows.push(json!({
            "id": meta.id.as_str(),
            "name": meta.name,
            "job_id": job_id,
            "status": meta.status,
        }));
    }
    if rows.is_empty() {
        human = "no experiments found".to_string();
    }
    Ok(Output {
        json: json!({ "experiments": rows }),
        human: human.trim_end().to_string(),
    })
}

/// `sf stop-container <id>`
pub fn stop_container(job_directory: &Path, container_id: &str) -> Result<Output> {
    let platform = ContainerPlatform::new(job_directory)?;
    platform.stop_container(container_id)?;
    Ok(Output {
        json: json!({ "stopped": container_id }),
        human: format!("stopped container {}", container_id),
    })
}

/// `sf get-latest`
pub fn get_latest(job_directory: &Path) -> Result<Output> {
    let latest = experiments_in(job_directory)
        .into_iter()
        .max_by_key(|(_, meta)| meta.created_at)
        .ok_or_else(|| Error::NotFound("no experiments in job directory".to_string()))?;
    let (dir, meta) = latest;
    Ok(Output {
        json: json!({
            "id": meta.id.as_str(),
            "name": meta.name,
            "created_at": meta.created_at,
            "status": meta.status,
            "path": dir.display().to_string(),
        }),
        human: format!(
            "{} {} ({})",
            meta.id,
            meta.name.as_deref().unwrap_or("-"),
            meta.created_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        ),
    })
}

/// `sf status-report`
pub fn status_report(job_directory: &Path) -> Result<Output> {
    let platform = FilePlatform::new(job_directory)?;
    let mut rows = Vec::new();
    let mut human = String::new();
    for (_, meta) in experiments_in(job_directory) {
        let experiment = platform.load_experiment(&meta.id)?;
        let counts = StatusCounts::of(&experiment);
        let _ = writeln!(
            human,
            "{}  {}  created={} running={} succeeded={} failed={}",
            meta.id,
            meta.name.as_deref().unwrap_or("-"),
            counts.created,
            counts.running,
            counts.succeeded,
            counts.failed
        );
        rows.push(json!({
            "id": meta.id.as_str(),
            "name": meta.name,
            "created": counts.created,
            "running": counts.running,
            "succeeded": counts.succeeded,
            "failed": counts.failed,
        }));
    }
    if rows.is_empty() {
        human = "no experiments found".to_string();
    }
    Ok(Output {
        json: json!({ "experiments": rows }),
        human: human.trim_end().to_string(),
    })
}

/// `sf clear-files`
///
/// Removes run artifacts (status sentinels, job ids, captured streams)
/// while leaving metadata, scripts, and assets in place.
pub fn clear_files(job_directory: &Path) -> Result<Output> {
    const ARTIFACTS: [&str; 4] = [JOB_STATUS_FILE, JOB_ID_FILE, STDOUT_FILE, STDERR_FILE];
    let mut removed = 0usize;
    for entry in WalkDir::new(job_directory)
        .min_depth(1)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() || !entry.path().join(METADATA_FILE).exists() {
            continue;
        }
        for artifact in ARTIFACTS {
            let target = entry.path().join(artifact);
            if target.exists() && fs::remove_file(&target).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(Output {
        json: json!({ "removed": removed }),
        human: format!("removed {} run artifacts", removed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::task::{CommandTask, Task};
    use crate::entities::{Experiment, Simulation};
    use crate::platform::{ExperimentOps, SimulationOps};
    use crate::test_utils::TestEnv;

    fn seeded_experiment(platform: &FilePlatform, name: &str) -> Experiment {
        let mut experiment = Experiment::named(name);
        platform.create_experiment(&mut experiment).unwrap();
        let mut simulation = Simulation::new(Task::Command(CommandTask::new("true", vec![])));
        platform
            .create_simulation(&experiment, &mut simulation)
            .unwrap();
        experiment.simulations.push(simulation);
        experiment
    }

    #[test]
    fn test_status_and_path() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let experiment = seeded_experiment(&platform, "alpha");
        let id = experiment.id().unwrap().to_string();

        let out = status(env.path(), &id).unwrap();
        assert_eq!(out.json["status"], json!("CREATED"));
        assert!(out.human.contains("alpha"));

        let out = path(env.path(), &id).unwrap();
        assert!(out.human.contains("alpha"));
        assert!(Path::new(out.human.as_str()).exists());
    }

    #[test]
    fn test_bad_id_is_invalid() {
        let env = TestEnv::new();
        let err = status(env.path(), "not-a-uuid").unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let env = TestEnv::new();
        let id = EntityId::generate().to_string();
        let err = status(env.path(), &id).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_jobs_and_report() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        seeded_experiment(&platform, "alpha");
        seeded_experiment(&platform, "beta");

        let out = jobs(env.path()).unwrap();
        assert_eq!(out.json["experiments"].as_array().unwrap().len(), 2);

        let out = status_report(env.path()).unwrap();
        let rows = out.json["experiments"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["created"], json!(1));
    }

    #[test]
    fn test_get_latest_orders_by_creation() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        seeded_experiment(&platform, "older");
        std::thread::sleep(std::time::Duration::from_millis(10));
        let newest = seeded_experiment(&platform, "newer");

        let out = get_latest(env.path()).unwrap();
        assert_eq!(
            out.json["id"],
            json!(newest.id().unwrap().as_str())
        );
    }

    #[test]
    fn test_clear_files_keeps_metadata() {
        let env = TestEnv::new();
        let platform = env.file_platform();
        let experiment = seeded_experiment(&platform, "alpha");
        let sim_id = experiment.simulations[0].id().unwrap().clone();
        let sim_dir = platform.entity_path(&sim_id).unwrap();
        fs::write(sim_dir.join(JOB_STATUS_FILE), "0").unwrap();
        fs::write(sim_dir.join(STDOUT_FILE), "out").unwrap();

        let out = clear_files(env.path()).unwrap();
        assert_eq!(out.json["removed"], json!(2));
        assert!(!sim_dir.join(JOB_STATUS_FILE).exists());
        assert!(sim_dir.join(METADATA_FILE).exists());
    }
}
