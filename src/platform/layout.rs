//! On-disk layout and metadata contract for filesystem-family backends.
//!
//! The job directory tree is the source of truth:
//!
//! ```text
//! <job_directory>/
//!   <suite-dir>/
//!     metadata.json
//!     <experiment-dir>/
//!       metadata.json
//!       Assets/
//!       batch.sh
//!       run_simulation.sh
//!       <simulation-dir>/
//!         metadata.json
//!         Assets -> ../Assets
//!         config.json          (JSON-configured tasks only)
//!         _run.sh
//!         job_id.txt
//!         job_status.txt
//!         stdout.txt
//!         stderr.txt
//! ```
//!
//! Directory names are `<sanitized-name>_<id>` (or `<KindPrefix>_<id>` when
//! unnamed) and must be treated as opaque except for the id suffix.

use crate::assets::{AssetCollection, AssetManifestEntry};
use crate::entities::task::Task;
use crate::entities::{EntityStatus, ItemType};
use crate::ids::{EntityId, TagMap};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Canonical per-entity metadata file.
pub const METADATA_FILE: &str = "metadata.json";
/// Experiment-level entry script.
pub const BATCH_SCRIPT: &str = "batch.sh";
/// Per-simulation launcher dispatched by the experiment entry.
pub const RUN_SIMULATION_SCRIPT: &str = "run_simulation.sh";
/// Simulation launcher executed inside the simulation directory.
pub const SIM_RUN_SCRIPT: &str = "_run.sh";
/// Backend job handle, written after commission.
pub const JOB_ID_FILE: &str = "job_id.txt";
/// Launcher-written status sentinel: `"0"`, `"-1"` or `"100"`.
pub const JOB_STATUS_FILE: &str = "job_status.txt";
/// Captured standard output.
pub const STDOUT_FILE: &str = "stdout.txt";
/// Captured standard error.
pub const STDERR_FILE: &str = "stderr.txt";
/// JSON-configured task parameter file.
pub const CONFIG_FILE: &str = "config.json";
/// Common-asset directory name (one physical copy per experiment).
pub const ASSETS_DIR: &str = "Assets";

/// Maximum visible length of a sanitized directory name stem.
const MAX_NAME_LEN: usize = 80;

/// Characters replaced by underscore in directory names.
const FORBIDDEN: &[char] = &[
    '/', '\\', ':', '\'', '"', '?', '<', '>', '*', '|', '\0', '(', ')',
];

/// Sanitize an entity name for use as a directory-name stem.
///
/// Replaces every forbidden character with `_`, collapses whitespace runs
/// to a single space, trims, and truncates to 80 characters. The mapping is
/// lossy; only the id suffix of a directory name is meaningful to
/// consumers.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut in_whitespace = false;
    for c in replaced.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                collapsed.push(' ');
            }
            in_whitespace = true;
        } else {
            collapsed.push(c);
            in_whitespace = false;
        }
    }

    collapsed.trim().chars().take(MAX_NAME_LEN).collect()
}

/// Directory name for an entity: `<sanitized-name>_<id>` when a non-empty
/// name exists, else `<KindPrefix>_<id>`.
pub fn dir_name(name: Option<&str>, item_type: ItemType, id: &EntityId) -> String {
    let stem = name
        .map(sanitize_name)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| item_type.dir_prefix().to_string());
    format!("{}_{}", stem, id)
}

/// Recover the entity id from a directory name's suffix.
pub fn id_from_dir_name(dir_name: &str) -> Option<EntityId> {
    let (stem, id_part) = dir_name.rsplit_once('_')?;
    if stem.is_empty() {
        return None;
    }
    EntityId::parse(id_part).ok()
}

/// Find the directory for an entity id anywhere under the job directory.
///
/// Directory names are opaque except for the id suffix, so this is the only
/// supported lookup.
pub fn find_dir_by_id(job_directory: &Path, id: &EntityId) -> Option<PathBuf> {
    let suffix = format!("_{}", id);
    WalkDir::new(job_directory)
        .min_depth(1)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .map(|n| n.ends_with(&suffix))
                    .unwrap_or(false)
        })
        .map(|e| e.into_path())
}

/// The on-disk record for one entity.
///
/// `uid` is an alias of `id` kept for schema stability. Unknown keys are
/// tolerated on read and preserved on rewrite via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub id: EntityId,
    /// Alias of `id`.
    pub uid: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    pub item_type: ItemType,
    pub status: EntityStatus,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Experiment-only: manifest of the common asset collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<AssetManifestEntry>>,
    /// Simulation-only: the task descriptor and its parameter map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    /// Unknown keys from newer schema versions.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EntityMetadata {
    /// Minimal record for an entity.
    pub fn new(id: EntityId, item_type: ItemType, status: EntityStatus) -> Self {
        Self {
            uid: id.clone(),
            id,
            parent_id: None,
            item_type,
            status,
            tags: TagMap::new(),
            name: None,
            created_at: Some(Utc::now()),
            status_changed_at: None,
            assets: None,
            task: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Write a metadata file atomically: write `metadata.json.tmp`, fsync,
/// rename over the final name.
pub fn write_metadata(entity_dir: &Path, metadata: &EntityMetadata) -> Result<()> {
    let tmp_path = entity_dir.join(format!("{}.tmp", METADATA_FILE));
    let final_path = entity_dir.join(METADATA_FILE);

    let body = serde_json::to_vec_pretty(metadata)?;
    let mut file = File::create(&tmp_path)?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Read an entity's metadata file.
pub fn read_metadata(entity_dir: &Path) -> Result<EntityMetadata> {
    let path = entity_dir.join(METADATA_FILE);
    let body = fs::read(&path)
        .map_err(|_| Error::NotFound(format!("no {} in {}", METADATA_FILE, entity_dir.display())))?;
    Ok(serde_json::from_slice(&body)?)
}

/// Map a `job_status.txt` body to the unified state machine.
///
/// `"0"` → Succeeded, `"-1"` → Failed, `"100"` → Running (in-flight
/// sentinel), absent → Created, anything else → Failed.
pub fn status_from_job_file(content: Option<&str>) -> EntityStatus {
    match content.map(str::trim) {
        None => EntityStatus::Created,
        Some("0") => EntityStatus::Succeeded,
        Some("-1") => EntityStatus::Failed,
        Some("100") => EntityStatus::Running,
        Some(_) => EntityStatus::Failed,
    }
}

/// Read a simulation directory's status sentinel.
pub fn read_job_status(simulation_dir: &Path) -> EntityStatus {
    let path = simulation_dir.join(JOB_STATUS_FILE);
    match fs::read_to_string(&path) {
        Ok(body) => status_from_job_file(Some(&body)),
        Err(_) => status_from_job_file(None),
    }
}

/// Write an experiment's common assets under `<experiment-dir>/Assets/`.
pub fn materialize_assets(assets: &AssetCollection, assets_dir: &Path) -> Result<()> {
    fs::create_dir_all(assets_dir)?;
    for asset in assets.iter() {
        let target = asset.target_path(assets_dir);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, asset.bytes()?)?;
    }
    Ok(())
}

/// Expose the experiment's common assets inside a simulation directory.
///
/// Preferred form is a relative symlink `Assets -> ../Assets`; when
/// symlinks are unavailable or disabled the whole directory is copied so
/// `Assets/<file>` still resolves to the same bytes.
pub fn link_assets(experiment_assets: &Path, simulation_dir: &Path, sym_link: bool) -> Result<()> {
    let link_path = simulation_dir.join(ASSETS_DIR);
    if link_path.exists() || link_path.is_symlink() {
        return Ok(());
    }

    if sym_link {
        match make_symlink(Path::new("..").join(ASSETS_DIR).as_path(), &link_path) {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(
                    simulation_dir = %simulation_dir.display(),
                    error = %e,
                    "symlink unavailable, falling back to asset copy"
                );
            }
        }
    }

    copy_dir_recursive(experiment_assets, &link_path)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    if !src.exists() {
        return Ok(());
    }
    for entry in WalkDir::new(src).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Other(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Count `metadata.json` files under a root (used by the directory-contract
/// checks and the status report).
pub fn count_metadata_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == METADATA_FILE)
        .count()
}
