//! Simforge - a distributed simulation-experiment orchestrator.
//!
//! This library provides the core functionality for the `sf` CLI tool and
//! for programmatic use: an entity model (Suite / Experiment / Simulation),
//! a lazy parameter-sweep expansion engine, and a uniform platform
//! abstraction implemented by four backends (local filesystem, container,
//! Slurm, remote HPC).

pub mod assets;
pub mod cli;
pub mod commands;
pub mod config;
pub mod entities;
pub mod ids;
pub mod logging;
pub mod platform;
pub mod status;
pub mod sweep;


/// Library-level error type for Simforge operations.
///
/// Sweep construction errors are fatal at build time, asset errors at
/// assembly time, and backend errors carry the entity id and platform name
/// involved so failures can be traced across backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid callback signature: {0}")]
    InvalidCallbackSignature(String),

    #[error("Arm shape mismatch: pair combination requires equal lengths ({0})")]
    ArmShapeMismatch(String),

    #[error("Unknown sweep parameter '{0}'")]
    UnknownSweepParameter(String),

    #[error("Parameter arity mismatch: {0}")]
    ParameterArityMismatch(String),

    #[error("Duplicate asset: {relative_path}/{filename}")]
    DuplicateAsset {
        relative_path: String,
        filename: String,
    },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Hook failed for entity {entity_id} on platform {platform}: {cause}")]
    HookFailure {
        entity_id: String,
        platform: String,
        cause: String,
    },

    #[error("Backend unavailable on platform {platform} after {attempts} attempt(s): {cause}")]
    BackendUnavailable {
        platform: String,
        attempts: u32,
        cause: String,
    },

    #[error("Backend rejected entity {entity_id} on platform {platform}: {cause}")]
    BackendRejection {
        entity_id: String,
        platform: String,
        cause: String,
    },

    #[error("Timeout exceeded waiting on entity {0}")]
    TimeoutExceeded(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Permission denied on job directory: {0}")]
    PermissionDenied(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("ID already assigned for entity {0}; ids are immutable after persistence")]
    IdReassigned(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Simforge operations.
pub type Result<T> = std::result::Result<T, Error>;
