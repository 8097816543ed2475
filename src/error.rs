//! Error taxonomy for image builds and container runs
//!
//! Every build error is fatal: the pipeline stops at the failing step and the
//! staging directory is discarded, so the store never holds a partial image.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building an image
#[derive(Debug, Error)]
pub enum BuildError {
    /// The pinned base runtime could not be obtained
    #[error("base image '{reference}' could not be fetched: {reason}")]
    BaseFetch { reference: String, reason: String },

    /// A referenced build input (manifest or entry script) does not exist
    #[error("build input missing: {0}")]
    MissingFile(PathBuf),

    /// The package installer failed to resolve or install a dependency
    #[error("dependency installation failed: {0}")]
    DependencyResolution(String),

    /// The recipe itself is invalid (bad reference, uid 0, relative workdir, ...)
    #[error("invalid recipe: {0}")]
    Recipe(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Image metadata could not be serialized or deserialized
    #[error("image metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Errors raised while starting a container from a committed image
#[derive(Debug, Error)]
pub enum RunError {
    /// The requested tag or image id is not present in the store
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The entry process could not be spawned
    #[error("failed to spawn entry process: {0}")]
    Spawn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("image metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}
