//! Image metadata
//!
//! `ImageSpec` is the JSON document committed next to an image's rootfs. It
//! carries everything the runner needs: the runtime identity fixed at build
//! time, the working directory, and the default command. The image id is a
//! digest over the build inputs, so rebuilding from unchanged inputs yields
//! the same id.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::account::ServiceAccount;
use crate::error::{BuildError, RunError};

/// File name of the metadata document inside an image directory
pub const SPEC_FILE: &str = "image.json";

/// Runtime process configuration, fixed when the image is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// `uid:gid` the entry process runs as
    pub user: String,
    /// Absolute working directory inside the image
    pub working_dir: String,
    /// Default command: interpreter followed by the entry script path
    pub cmd: Vec<String>,
    /// Minimal environment for the entry process
    pub env: Vec<String>,
}

/// Committed image metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Content-derived image id (hex sha256 of the build inputs)
    pub id: String,
    /// The pinned base reference this image was built from
    pub base: String,
    /// The unprivileged account provisioned into the rootfs
    pub account: ServiceAccount,
    /// Process configuration applied at container start
    pub config: RuntimeConfig,
}

impl ImageSpec {
    pub fn save(&self, image_dir: &Path) -> Result<(), BuildError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(image_dir.join(SPEC_FILE), json)?;
        Ok(())
    }

    pub fn load(image_dir: &Path) -> Result<Self, RunError> {
        let bytes = std::fs::read(image_dir.join(SPEC_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Compute the deterministic image id from the build inputs
///
/// The digest covers the base reference, the identity and command the image
/// freezes, and the raw bytes of the manifest and entry script. Timestamps
/// are deliberately excluded: unchanged inputs must reproduce the same id.
pub fn compute_image_id(
    base: &str,
    account: &ServiceAccount,
    config: &RuntimeConfig,
    manifest: &[u8],
    entry: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    for field in [base, &account.name, &config.user, &config.working_dir] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(account.uid.to_be_bytes());
    hasher.update(account.gid.to_be_bytes());
    for part in &config.cmd {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    for var in &config.env {
        hasher.update(var.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update((manifest.len() as u64).to_be_bytes());
    hasher.update(manifest);
    hasher.update((entry.len() as u64).to_be_bytes());
    hasher.update(entry);
    hex::encode(hasher.finalize())
}
