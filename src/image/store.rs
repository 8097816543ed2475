//! On-disk image store
//!
//! Layout under the store root:
//!
//! ```text
//! store/
//! ├── staging/<build-id>/        ← builds in progress (discarded on error)
//! │   ├── rootfs/
//! │   └── image.json             ← written just before commit
//! ├── images/<image-id>/         ← committed, immutable images
//! └── tags/<name>/<tag>          ← file holding the image id
//! ```
//!
//! A build is only visible once its staging directory has been renamed into
//! `images/` and the tag file swapped in; both are single rename operations,
//! so an aborted build never leaves a usable-looking partial image behind.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::BuildError;
use crate::image::spec::{ImageSpec, SPEC_FILE};

/// Content-addressed store of committed images
pub struct ImageStore {
    root: PathBuf,
}

/// A build in progress
///
/// Dropping an uncommitted staging directory removes it from disk, which is
/// what makes every build error leave the store unchanged.
pub struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    /// Directory the image spec is written into at commit time
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The root filesystem being assembled
    pub fn rootfs(&self) -> PathBuf {
        self.path.join("rootfs")
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to discard staging dir");
            }
        }
    }
}

impl ImageStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        for sub in ["staging", "images", "tags"] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    fn tag_path(&self, name: &str, tag: &str) -> PathBuf {
        self.root.join("tags").join(name).join(tag)
    }

    /// Start a new staged build with an empty rootfs
    pub fn begin_staging(&self) -> std::io::Result<StagingDir> {
        let path = self.root.join("staging").join(Uuid::now_v7().to_string());
        fs::create_dir_all(path.join("rootfs"))?;
        Ok(StagingDir {
            path,
            committed: false,
        })
    }

    /// Commit a staged build under its image id and optionally tag it
    ///
    /// Writes the spec into the staging directory, then renames the whole
    /// directory into `images/`. Rebuilding an id that already exists is a
    /// no-op apart from re-tagging: the staged copy is discarded and the
    /// committed image kept, since identical inputs produce identical trees.
    pub fn commit(
        &self,
        mut staging: StagingDir,
        spec: &ImageSpec,
        tag: Option<&str>,
    ) -> Result<PathBuf, BuildError> {
        spec.save(staging.path())?;

        let image_dir = self.images_dir().join(&spec.id);
        if image_dir.exists() {
            // Identical inputs produce identical trees; keep the committed
            // copy and discard the staged duplicate.
            tracing::debug!(id = %spec.id, "image already committed; discarding staged duplicate");
            fs::remove_dir_all(staging.path())?;
        } else {
            fs::rename(staging.path(), &image_dir)?;
        }
        staging.committed = true;

        if let Some(tag) = tag {
            self.tag_image(&spec.id, tag)?;
        }
        Ok(image_dir)
    }

    /// Point `name:tag` at an image id (atomic replace)
    pub fn tag_image(&self, id: &str, tag: &str) -> Result<(), BuildError> {
        let (name, version) = split_tag(tag);
        let tag_file = self.tag_path(name, version);
        if let Some(parent) = tag_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = tag_file.with_extension("tmp");
        fs::write(&tmp, id)?;
        fs::rename(&tmp, &tag_file)?;
        Ok(())
    }

    /// Resolve a tag or full image id to the committed image directory
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let by_id = self.images_dir().join(reference);
        if by_id.join(SPEC_FILE).exists() {
            return Some(by_id);
        }

        let (name, version) = split_tag(reference);
        let id = fs::read_to_string(self.tag_path(name, version)).ok()?;
        let dir = self.images_dir().join(id.trim());
        dir.join(SPEC_FILE).exists().then_some(dir)
    }

    /// All known tags with the ids they point at
    pub fn list(&self) -> Result<Vec<(String, String)>, BuildError> {
        let mut out = Vec::new();
        let tags_root = self.root.join("tags");
        for name_entry in fs::read_dir(&tags_root)? {
            let name_entry = name_entry?;
            if !name_entry.file_type()?.is_dir() {
                continue;
            }
            let name = name_entry.file_name().to_string_lossy().into_owned();
            for tag_entry in fs::read_dir(name_entry.path())? {
                let tag_entry = tag_entry?;
                let version = tag_entry.file_name().to_string_lossy().into_owned();
                let id = fs::read_to_string(tag_entry.path())?.trim().to_string();
                out.push((format!("{}:{}", name, version), id));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Remove a tag; the image itself is removed once nothing references it
    pub fn remove(&self, reference: &str) -> Result<(), BuildError> {
        let (name, version) = split_tag(reference);
        let tag_file = self.tag_path(name, version);

        let id = match fs::read_to_string(&tag_file) {
            Ok(id) => id.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuildError::Recipe(format!("no such tag: {}", reference)))
            }
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&tag_file)?;
        let _ = fs::remove_dir(tag_file.parent().unwrap_or(Path::new("/")));

        let still_tagged = self.list()?.iter().any(|(_, tagged)| *tagged == id);
        if !still_tagged {
            let image_dir = self.images_dir().join(&id);
            if image_dir.exists() {
                fs::remove_dir_all(image_dir)?;
            }
        }
        Ok(())
    }

    /// True if the store holds no committed images
    pub fn is_empty(&self) -> Result<bool, BuildError> {
        Ok(fs::read_dir(self.images_dir())?.next().is_none())
    }
}

/// Split `name:tag`, defaulting the tag so `kiln run worker` finds `worker:latest`
fn split_tag(reference: &str) -> (&str, &str) {
    reference.rsplit_once(':').unwrap_or((reference, "latest"))
}
