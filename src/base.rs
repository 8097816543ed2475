//! Base runtime resolution
//!
//! The pinned base reference maps to a rootfs archive at
//! `<base-store>/<name>/<tag>.tar.gz`. When the archive is not cached locally
//! and a mirror is configured, it is streamed down and cached first, then
//! unpacked into the staging rootfs. Any failure along the way is the build's
//! base-fetch error; nothing later in the pipeline runs.
//!
//! Extraction never preserves archive ownership or permissions bits verbatim:
//! base archives carry root-owned files that an unprivileged builder cannot
//! recreate, so entries are unpacked under the builder's identity and the
//! runtime identity is enforced at container start instead.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use tar::Archive;
use tokio::io::AsyncWriteExt;

use crate::error::BuildError;
use crate::image::BaseReference;

/// Resolves pinned base references to an unpacked rootfs
pub struct BaseResolver {
    store_dir: PathBuf,
    mirror: Option<String>,
    client: reqwest::Client,
}

impl BaseResolver {
    /// `store_dir` holds cached archives; `mirror` is an optional HTTP base
    /// URL serving the same `<name>/<tag>.tar.gz` layout.
    pub fn new(store_dir: impl Into<PathBuf>, mirror: Option<String>) -> Self {
        Self {
            store_dir: store_dir.into(),
            mirror,
            client: reqwest::Client::new(),
        }
    }

    /// Unpack the base rootfs for `base` into `rootfs`
    pub async fn provision(&self, base: &BaseReference, rootfs: &Path) -> Result<(), BuildError> {
        let archive = self.store_dir.join(base.archive_path());

        if !archive.exists() {
            let Some(mirror) = &self.mirror else {
                return Err(BuildError::BaseFetch {
                    reference: base.to_string(),
                    reason: format!("archive not in base store ({})", archive.display()),
                });
            };
            self.download(base, mirror, &archive).await?;
        }

        tracing::info!(base = %base, "unpacking base rootfs");
        unpack_archive(&archive, rootfs).map_err(|e| BuildError::BaseFetch {
            reference: base.to_string(),
            reason: format!("unreadable base archive: {}", e),
        })
    }

    /// Stream the archive from the mirror into the local store
    async fn download(
        &self,
        base: &BaseReference,
        mirror: &str,
        archive: &Path,
    ) -> Result<(), BuildError> {
        let url = format!("{}/{}", mirror.trim_end_matches('/'), base.archive_path());
        tracing::info!(base = %base, url = %url, "fetching base archive from mirror");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BuildError::BaseFetch {
                reference: base.to_string(),
                reason: format!("mirror request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(BuildError::BaseFetch {
                reference: base.to_string(),
                reason: format!("mirror returned {} for {}", response.status(), url),
            });
        }

        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent)?;
        }

        // Stream to a temp file first so an interrupted download never looks
        // like a cached archive.
        let tmp = archive.with_extension("partial");
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BuildError::BaseFetch {
                reference: base.to_string(),
                reason: format!("mirror stream failed: {}", e),
            })?;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, archive)?;

        Ok(())
    }
}

/// Unpack a gzip-compressed tar archive into `rootfs`
fn unpack_archive(archive: &Path, rootfs: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let tar = GzDecoder::new(file);
    let mut ar = Archive::new(tar);

    // Base archives are extracted under the builder's own identity; runtime
    // identity comes from the image spec, not the archive.
    ar.set_preserve_permissions(false);
    ar.set_preserve_ownerships(false);

    for entry in ar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        // Whiteout markers only mean something to layered stores
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(".wh."))
        {
            continue;
        }

        let target = rootfs.join(&path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = entry.unpack(&target) {
            // Device nodes and similar entries cannot be recreated without
            // privilege; the entry process does not need them.
            tracing::debug!(path = %path.display(), error = %e, "skipping unextractable entry");
        }
    }
    Ok(())
}
