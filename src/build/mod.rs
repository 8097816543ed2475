//! The image build pipeline
//!
//! `ImageBuilder::build` runs the ordered sequence that turns a recipe and a
//! build context into a committed image. Every step is a precondition for the
//! next and every error is fatal: the staging directory is dropped and the
//! store keeps whatever it had before. There is no retry logic and no
//! partial-failure recovery.
//!
//! Step order (each numbered step maps to one log line):
//!
//! 1. resolve the pinned base and unpack it into a fresh staging rootfs
//! 2. create the working directory
//! 3. provision the unprivileged service account, owner of the workdir
//! 4. copy the dependency manifest into the workdir
//! 5. install declared dependencies, package cache disabled
//! 6. copy the entry script into the workdir
//! 7. fix the runtime identity to the account's numeric id (metadata)
//! 8. record the default command: interpreter + entry script (metadata)
//!
//! then commit: compute the content-derived image id, atomically rename the
//! staging directory into the store, and point the tag at the id.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::base::BaseResolver;
use crate::config::KilnConfig;
use crate::error::BuildError;
use crate::image::spec::{compute_image_id, ImageSpec, RuntimeConfig};
use crate::image::{ImageStore, StagingDir};
use crate::install::DependencyInstaller;
use crate::metrics::{BUILDS_TOTAL, BUILD_DURATION};
use crate::recipe::ImageRecipe;

/// Search path handed to entry processes; nothing else is inherited
const DEFAULT_PATH: &str = "PATH=/usr/local/bin:/usr/bin:/bin";

/// A committed image, as returned by a successful build
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub id: String,
    pub tag: String,
    pub path: PathBuf,
    pub spec: ImageSpec,
}

/// Executes build pipelines against one store
pub struct ImageBuilder {
    store: ImageStore,
    base: BaseResolver,
    installer: DependencyInstaller,
}

impl ImageBuilder {
    pub fn new(config: &KilnConfig) -> Result<Self, BuildError> {
        Ok(Self {
            store: ImageStore::open(&config.store_root)?,
            base: BaseResolver::new(&config.base_store, config.base_mirror.clone()),
            installer: DependencyInstaller::new(config.installer_override.clone()),
        })
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Build `recipe` from the files in `context`, tagging the result
    ///
    /// `tag` defaults to `{recipe.name}:latest`.
    pub async fn build(
        &self,
        recipe: &ImageRecipe,
        context: &Path,
        tag: Option<&str>,
    ) -> Result<BuiltImage, BuildError> {
        let start = Instant::now();
        let result = self.run_pipeline(recipe, context, tag).await;

        match &result {
            Ok(image) => {
                BUILD_DURATION.observe(start.elapsed().as_secs_f64());
                BUILDS_TOTAL.with_label_values(&["ok"]).inc();
                tracing::info!(
                    id = %image.id,
                    tag = %image.tag,
                    elapsed = ?start.elapsed(),
                    "image committed"
                );
            }
            Err(e) => {
                BUILDS_TOTAL.with_label_values(&[outcome_label(e)]).inc();
                tracing::error!(error = %e, "build failed; no image produced");
            }
        }
        result
    }

    async fn run_pipeline(
        &self,
        recipe: &ImageRecipe,
        context: &Path,
        tag: Option<&str>,
    ) -> Result<BuiltImage, BuildError> {
        recipe.validate()?;
        let base_ref = recipe.base_reference()?;

        let staging = self.store.begin_staging()?;
        let rootfs = staging.rootfs();

        // 1. pinned base runtime
        tracing::info!(base = %base_ref, "step 1/8: resolving base runtime");
        self.base.provision(&base_ref, &rootfs).await?;

        // 2. working directory, execution context for everything below
        tracing::info!(workdir = %recipe.workdir, "step 2/8: creating working directory");
        let workdir = rootfs.join(recipe.workdir.trim_start_matches('/'));
        fs::create_dir_all(&workdir)?;

        // 3. unprivileged service account owning the workdir
        tracing::info!(uid = recipe.account.uid, "step 3/8: provisioning service account");
        recipe.account.provision(&rootfs, &recipe.workdir)?;

        // 4. dependency manifest; must exist before anything later runs
        tracing::info!(manifest = %recipe.manifest, "step 4/8: copying dependency manifest");
        let manifest_bytes = copy_input(context, &recipe.manifest, &workdir)?;
        let staged_manifest = workdir.join(&recipe.manifest);

        // 5. install dependencies next to the future entry script
        tracing::info!("step 5/8: installing dependencies");
        self.installer
            .install(&recipe.interpreter, &staged_manifest, &workdir)
            .await?;

        // 6. entry script, only after its imports are satisfiable
        tracing::info!(entrypoint = %recipe.entrypoint, "step 6/8: copying entry script");
        let entry_bytes = copy_input(context, &recipe.entrypoint, &workdir)?;

        // 7 + 8. freeze identity and default command into metadata
        tracing::info!(user = %recipe.account.user_spec(), "step 7/8: fixing runtime identity");
        let config = RuntimeConfig {
            user: recipe.account.user_spec(),
            working_dir: recipe.workdir.clone(),
            cmd: recipe.command(),
            env: vec![
                DEFAULT_PATH.to_string(),
                format!("HOME={}", recipe.workdir),
            ],
        };
        tracing::info!(cmd = ?config.cmd, "step 8/8: recording default command");

        let id = compute_image_id(
            &recipe.base,
            &recipe.account,
            &config,
            &manifest_bytes,
            &entry_bytes,
        );
        let spec = ImageSpec {
            id: id.clone(),
            base: recipe.base.clone(),
            account: recipe.account.clone(),
            config,
        };

        let tag = tag
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:latest", recipe.name));
        let path = self.commit(staging, &spec, &tag)?;

        Ok(BuiltImage { id, tag, path, spec })
    }

    fn commit(
        &self,
        staging: StagingDir,
        spec: &ImageSpec,
        tag: &str,
    ) -> Result<PathBuf, BuildError> {
        self.store.commit(staging, spec, Some(tag))
    }
}

/// Copy one opaque build input into the staged workdir, returning its bytes
fn copy_input(context: &Path, relative: &str, workdir: &Path) -> Result<Vec<u8>, BuildError> {
    let source = context.join(relative);
    let bytes = fs::read(&source).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BuildError::MissingFile(source.clone()),
        _ => BuildError::Io(e),
    })?;

    let target = workdir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, &bytes)?;
    Ok(bytes)
}

/// Metric label for a failed build
fn outcome_label(e: &BuildError) -> &'static str {
    match e {
        BuildError::BaseFetch { .. } => "base_fetch",
        BuildError::MissingFile(_) => "missing_file",
        BuildError::DependencyResolution(_) => "dependency_resolution",
        BuildError::Recipe(_) => "recipe",
        BuildError::Io(_) => "io",
        BuildError::Metadata(_) => "metadata",
    }
}
