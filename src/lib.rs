//! kiln - deterministic builder and runner for single-process service images
//!
//! kiln assembles a root filesystem from a pinned base archive, provisions an
//! unprivileged service account, installs a dependency manifest, copies in
//! one entry script, and freezes the runtime identity and default command
//! into image metadata. Committed images are content-addressed and immutable;
//! a container started from one runs exactly one process, as the fixed
//! non-root user, with its exit code surfaced uninterpreted.
//!
//! # Modules
//!
//! - `recipe` - the JSON build input (base, workdir, account, inputs)
//! - `build` - the ordered, fail-fast build pipeline
//! - `base` - pinned base archive resolution (local store + HTTP mirror)
//! - `image` - references, metadata, and the on-disk store
//! - `account` - unprivileged service account provisioning
//! - `install` - dependency installation with the package cache disabled
//! - `runtime` - container start, identity switch, exit-code passthrough
//! - `security` - capability-bounding clear and seccomp denylist
//! - `cgroups` - optional cgroup v2 resource limits per container
//! - `metrics` - Prometheus build/run metrics
//!
//! # Quick Start
//!
//! ```ignore
//! use kiln::{ImageBuilder, ImageRecipe, KilnConfig};
//!
//! let config = KilnConfig::default();
//! let builder = ImageBuilder::new(&config)?;
//! let recipe = ImageRecipe::load(Path::new("kiln.json"))?;
//! let image = builder.build(&recipe, Path::new("."), None).await?;
//! ```

pub mod account;
pub mod base;
pub mod build;
pub mod cgroups;
pub mod config;
pub mod error;
pub mod image;
pub mod install;
pub mod logging;
pub mod metrics;
pub mod recipe;
pub mod runtime;
pub mod security;

// Re-export commonly used types at crate root for convenience
pub use account::ServiceAccount;
pub use build::{BuiltImage, ImageBuilder};
pub use cgroups::ResourceLimits;
pub use config::KilnConfig;
pub use error::{BuildError, RunError};
pub use image::{BaseReference, ImageSpec, ImageStore};
pub use recipe::ImageRecipe;
pub use runtime::{ContainerHandle, ContainerRunner, ContainerStatus, RunOptions};
