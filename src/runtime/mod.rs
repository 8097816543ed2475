//! Container runner
//!
//! Starts exactly one process from a committed image: the runtime interpreter
//! invoked on the entry script path, under the image's fixed unprivileged
//! identity. Each container gets a private copy of the image rootfs; the
//! committed image itself is never written to.
//!
//! The identity switch happens in `pre_exec`, between fork and exec of the
//! entry command: chroot into the container rootfs, chdir to the working
//! directory, clear the capability bounding set, install the seccomp
//! denylist, then setgroups/setgid/setuid to the image's numeric ids.
//! Everything after exec runs with no path back to privilege.

pub mod handle;

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use uuid::Uuid;

use crate::cgroups::{CgroupManager, ResourceLimits};
use crate::config::KilnConfig;
use crate::error::RunError;
use crate::image::{ImageSpec, ImageStore};
use crate::metrics::CONTAINER_STARTS_TOTAL;
use crate::security::{CapabilityDropper, EntrySeccomp};

pub use handle::{ContainerHandle, ContainerStatus};

/// Options for starting a container
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Optional cgroup limits; None = no limits
    pub limits: Option<ResourceLimits>,
    /// Install the syscall denylist (on by default)
    pub seccomp: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limits: None,
            seccomp: true,
        }
    }
}

/// Everything needed to exec a container's entry process
///
/// Split out from `start` so the prepared invocation can be inspected
/// without privilege: tests assert on the plan, the spawn itself needs root
/// for chroot.
#[derive(Debug)]
pub struct LaunchPlan {
    pub container_id: String,
    pub image_id: String,
    /// Private rootfs copy for this container
    pub rootfs: PathBuf,
    /// argv[0]: the runtime interpreter
    pub program: String,
    /// argv[1..]: the entry script path
    pub args: Vec<String>,
    /// Minimal environment from the image spec
    pub env: Vec<(String, String)>,
    /// Working directory inside the rootfs
    pub workdir: String,
    pub uid: u32,
    pub gid: u32,
}

/// Starts containers from a store of committed images
pub struct ContainerRunner {
    store: ImageStore,
    containers_dir: PathBuf,
    /// None when cgroups v2 is unavailable; containers run without limits
    cgroups: Option<CgroupManager>,
}

impl ContainerRunner {
    pub fn new(config: &KilnConfig) -> Result<Self, RunError> {
        let store = ImageStore::open(&config.store_root)?;
        let containers_dir = config.store_root.join("containers");
        fs::create_dir_all(&containers_dir)?;

        let cgroups = match CgroupManager::new() {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(error = %e, "cgroups unavailable; containers run without limits");
                None
            }
        };

        Ok(Self {
            store,
            containers_dir,
            cgroups,
        })
    }

    /// Resolve an image reference and prepare a container invocation
    ///
    /// Copies the image rootfs into a private per-container directory and
    /// assembles the exec parameters from the image spec.
    pub fn plan(&self, reference: &str) -> Result<LaunchPlan, RunError> {
        let image_dir = self
            .store
            .resolve(reference)
            .ok_or_else(|| RunError::ImageNotFound(reference.to_string()))?;
        let spec = ImageSpec::load(&image_dir)?;

        let container_id = format!("ctr-{}", Uuid::now_v7());
        let rootfs = self.containers_dir.join(&container_id).join("rootfs");
        copy_tree(&image_dir.join("rootfs"), &rootfs)?;

        let (uid, gid) = parse_user(&spec.config.user)?;
        let mut cmd_iter = spec.config.cmd.iter();
        let program = cmd_iter
            .next()
            .cloned()
            .ok_or_else(|| RunError::Spawn("image has an empty command".to_string()))?;

        Ok(LaunchPlan {
            container_id,
            image_id: spec.id.clone(),
            rootfs,
            program,
            args: cmd_iter.cloned().collect(),
            env: spec
                .config
                .env
                .iter()
                .filter_map(|v| v.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
                .collect(),
            workdir: spec.config.working_dir.clone(),
            uid,
            gid,
        })
    }

    /// Spawn the planned entry process
    ///
    /// Requires the privilege to chroot and change identity; the spawned
    /// process itself never has it.
    pub fn start(&self, plan: LaunchPlan, options: &RunOptions) -> Result<ContainerHandle, RunError> {
        let rootfs = plan.rootfs.clone();
        let workdir = plan.workdir.clone();
        let uid = nix::unistd::Uid::from_raw(plan.uid);
        let gid = nix::unistd::Gid::from_raw(plan.gid);

        // Compile the filter before forking; pre_exec must not allocate
        let seccomp_bpf = if options.seccomp {
            Some(EntrySeccomp::with_entry_defaults().build()?)
        } else {
            None
        };
        let cap_dropper = CapabilityDropper::clear_all();

        let mut command = Command::new(&plan.program);
        command
            .args(&plan.args)
            .env_clear()
            .envs(plan.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // SAFETY: pre_exec runs after fork() but before exec() in the child.
        // Only syscall wrappers on pre-computed data; no allocation.
        unsafe {
            command.pre_exec(move || {
                nix::unistd::chroot(rootfs.as_path()).map_err(std::io::Error::from)?;
                nix::unistd::chdir(Path::new(&workdir)).map_err(std::io::Error::from)?;

                cap_dropper.apply()?;
                if let Some(bpf) = &seccomp_bpf {
                    seccompiler::apply_filter(bpf).map_err(|e| {
                        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
                    })?;
                }

                nix::unistd::setgroups(&[]).map_err(std::io::Error::from)?;
                nix::unistd::setgid(gid).map_err(std::io::Error::from)?;
                nix::unistd::setuid(uid).map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let process = command
            .spawn()
            .map_err(|e| RunError::Spawn(format!("{}: {}", plan.program, e)))?;

        let pid = process.id();
        if let (Some(cgroups), Some(limits)) = (&self.cgroups, &options.limits) {
            if let Err(e) = cgroups.create(&plan.container_id, limits) {
                tracing::warn!(container = %plan.container_id, error = %e, "cgroup create failed");
            } else if let Err(e) = cgroups.add_process(&plan.container_id, pid) {
                tracing::warn!(container = %plan.container_id, error = %e, "cgroup attach failed");
            }
        }

        CONTAINER_STARTS_TOTAL.inc();
        tracing::info!(
            container = %plan.container_id,
            image = %plan.image_id,
            pid,
            uid = plan.uid,
            "container started"
        );

        let mut handle = ContainerHandle::new(plan.container_id, plan.image_id, process, plan.rootfs);
        handle.mark_running();
        Ok(handle)
    }

    /// Start a container, wait for it, clean up, and return the exit code
    pub fn run(&self, reference: &str, options: &RunOptions) -> Result<i32, RunError> {
        let plan = self.plan(reference)?;
        let mut handle = self.start(plan, options)?;

        let code = handle.wait()?;
        tracing::info!(container = %handle.container_id, code, "container exited");

        if let Some(cgroups) = &self.cgroups {
            if cgroups.exists(&handle.container_id) {
                if let Err(e) = cgroups.destroy(&handle.container_id) {
                    tracing::warn!(container = %handle.container_id, error = %e, "cgroup destroy failed");
                }
            }
        }
        handle.cleanup();
        let _ = fs::remove_dir(self.containers_dir.join(&handle.container_id));

        Ok(code)
    }
}

/// `uid:gid` from the image spec
fn parse_user(user: &str) -> Result<(u32, u32), RunError> {
    let parse = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| RunError::Spawn(format!("image user '{}' is not numeric", user)))
    };
    match user.split_once(':') {
        Some((uid, gid)) => Ok((parse(uid)?, parse(gid)?)),
        None => {
            let uid = parse(user)?;
            Ok((uid, uid))
        }
    }
}

/// Recursive copy preserving file modes and symlinks
///
/// Plain walk, no reflinks: image rootfs trees are small and the copy is what
/// gives each container its own mutable filesystem.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
