//! cgroup v2 resource isolation for container processes
//!
//! Each started container may get its own cgroup under
//! `/sys/fs/cgroup/kiln/{container_id}/` with cpu and memory limits. The
//! kernel throttles the process past its cpu quota and OOM-kills it past its
//! memory limit; removal of the cgroup requires the process to be gone.
//!
//! ```text
//! /sys/fs/cgroup/                     ← cgroup v2 root
//! └── kiln/                           ← our namespace
//!     ├── ctr-.../                    ← per-container cgroup
//!     │   ├── cpu.max                 ← "{quota} {period}" in microseconds
//!     │   ├── memory.max              ← limit in bytes
//!     │   └── cgroup.procs            ← PIDs in this cgroup
//!     └── ctr-.../
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;

/// Base path for the cgroup v2 filesystem
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Our namespace within the cgroup hierarchy
const CGROUP_NAMESPACE: &str = "kiln";

/// cpu.max period, microseconds
const CPU_PERIOD_USEC: u64 = 100_000;

/// Resource limits for one container
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// CPU cores, fractional allowed (0.5 = half a core)
    pub cpu_cores: f64,
    /// Memory limit in bytes
    pub memory_bytes: u64,
}

impl ResourceLimits {
    /// Small service: half a core, 256 MB
    pub fn small() -> Self {
        Self {
            cpu_cores: 0.5,
            memory_bytes: 256 * 1024 * 1024,
        }
    }

    /// Default service size: 1 core, 1 GB
    pub fn medium() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_bytes: 1024 * 1024 * 1024,
        }
    }

    /// CPU-heavy service: 2 cores, 4 GB
    pub fn large() -> Self {
        Self {
            cpu_cores: 2.0,
            memory_bytes: 4 * 1024 * 1024 * 1024,
        }
    }

    pub fn custom(cpu_cores: f64, memory_mb: u64) -> Self {
        Self {
            cpu_cores,
            memory_bytes: memory_mb * 1024 * 1024,
        }
    }
}

/// Manages cgroup lifecycle for containers
///
/// Construction fails when cgroups v2 is unavailable or unwritable; the
/// runner treats that as "run without limits" rather than an error.
pub struct CgroupManager {
    /// Base path: /sys/fs/cgroup/kiln
    base_path: PathBuf,
}

impl CgroupManager {
    /// Create the kiln namespace and enable the cpu/memory controllers
    ///
    /// cgroups v2 requires controllers to be enabled in the parent's
    /// `cgroup.subtree_control` before children can use them.
    pub fn new() -> io::Result<Self> {
        let base_path = PathBuf::from(CGROUP_ROOT).join(CGROUP_NAMESPACE);

        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }
        fs::write(base_path.join("cgroup.subtree_control"), "+cpu +memory")?;

        Ok(Self { base_path })
    }

    fn container_path(&self, container_id: &str) -> PathBuf {
        self.base_path.join(container_id)
    }

    /// Create a cgroup for a container and write its limits
    pub fn create(&self, container_id: &str, limits: &ResourceLimits) -> io::Result<()> {
        let cgroup_path = self.container_path(container_id);
        fs::create_dir_all(&cgroup_path)?;

        let cpu_quota = (limits.cpu_cores * CPU_PERIOD_USEC as f64) as u64;
        fs::write(
            cgroup_path.join("cpu.max"),
            format!("{} {}", cpu_quota, CPU_PERIOD_USEC),
        )?;
        fs::write(
            cgroup_path.join("memory.max"),
            limits.memory_bytes.to_string(),
        )?;

        Ok(())
    }

    /// Move a freshly spawned process into the container's cgroup
    ///
    /// Limits apply from this point; call right after spawn.
    pub fn add_process(&self, container_id: &str, pid: u32) -> io::Result<()> {
        fs::write(
            self.container_path(container_id).join("cgroup.procs"),
            pid.to_string(),
        )
    }

    /// Remove a container's cgroup (the process must have exited)
    pub fn destroy(&self, container_id: &str) -> io::Result<()> {
        let cgroup_path = self.container_path(container_id);
        if cgroup_path.exists() {
            // rmdir, not recursive delete - the kernel requires this
            fs::remove_dir(&cgroup_path)?;
        }
        Ok(())
    }

    pub fn exists(&self, container_id: &str) -> bool {
        self.container_path(container_id).exists()
    }

    /// Current memory usage in bytes, from memory.current
    pub fn memory_usage(&self, container_id: &str) -> io::Result<u64> {
        let content =
            fs::read_to_string(self.container_path(container_id).join("memory.current"))?;
        content
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_presets() {
        let small = ResourceLimits::small();
        assert_eq!(small.cpu_cores, 0.5);
        assert_eq!(small.memory_bytes, 256 * 1024 * 1024);

        let medium = ResourceLimits::medium();
        assert_eq!(medium.cpu_cores, 1.0);
        assert_eq!(medium.memory_bytes, 1024 * 1024 * 1024);

        let large = ResourceLimits::large();
        assert_eq!(large.cpu_cores, 2.0);
    }

    #[test]
    fn test_custom_limits() {
        let custom = ResourceLimits::custom(1.5, 512);
        assert_eq!(custom.cpu_cores, 1.5);
        assert_eq!(custom.memory_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn test_cpu_quota_formatting() {
        // 0.5 cores on a 100ms period = 50000us quota
        let limits = ResourceLimits::small();
        let quota = (limits.cpu_cores * CPU_PERIOD_USEC as f64) as u64;
        assert_eq!(quota, 50_000);
    }
}
