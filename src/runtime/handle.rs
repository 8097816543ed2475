//! Container handle - one started container and its resources
//!
//! Each handle tracks a single entry process through its lifecycle:
//! Starting -> Running -> Exited(code) | Failed

use std::path::PathBuf;
use std::process::Child;
use std::time::Instant;

/// Status of a container process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Process spawned, not yet confirmed running
    Starting,
    /// Entry process is running
    Running,
    /// Entry process exited; the code is surfaced uninterpreted
    Exited(i32),
    /// Container could not be started or monitored
    Failed(String),
}

/// A single started container
pub struct ContainerHandle {
    /// Unique identifier (e.g., "ctr-01926abc...")
    pub container_id: String,
    /// Id of the image this container was started from
    pub image_id: String,
    /// The entry process
    pub process: Child,
    /// Private rootfs copy for this container
    pub rootfs: PathBuf,
    /// Current status
    pub status: ContainerStatus,
    /// When the container was started
    pub started_at: Instant,
}

impl ContainerHandle {
    pub fn new(container_id: String, image_id: String, process: Child, rootfs: PathBuf) -> Self {
        Self {
            container_id,
            image_id,
            process,
            rootfs,
            status: ContainerStatus::Starting,
            started_at: Instant::now(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.process.id()
    }

    pub fn mark_running(&mut self) {
        self.status = ContainerStatus::Running;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = ContainerStatus::Failed(error);
    }

    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Block until the entry process exits and return its exit code
    ///
    /// A signal death is reported as 128 + signal number, the shell
    /// convention. The code is not interpreted further; that is the
    /// caller's contract with whatever scheduled the container.
    pub fn wait(&mut self) -> std::io::Result<i32> {
        let status = self.process.wait()?;
        let code = exit_code(status);
        self.status = ContainerStatus::Exited(code);
        Ok(code)
    }

    /// Remove the container's private rootfs copy
    pub fn cleanup(&self) {
        if self.rootfs.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.rootfs) {
                tracing::warn!(
                    container = %self.container_id,
                    error = %e,
                    "failed to remove container rootfs"
                );
            }
        }
    }
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("container_id", &self.container_id)
            .field("image_id", &self.image_id)
            .field("status", &self.status)
            .field("age", &self.age())
            .finish()
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let mut handle = ContainerHandle::new(
            "ctr-test".to_string(),
            "ab".repeat(32),
            child,
            PathBuf::from("/nonexistent/rootfs"),
        );

        assert_eq!(handle.status, ContainerStatus::Starting);
        handle.mark_running();
        assert_eq!(handle.status, ContainerStatus::Running);

        let code = handle.wait().unwrap();
        assert_eq!(code, 0);
        assert_eq!(handle.status, ContainerStatus::Exited(0));
    }

    #[test]
    fn test_nonzero_exit_passthrough() {
        let child = std::process::Command::new("false").spawn().unwrap();
        let mut handle = ContainerHandle::new(
            "ctr-test".to_string(),
            "ab".repeat(32),
            child,
            PathBuf::from("/nonexistent/rootfs"),
        );
        assert_eq!(handle.wait().unwrap(), 1);
    }
}
