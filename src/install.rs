//! Dependency installation
//!
//! Declared dependencies are installed into the image working directory with
//! the package cache disabled, so the entry script resolves its imports from
//! its own directory and the committed image carries no installer state.
//! The installer is the runtime's own package manager invoked as a child
//! process; any non-zero exit aborts the build.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::BuildError;

/// How many trailing installer log lines to surface in the error
const STDERR_TAIL_LINES: usize = 8;

/// Runs the package installer against a staged rootfs
pub struct DependencyInstaller {
    /// Test hook: replaces the `interpreter -m pip install ...` invocation
    /// with `<program> <manifest> <target>`.
    override_program: Option<PathBuf>,
}

impl DependencyInstaller {
    pub fn new(override_program: Option<PathBuf>) -> Self {
        Self { override_program }
    }

    /// The argv this installer will execute
    pub fn argv(&self, interpreter: &str, manifest: &Path, target: &Path) -> Vec<String> {
        match &self.override_program {
            Some(program) => vec![
                program.display().to_string(),
                manifest.display().to_string(),
                target.display().to_string(),
            ],
            None => vec![
                interpreter.to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "--no-cache-dir".to_string(),
                "--requirement".to_string(),
                manifest.display().to_string(),
                "--target".to_string(),
                target.display().to_string(),
            ],
        }
    }

    /// Install the manifest's dependencies into `target`
    pub async fn install(
        &self,
        interpreter: &str,
        manifest: &Path,
        target: &Path,
    ) -> Result<(), BuildError> {
        let argv = self.argv(interpreter, manifest, target);
        tracing::info!(installer = %argv.join(" "), "installing dependencies");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                BuildError::DependencyResolution(format!(
                    "installer '{}' could not be started: {}",
                    argv[0], e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::DependencyResolution(format!(
                "installer exited with {}: {}",
                output.status,
                tail(&stderr)
            )));
        }

        Ok(())
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_argv_disables_cache() {
        let installer = DependencyInstaller::new(None);
        let argv = installer.argv(
            "python3",
            Path::new("/stage/app/requirements.txt"),
            Path::new("/stage/app"),
        );
        assert_eq!(argv[0], "python3");
        assert!(argv.contains(&"--no-cache-dir".to_string()));
        assert!(argv.contains(&"/stage/app/requirements.txt".to_string()));
        // deps land in the workdir, next to the entry script
        assert_eq!(argv.last().unwrap(), "/stage/app");
    }

    #[test]
    fn test_override_argv() {
        let installer = DependencyInstaller::new(Some(PathBuf::from("/bin/true")));
        let argv = installer.argv("python3", Path::new("m.txt"), Path::new("t"));
        assert_eq!(argv, vec!["/bin/true", "m.txt", "t"]);
    }

    #[tokio::test]
    async fn test_failing_installer_maps_to_dependency_error() {
        let installer = DependencyInstaller::new(Some(PathBuf::from("/bin/false")));
        let err = installer
            .install("python3", Path::new("m.txt"), Path::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::DependencyResolution(_)));
    }

    #[tokio::test]
    async fn test_missing_installer_maps_to_dependency_error() {
        let installer =
            DependencyInstaller::new(Some(PathBuf::from("/nonexistent/installer-binary")));
        let err = installer
            .install("python3", Path::new("m.txt"), Path::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::DependencyResolution(_)));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let text = (0..20).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        let t = tail(&text);
        assert!(t.contains("line19"));
        assert!(!t.contains("line5"));
    }
}
