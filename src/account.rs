//! Service account provisioning
//!
//! Every image runs its process as a dedicated, unprivileged, system-level
//! account with a fixed numeric id. The account is rendered directly into the
//! staged rootfs (`etc/passwd`, `etc/group`) rather than by shelling out to
//! the base image's user tooling, so the result is byte-identical across
//! rebuilds and independent of which userland the base ships.
//!
//! The account gets no login shell and its home is the image working
//! directory. Ownership of the working directory is applied with chown when
//! the builder has the privilege to do so; in rootless builds it is recorded
//! in image metadata and realized by the runner's identity switch instead.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Shell entry that refuses interactive logins
const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";

/// The unprivileged identity a container process runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Account name (informational; the numeric id is the contract)
    pub name: String,
    /// Numeric user id, never 0
    pub uid: u32,
    /// Numeric group id for the account's primary group
    pub gid: u32,
}

impl Default for ServiceAccount {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            uid: 999,
            gid: 999,
        }
    }
}

impl ServiceAccount {
    /// Reject accounts that would run the process privileged
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.uid == 0 || self.gid == 0 {
            return Err(BuildError::Recipe(
                "service account must not use uid/gid 0".to_string(),
            ));
        }
        if self.name.is_empty() || self.name.contains(':') || self.name.contains('\n') {
            return Err(BuildError::Recipe(format!(
                "service account name '{}' is not a valid passwd entry",
                self.name
            )));
        }
        Ok(())
    }

    /// `user:group` string recorded in image metadata
    pub fn user_spec(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }

    /// passwd(5) line for this account; `home` is the image working directory
    pub fn passwd_line(&self, home: &str) -> String {
        format!(
            "{}:x:{}:{}:service account:{}:{}\n",
            self.name, self.uid, self.gid, home, NOLOGIN_SHELL
        )
    }

    /// group(5) line for the account's primary group
    pub fn group_line(&self) -> String {
        format!("{}:x:{}:\n", self.name, self.gid)
    }

    /// Render the account into a staged rootfs and take ownership of `workdir`
    ///
    /// Appends to `etc/passwd` and `etc/group`, creating them if the base
    /// ships without (minimal bases sometimes do). The chown of the working
    /// directory is attempted with the account's numeric ids; when the
    /// builder runs unprivileged the EPERM is downgraded to a debug log and
    /// the ids stay recorded in the image spec.
    pub fn provision(&self, rootfs: &Path, workdir_in_image: &str) -> Result<(), BuildError> {
        self.validate()?;

        let etc = rootfs.join("etc");
        fs::create_dir_all(&etc)?;

        let workdir_abs = rootfs.join(workdir_in_image.trim_start_matches('/'));

        append_entry(&etc.join("passwd"), &self.passwd_line(workdir_in_image))?;
        append_entry(&etc.join("group"), &self.group_line())?;

        match nix::unistd::chown(
            &workdir_abs,
            Some(nix::unistd::Uid::from_raw(self.uid)),
            Some(nix::unistd::Gid::from_raw(self.gid)),
        ) {
            Ok(()) => {
                tracing::debug!(uid = self.uid, gid = self.gid, "workdir ownership applied");
            }
            Err(nix::errno::Errno::EPERM) => {
                tracing::debug!(
                    uid = self.uid,
                    "rootless build: workdir ownership recorded in metadata only"
                );
            }
            Err(e) => return Err(BuildError::Io(std::io::Error::from(e))),
        }

        Ok(())
    }
}

fn append_entry(file: &Path, line: &str) -> Result<(), BuildError> {
    let mut f = OpenOptions::new().create(true).append(true).open(file)?;
    f.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_account_is_unprivileged() {
        let account = ServiceAccount::default();
        assert_ne!(account.uid, 0);
        assert_ne!(account.gid, 0);
        assert!(account.validate().is_ok());
        assert_eq!(account.user_spec(), "999:999");
    }

    #[test]
    fn test_root_account_rejected() {
        let account = ServiceAccount {
            name: "root".to_string(),
            uid: 0,
            gid: 0,
        };
        assert!(account.validate().is_err());
    }

    #[test]
    fn test_passwd_line_has_no_login_shell() {
        let account = ServiceAccount::default();
        let line = account.passwd_line("/app");
        assert_eq!(line, "app:x:999:999:service account:/app:/usr/sbin/nologin\n");
        assert_eq!(account.group_line(), "app:x:999:\n");
    }

    #[test]
    fn test_provision_writes_passwd_and_group() {
        let rootfs = TempDir::new().unwrap();
        fs::create_dir_all(rootfs.path().join("app")).unwrap();

        let account = ServiceAccount::default();
        account.provision(rootfs.path(), "/app").unwrap();

        let passwd = fs::read_to_string(rootfs.path().join("etc/passwd")).unwrap();
        assert!(passwd.contains("app:x:999:999"));
        let group = fs::read_to_string(rootfs.path().join("etc/group")).unwrap();
        assert!(group.contains("app:x:999:"));
    }

    #[test]
    fn test_provision_appends_to_existing_passwd() {
        let rootfs = TempDir::new().unwrap();
        fs::create_dir_all(rootfs.path().join("etc")).unwrap();
        fs::create_dir_all(rootfs.path().join("app")).unwrap();
        fs::write(
            rootfs.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/sh\n",
        )
        .unwrap();

        let account = ServiceAccount::default();
        account.provision(rootfs.path(), "/app").unwrap();

        let passwd = fs::read_to_string(rootfs.path().join("etc/passwd")).unwrap();
        assert!(passwd.starts_with("root:x:0:0"));
        assert!(passwd.contains("app:x:999:999"));
    }
}
