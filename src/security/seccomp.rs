//! Seccomp BPF denylist for container entry processes
//!
//! The entry script is opaque, so an allowlist is off the table — there is no
//! way to know which syscalls a third-party interpreter workload needs.
//! Instead, administrative syscalls that a service process has no business
//! making are denied with EPERM, and everything else passes through.

use std::convert::TryInto;
use std::io;

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};

/// Builder for the entry-process syscall denylist
pub struct EntrySeccomp {
    denied_syscalls: Vec<i64>,
}

impl EntrySeccomp {
    /// Empty denylist; call `deny` to add syscalls
    pub fn new() -> Self {
        Self {
            denied_syscalls: Vec::new(),
        }
    }

    /// The standard denylist for service containers
    ///
    /// Categories: filesystem topology changes, kernel module loading,
    /// tracing other processes, host administration, namespace escapes.
    /// The identity-switch syscalls are NOT denied here — the runner itself
    /// calls them between fork and the point this filter is installed.
    pub fn with_entry_defaults() -> Self {
        let mut filter = Self::new();

        // Filesystem topology
        filter.deny(libc::SYS_mount);
        filter.deny(libc::SYS_umount2);
        filter.deny(libc::SYS_pivot_root);
        filter.deny(libc::SYS_chroot);

        // Kernel modules
        filter.deny(libc::SYS_init_module);
        filter.deny(libc::SYS_finit_module);
        filter.deny(libc::SYS_delete_module);

        // Debugging / process takeover
        filter.deny(libc::SYS_ptrace);
        filter.deny(libc::SYS_process_vm_readv);
        filter.deny(libc::SYS_process_vm_writev);

        // Host administration
        filter.deny(libc::SYS_reboot);
        filter.deny(libc::SYS_swapon);
        filter.deny(libc::SYS_swapoff);
        filter.deny(libc::SYS_sethostname);
        filter.deny(libc::SYS_setdomainname);

        // Namespace escapes
        filter.deny(libc::SYS_setns);
        filter.deny(libc::SYS_unshare);

        filter
    }

    /// Add a syscall to the denylist
    pub fn deny(&mut self, syscall: i64) -> &mut Self {
        self.denied_syscalls.push(syscall);
        self
    }

    /// Number of denied syscalls
    pub fn denied_count(&self) -> usize {
        self.denied_syscalls.len()
    }

    /// Compile the denylist into BPF bytecode
    ///
    /// Rules map each denied syscall to the match action (EPERM); anything
    /// not in the rules falls through to Allow.
    pub fn build(&self) -> Result<BpfProgram, io::Error> {
        let rules: Vec<(i64, Vec<SeccompRule>)> = self
            .denied_syscalls
            .iter()
            .map(|&syscall| (syscall, vec![])) // empty vec = unconditional match
            .collect();

        let arch: TargetArch = std::env::consts::ARCH
            .try_into()
            .map_err(|e: seccompiler::BackendError| {
                io::Error::new(io::ErrorKind::Other, e.to_string())
            })?;

        let filter = SeccompFilter::new(
            rules.into_iter().collect(),
            SeccompAction::Allow,                     // not listed → allowed
            SeccompAction::Errno(libc::EPERM as u32), // listed → denied with EPERM
            arch,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let bpf: BpfProgram = filter.try_into().map_err(|e: seccompiler::BackendError| {
            io::Error::new(io::ErrorKind::Other, e.to_string())
        })?;
        Ok(bpf)
    }

    /// Install the filter on the current process (irreversible, inherited
    /// across exec). Called from `pre_exec` in the runner.
    pub fn apply(&self) -> Result<(), io::Error> {
        let bpf = self.build()?;
        seccompiler::apply_filter(&bpf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(())
    }
}

impl Default for EntrySeccomp {
    fn default() -> Self {
        Self::with_entry_defaults()
    }
}
