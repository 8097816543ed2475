//! Security hardening for the container entry process
//!
//! Two layers are applied in the forked child, before the identity switch
//! and exec of the entry command:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 1: CAPABILITY BOUNDING SET                               │
//! │  Cleared entirely. Even if the image ships a setuid-root        │
//! │  binary, the process tree can never regain root powers.         │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 2: SECCOMP DENYLIST                                      │
//! │  Administrative syscalls (mount, ptrace, module loading, ...)   │
//! │  fail with EPERM. Everything else is allowed: the entry         │
//! │  script is an opaque workload and cannot be allowlisted.        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Order inside `pre_exec`: chroot/chdir, drop bounding set, apply seccomp
//! (still privileged, so no no_new_privs dance), setgroups/setgid/setuid,
//! exec.

pub mod capabilities;
pub mod seccomp;

pub use capabilities::CapabilityDropper;
pub use seccomp::EntrySeccomp;
