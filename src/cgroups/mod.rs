//! cgroup v2 resource limits for container processes

pub mod manager;

pub use manager::{CgroupManager, ResourceLimits};
