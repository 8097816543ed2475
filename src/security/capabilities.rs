//! Capability bounding-set clearing
//!
//! The runner switches the child to the image's unprivileged uid before exec,
//! which already empties the effective and permitted sets. Clearing the
//! bounding set on top of that closes the remaining hole: a setuid-root
//! binary inside the image could otherwise hand root powers back to the
//! process tree. With an empty bounding set there is nothing left to regain.

use std::io;

use caps::{CapSet, Capability};

/// Drops capabilities from the process bounding set
pub struct CapabilityDropper {
    caps_to_drop: Vec<Capability>,
}

impl CapabilityDropper {
    /// A dropper that clears the entire bounding set
    pub fn clear_all() -> Self {
        Self {
            caps_to_drop: caps::all().into_iter().collect(),
        }
    }

    /// Number of capabilities scheduled for dropping
    pub fn drop_count(&self) -> usize {
        self.caps_to_drop.len()
    }

    /// Remove the configured capabilities from the bounding set
    ///
    /// Called from `pre_exec` in the forked child. Capabilities already
    /// absent from the bounding set are skipped silently, so this works
    /// whether the runner started privileged or not.
    pub fn apply(&self) -> Result<(), io::Error> {
        for &cap in &self.caps_to_drop {
            let in_bounding = caps::has_cap(None, CapSet::Bounding, cap)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            if !in_bounding {
                continue;
            }
            caps::drop(None, CapSet::Bounding, cap)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        }
        Ok(())
    }
}

/// Snapshot of the current bounding set, for logging
pub fn current_bounding_caps() -> Vec<String> {
    caps::read(None, CapSet::Bounding)
        .map(|set| set.into_iter().map(|c| c.to_string()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_all_covers_every_capability() {
        let dropper = CapabilityDropper::clear_all();
        // Linux defines ~40 capabilities; make sure nothing was filtered out
        assert!(dropper.drop_count() >= 38);
    }

    #[test]
    fn test_bounding_snapshot_is_readable() {
        // Reading the bounding set needs no privilege
        let _ = current_bounding_caps();
    }
}
