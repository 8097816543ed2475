//! Base image reference parsing
//!
//! A base reference is `name:tag`. The tag is the version pin: dependency
//! resolution behavior is tied to that exact runtime version, so a reference
//! without a tag (or tagged `latest`) is rejected up front rather than
//! resolving to whatever happens to be newest.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// A pinned reference to a base runtime image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseReference {
    /// Image name (e.g., "python")
    pub name: String,
    /// Version tag (e.g., "3.11-slim"); never "latest"
    pub tag: String,
}

impl BaseReference {
    /// Parse a `name:tag` reference, enforcing the version pin
    pub fn parse(reference: &str) -> Result<Self, BuildError> {
        let Some((name, tag)) = reference.rsplit_once(':') else {
            return Err(BuildError::Recipe(format!(
                "base reference '{}' has no tag; a pinned version is required",
                reference
            )));
        };

        if name.is_empty() || tag.is_empty() {
            return Err(BuildError::Recipe(format!(
                "base reference '{}' is malformed",
                reference
            )));
        }

        if tag == "latest" {
            return Err(BuildError::Recipe(format!(
                "base reference '{}' uses the floating 'latest' tag; pin an exact version",
                reference
            )));
        }

        if name.contains('/') || name.contains("..") {
            return Err(BuildError::Recipe(format!(
                "base reference '{}' may not contain path separators",
                reference
            )));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Relative archive path within a base store: `{name}/{tag}.tar.gz`
    pub fn archive_path(&self) -> String {
        format!("{}/{}.tar.gz", self.name, self.tag)
    }
}

impl std::fmt::Display for BaseReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pinned_reference() {
        let r = BaseReference::parse("python:3.11-slim").unwrap();
        assert_eq!(r.name, "python");
        assert_eq!(r.tag, "3.11-slim");
        assert_eq!(r.to_string(), "python:3.11-slim");
        assert_eq!(r.archive_path(), "python/3.11-slim.tar.gz");
    }

    #[test]
    fn test_reject_untagged() {
        assert!(matches!(
            BaseReference::parse("python"),
            Err(BuildError::Recipe(_))
        ));
    }

    #[test]
    fn test_reject_latest() {
        assert!(matches!(
            BaseReference::parse("python:latest"),
            Err(BuildError::Recipe(_))
        ));
    }

    #[test]
    fn test_reject_malformed() {
        assert!(BaseReference::parse(":3.11").is_err());
        assert!(BaseReference::parse("python:").is_err());
        assert!(BaseReference::parse("../escape:1.0").is_err());
    }
}
