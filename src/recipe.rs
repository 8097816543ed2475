//! Build recipes
//!
//! A recipe is the JSON input to `kiln build`. It names the pinned base, the
//! working directory, the service account, and the two opaque build inputs
//! (dependency manifest and entry script) relative to the build context.
//!
//! ```json
//! {
//!   "name": "annotation-worker",
//!   "base": "python:3.11-slim",
//!   "workdir": "/app",
//!   "account": { "name": "app", "uid": 999, "gid": 999 },
//!   "manifest": "requirements.txt",
//!   "entrypoint": "main.py",
//!   "interpreter": "python3"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::account::ServiceAccount;
use crate::error::BuildError;
use crate::image::BaseReference;

fn default_workdir() -> String {
    "/app".to_string()
}

fn default_manifest() -> String {
    "requirements.txt".to_string()
}

fn default_entrypoint() -> String {
    "main.py".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

/// Declarative description of one service image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecipe {
    /// Image name; also the default tag name
    pub name: String,
    /// Pinned base reference (`name:tag`)
    pub base: String,
    /// Absolute working directory inside the image
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Unprivileged identity the process runs as
    #[serde(default)]
    pub account: ServiceAccount,
    /// Dependency manifest, relative to the build context
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Entry script, relative to the build context
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Runtime interpreter invoked on the entry script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

impl ImageRecipe {
    /// Load and validate a recipe file
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BuildError::MissingFile(path.to_path_buf()),
            _ => BuildError::Io(e),
        })?;
        let recipe: Self = serde_json::from_slice(&bytes)?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// Check the recipe before any build step runs
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.name.is_empty() || self.name.contains(':') || self.name.contains('/') {
            return Err(BuildError::Recipe(format!(
                "image name '{}' is not usable as a tag",
                self.name
            )));
        }

        // Parsing enforces the version pin
        self.base_reference()?;
        self.account.validate()?;

        if !self.workdir.starts_with('/') || self.workdir == "/" {
            return Err(BuildError::Recipe(format!(
                "workdir '{}' must be an absolute path below /",
                self.workdir
            )));
        }

        for (field, value) in [("manifest", &self.manifest), ("entrypoint", &self.entrypoint)] {
            if value.is_empty() || value.starts_with('/') || value.contains("..") {
                return Err(BuildError::Recipe(format!(
                    "{} '{}' must be a relative path inside the build context",
                    field, value
                )));
            }
        }

        if self.interpreter.is_empty() {
            return Err(BuildError::Recipe("interpreter must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn base_reference(&self) -> Result<BaseReference, BuildError> {
        BaseReference::parse(&self.base)
    }

    /// The default command frozen into the image: interpreter + script path
    pub fn command(&self) -> Vec<String> {
        vec![self.interpreter.clone(), self.entrypoint.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageRecipe {
        serde_json::from_str(
            r#"{ "name": "annotation-worker", "base": "python:3.11-slim" }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_in() {
        let recipe = sample();
        assert_eq!(recipe.workdir, "/app");
        assert_eq!(recipe.manifest, "requirements.txt");
        assert_eq!(recipe.entrypoint, "main.py");
        assert_eq!(recipe.account.uid, 999);
        assert_eq!(
            recipe.command(),
            vec!["python3".to_string(), "main.py".to_string()]
        );
        assert!(recipe.validate().is_ok());
    }

    #[test]
    fn test_rejects_unpinned_base() {
        let mut recipe = sample();
        recipe.base = "python:latest".to_string();
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_rejects_relative_workdir() {
        let mut recipe = sample();
        recipe.workdir = "app".to_string();
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_rejects_escaping_inputs() {
        let mut recipe = sample();
        recipe.manifest = "../requirements.txt".to_string();
        assert!(recipe.validate().is_err());

        let mut recipe = sample();
        recipe.entrypoint = "/etc/passwd".to_string();
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_rejects_root_account() {
        let mut recipe = sample();
        recipe.account = ServiceAccount {
            name: "root".to_string(),
            uid: 0,
            gid: 0,
        };
        assert!(recipe.validate().is_err());
    }
}
