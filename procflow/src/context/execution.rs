//! Per-pipeline execution context.
//!
//! The context travels through pipeline construction instead of living in
//! process-wide state. Composite processes derive child contexts for their
//! inner pipelines, so a whole tree shares one run identity and one output
//! prefix.

use super::RunIdentity;
use crate::core::ConfigBlock;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Context shared by every node of a pipeline tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Run identity.
    identity: RunIdentity,
    /// Prefix applied to output file names (typically the input video's basename).
    output_prefix: Option<String>,
    /// Dotted path of enclosing pipelines, empty at the root.
    scope: Vec<String>,
}

impl PipelineContext {
    /// Creates a root context.
    #[must_use]
    pub fn new(identity: RunIdentity) -> Self {
        Self {
            identity,
            output_prefix: None,
            scope: Vec::new(),
        }
    }

    /// Sets the output prefix.
    #[must_use]
    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }

    /// Derives the context for a pipeline nested under `name`.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut scope = self.scope.clone();
        scope.push(name.into());
        Self {
            identity: self.identity.clone(),
            output_prefix: self.output_prefix.clone(),
            scope,
        }
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the output prefix.
    #[must_use]
    pub fn output_prefix(&self) -> Option<&str> {
        self.output_prefix.as_deref()
    }

    /// Returns the nesting path, e.g. `"tracker.homography"`.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scope.join(".")
    }

    /// Returns the nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scope.len()
    }

    /// Prefixes the file name stored under `key` with the output prefix.
    ///
    /// `dir/tracks.kw18` becomes `dir/<prefix>_tracks.kw18`. Returns
    /// `Ok(false)` and leaves the block alone when the value or the prefix
    /// is empty.
    pub fn prefix_path(&self, block: &mut ConfigBlock, key: &str) -> Result<bool, ConfigError> {
        let current: String = block.get(key)?;
        let Some(prefix) = self.output_prefix.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(false);
        };
        if current.is_empty() {
            return Ok(false);
        }

        let path = Path::new(&current);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ConfigError::invalid_value(key, "value has no file name"))?;
        let prefixed = path.with_file_name(format!("{prefix}_{file_name}"));
        block.set(key, prefixed.to_string_lossy().into_owned())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(path: &str) -> ConfigBlock {
        ConfigBlock::new().with_parameter("writer:filename", path, "Output file")
    }

    #[test]
    fn test_prefix_path() {
        let ctx = PipelineContext::new(RunIdentity::new()).with_output_prefix("clip01");
        let mut cfg = block("out/tracks.kw18");

        assert!(ctx.prefix_path(&mut cfg, "writer:filename").unwrap());
        assert_eq!(
            cfg.get::<String>("writer:filename").unwrap(),
            Path::new("out").join("clip01_tracks.kw18").to_string_lossy()
        );
    }

    #[test]
    fn test_prefix_path_without_prefix_is_noop() {
        let ctx = PipelineContext::new(RunIdentity::new());
        let mut cfg = block("tracks.kw18");
        assert!(!ctx.prefix_path(&mut cfg, "writer:filename").unwrap());
        assert_eq!(cfg.get::<String>("writer:filename").unwrap(), "tracks.kw18");
    }

    #[test]
    fn test_prefix_path_empty_value_is_noop() {
        let ctx = PipelineContext::default().with_output_prefix("clip01");
        let mut cfg = block("");
        assert!(!ctx.prefix_path(&mut cfg, "writer:filename").unwrap());
    }

    #[test]
    fn test_prefix_path_unknown_key() {
        let ctx = PipelineContext::default().with_output_prefix("clip01");
        let mut cfg = block("a.txt");
        assert!(ctx.prefix_path(&mut cfg, "missing").is_err());
    }

    #[test]
    fn test_child_shares_identity() {
        let root = PipelineContext::new(RunIdentity::new()).with_output_prefix("v");
        let child = root.child("tracker").child("homography");
        assert_eq!(child.identity(), root.identity());
        assert_eq!(child.scope(), "tracker.homography");
        assert_eq!(child.depth(), 2);
        assert_eq!(child.output_prefix(), Some("v"));
    }
}
