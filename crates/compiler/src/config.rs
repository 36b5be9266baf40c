//! Compiler configuration
//!
//! Options that callers of the library can set without touching the
//! pipeline: the tree-level constant-folding pass and additional import
//! manifests mapping external symbols to DLLs.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Fold integer-constant expressions on the tree before code
    /// generation
    pub fold_constants: bool,

    /// Import manifests (TOML) to load in addition to the built-in
    /// kernel32/msvcrt tables
    pub import_manifest_paths: Vec<PathBuf>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Enable or disable constant folding (builder pattern)
    pub fn with_constant_folding(mut self, fold: bool) -> Self {
        self.fold_constants = fold;
        self
    }

    /// Add an import manifest path
    pub fn with_import_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_manifest_paths.push(path.into());
        self
    }

    /// Add multiple import manifest paths
    pub fn with_import_manifests(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.import_manifest_paths.extend(paths);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = CompilerConfig::new()
            .with_constant_folding(true)
            .with_import_manifest("gfx.toml")
            .with_import_manifest("audio.toml");
        assert!(config.fold_constants);
        assert_eq!(config.import_manifest_paths.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(!config.fold_constants);
        assert!(config.import_manifest_paths.is_empty());
    }
}
