//! Canonical on-disk locations for a repository and its features.

use std::path::{Path, PathBuf};

use crate::io::config::LoopConfig;

/// File name of the PRD inside a feature directory.
pub const PRD_FILE: &str = "prd.json";

/// Repository-level paths derived from the config.
#[derive(Debug, Clone)]
pub struct RepoPaths {
    pub root: PathBuf,
    pub specs_dir: PathBuf,
    pub state_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

/// Paths for one feature.
#[derive(Debug, Clone)]
pub struct FeaturePaths {
    pub feature_id: String,
    pub dir: PathBuf,
    pub prd_path: PathBuf,
    pub iterations_dir: PathBuf,
}

impl RepoPaths {
    pub fn new(root: impl Into<PathBuf>, config: &LoopConfig) -> Self {
        let root = root.into();
        let state_dir = root.join(&config.state_dir);
        Self {
            specs_dir: root.join(&config.specs_dir),
            iterations_dir: state_dir.join("iterations"),
            gitignore_path: state_dir.join(".gitignore"),
            state_dir,
            root,
        }
    }

    pub fn feature(&self, feature_id: &str) -> FeaturePaths {
        let dir = self.specs_dir.join(feature_id);
        FeaturePaths {
            feature_id: feature_id.to_string(),
            prd_path: dir.join(PRD_FILE),
            iterations_dir: self.iterations_dir.join(feature_id),
            dir,
        }
    }

    /// Path of `path` relative to the repo root (falls back to `path` itself).
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_paths_follow_config_dirs() {
        let mut config = LoopConfig::default();
        config.specs_dir = PathBuf::from("docs/specs");
        let repo = RepoPaths::new("/repo", &config);
        let feature = repo.feature("001-alerts");

        assert_eq!(feature.dir, Path::new("/repo/docs/specs/001-alerts"));
        assert_eq!(feature.prd_path, Path::new("/repo/docs/specs/001-alerts/prd.json"));
        assert_eq!(
            feature.iterations_dir,
            Path::new("/repo/.storyloop/iterations/001-alerts")
        );
        assert_eq!(repo.gitignore_path, Path::new("/repo/.storyloop/.gitignore"));
        assert_eq!(
            repo.relative(&feature.prd_path),
            Path::new("docs/specs/001-alerts/prd.json")
        );
    }
}
