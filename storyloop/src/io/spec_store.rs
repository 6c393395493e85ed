//! Read-only access to a feature's specification directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::error::LoopError;
use crate::io::paths::FeaturePaths;

/// Files that must exist for a feature to be generated.
pub const REQUIRED_FILES: [&str; 3] = ["spec.md", "plan.md", "tasks.md"];

/// Optional single files picked up when present.
pub const OPTIONAL_FILES: [&str; 4] = [
    "data-model.md",
    "research.md",
    "quickstart.md",
    "checklists/requirements.md",
];

const CONTRACTS_DIR: &str = "contracts";

/// Raw contents of a feature's specification files.
#[derive(Debug, Clone)]
pub struct SpecFiles {
    /// Relative path (forward slashes) to verbatim contents.
    pub files: BTreeMap<String, String>,
}

impl SpecFiles {
    pub fn get(&self, relative: &str) -> Option<&str> {
        self.files.get(relative).map(String::as_str)
    }
}

/// Read every specification file that exists for the feature.
///
/// Fails with [`LoopError::MissingSpecification`] naming the first absent
/// required file.
#[instrument(skip_all, fields(feature_id = %paths.feature_id))]
pub fn read_spec_files(paths: &FeaturePaths) -> Result<SpecFiles> {
    for file in REQUIRED_FILES {
        let path = paths.dir.join(file);
        if !path.is_file() {
            return Err(LoopError::MissingSpecification {
                feature_id: paths.feature_id.clone(),
                file: file.to_string(),
                path,
            }
            .into());
        }
    }

    let mut files = BTreeMap::new();
    for file in REQUIRED_FILES.iter().chain(OPTIONAL_FILES.iter()) {
        let path = paths.dir.join(file);
        if path.is_file() {
            files.insert(file.to_string(), read_text(&path)?);
        }
    }

    let contracts = paths.dir.join(CONTRACTS_DIR);
    if contracts.is_dir() {
        let mut entries = fs::read_dir(&contracts)
            .with_context(|| format!("read dir {}", contracts.display()))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("list {}", contracts.display()))?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                let name = entry.file_name().to_string_lossy().into_owned();
                files.insert(format!("{CONTRACTS_DIR}/{name}"), read_text(&path)?);
            }
        }
    }

    debug!(file_count = files.len(), "spec files read");
    Ok(SpecFiles { files })
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
