//! Orchestration for `storyloop generate`: specs on disk to `prd.json`.
//!
//! Generation is idempotent. Structural fields refresh from the specs while
//! loop-managed fields carry forward by story id, so it is safe to re-run after
//! editing `spec.md` or `tasks.md` mid-feature.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::feature::validate_feature_id;
use crate::core::merge::{MergeInput, MergeReport, merge_prd};
use crate::core::spec_parse::{parse_spec, parse_tasks};
use crate::io::paths::FeaturePaths;
use crate::io::prd_store::{load_prd_if_exists, write_prd};
use crate::io::spec_store::read_spec_files;
use crate::prd::{Prd, Priority};

/// Outcome of `storyloop generate`.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub prd: Prd,
    pub report: MergeReport,
}

/// Parse the feature's specs, merge with the PRD on disk and write it back.
///
/// A missing required spec file is [`crate::error::LoopError::MissingSpecification`].
/// An unreadable existing PRD is [`crate::error::LoopError::PrdCorrupt`] and is
/// never overwritten.
#[instrument(skip_all, fields(feature_id = %feature.feature_id))]
pub fn generate(feature: &FeaturePaths) -> Result<GenerateOutcome> {
    validate_feature_id(&feature.feature_id)?;
    let specs = read_spec_files(feature)?;

    let spec = parse_spec(specs.get("spec.md").unwrap_or_default());
    let tasks = parse_tasks(specs.get("tasks.md").unwrap_or_default());
    let previous = load_prd_if_exists(feature)?;

    let (prd, report) = merge_prd(MergeInput {
        feature_id: &feature.feature_id,
        spec: &spec,
        tasks: &tasks,
        files: specs.files,
        previous: previous.as_ref(),
    });

    if prd.stories.is_empty() {
        warn!("no user stories found in spec.md");
    }
    if !report.dropped.is_empty() {
        warn!(dropped = ?report.dropped, "stories removed from spec.md were dropped");
    }
    for id in &report.defaulted_priority {
        warn!(story_id = %id, default = %Priority::default(), "no priority found");
    }
    if !report.orphan_tasks.is_empty() {
        warn!(tasks = ?report.orphan_tasks, "tasks reference unknown stories");
    }

    write_prd(&feature.prd_path, &prd)
        .with_context(|| format!("write PRD for {}", feature.feature_id))?;
    info!(
        stories = prd.stories.len(),
        added = report.added.len(),
        carried = report.carried.len(),
        dropped = report.dropped.len(),
        "PRD generated"
    );
    Ok(GenerateOutcome { prd, report })
}
