//! PRD load/save with schema + invariant validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::error::LoopError;
use crate::io::paths::FeaturePaths;
use crate::prd::Prd;

const PRD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/prd.schema.json"
));

static PRD_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PRD_SCHEMA).map_err(|err| err.to_string())?;
    jsonschema::validator_for(&schema).map_err(|err| err.to_string())
});

/// Load and validate the feature's PRD.
///
/// Absent file: [`LoopError::PrdNotFound`]. Unparseable JSON, schema violations,
/// invariant violations or a `feature_id` that does not match the directory:
/// [`LoopError::PrdCorrupt`].
pub fn load_prd(paths: &FeaturePaths) -> Result<Prd> {
    load_prd_if_exists(paths)?.ok_or_else(|| {
        LoopError::PrdNotFound {
            feature_id: paths.feature_id.clone(),
            path: paths.prd_path.clone(),
        }
        .into()
    })
}

/// Like [`load_prd`], but a missing file is `Ok(None)`.
pub fn load_prd_if_exists(paths: &FeaturePaths) -> Result<Option<Prd>> {
    let path = &paths.prd_path;
    if !path.exists() {
        debug!(path = %path.display(), "no PRD on disk");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read PRD {}", path.display()))?;
    let prd = parse_prd(&contents).map_err(|reason| LoopError::PrdCorrupt {
        path: path.clone(),
        reason,
    })?;
    if prd.feature_id != paths.feature_id {
        return Err(LoopError::PrdCorrupt {
            path: path.clone(),
            reason: format!(
                "feature_id '{}' does not match directory '{}'",
                prd.feature_id, paths.feature_id
            ),
        }
        .into());
    }
    debug!(
        path = %path.display(),
        stories = prd.stories.len(),
        "PRD loaded"
    );
    Ok(Some(prd))
}

/// Parse and validate PRD JSON; the error string describes what is wrong.
pub fn parse_prd(contents: &str) -> std::result::Result<Prd, String> {
    let value: Value =
        serde_json::from_str(contents).map_err(|err| format!("invalid JSON: {err}"))?;

    let validator = PRD_VALIDATOR
        .as_ref()
        .map_err(|err| format!("invalid embedded schema: {err}"))?;
    let violations = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    if !violations.is_empty() {
        return Err(format!("schema validation failed: {}", violations.join("; ")));
    }

    let prd: Prd =
        serde_json::from_value(value).map_err(|err| format!("deserialize failed: {err}"))?;
    let errors = validate_invariants(&prd);
    if !errors.is_empty() {
        return Err(format!("invariants failed: {}", errors.join("; ")));
    }
    Ok(prd)
}

/// Atomically write the PRD (temp file + rename).
pub fn write_prd(path: &Path, prd: &Prd) -> Result<()> {
    let errors = validate_invariants(prd);
    if !errors.is_empty() {
        return Err(anyhow!("refusing to write invalid PRD: {}", errors.join("; ")));
    }
    debug!(path = %path.display(), stories = prd.stories.len(), "writing PRD");
    let mut buf = serde_json::to_string_pretty(prd).context("serialize PRD")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("PRD path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp PRD {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace PRD {}", path.display()))?;
    Ok(())
}
