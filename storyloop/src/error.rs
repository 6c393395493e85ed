//! Fatal error taxonomy for generator and loop invocations.
//!
//! These are raised through `anyhow` and recovered with `downcast_ref` where a
//! caller needs to branch on them. Story-level execution failures never appear
//! here: they are absorbed into the PRD as `last_error`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("invalid feature id '{0}' (expected <NNN>-<kebab-slug>, e.g. 001-event-notifications)")]
    InvalidFeatureId(String),

    #[error("missing specification file {file} for feature {feature_id} (expected at {path})")]
    MissingSpecification {
        feature_id: String,
        file: String,
        path: PathBuf,
    },

    #[error("PRD not found at {path} (run `storyloop generate {feature_id}` first)")]
    PrdNotFound { feature_id: String, path: PathBuf },

    #[error("PRD at {path} is corrupt: {reason}")]
    PrdCorrupt { path: PathBuf, reason: String },
}
