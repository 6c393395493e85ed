//! Semantic PRD invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::feature::is_valid_feature_id;
use crate::prd::{Prd, SCHEMA_VERSION};

/// Check semantic invariants not expressible in JSON Schema:
/// - supported `schema_version`
/// - well-formed `feature_id`
/// - no duplicate story ids
/// - `max_attempts > 0` when set
pub fn validate_invariants(prd: &Prd) -> Vec<String> {
    let mut errors = Vec::new();

    if prd.schema_version != SCHEMA_VERSION {
        errors.push(format!(
            "unsupported schema_version {} (expected {})",
            prd.schema_version, SCHEMA_VERSION
        ));
    }

    if !is_valid_feature_id(&prd.feature_id) {
        errors.push(format!("invalid feature_id '{}'", prd.feature_id));
    }

    let mut seen = HashSet::new();
    for story in &prd.stories {
        if !seen.insert(story.id.as_str()) {
            errors.push(format!("duplicate story id '{}'", story.id));
        }
        if story.max_attempts == Some(0) {
            errors.push(format!("{}: max_attempts must be > 0", story.id));
        }
    }

    errors
}
