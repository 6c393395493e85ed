//! Feature identifier rules.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::LoopError;

static FEATURE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{3}-[a-z0-9]+(?:-[a-z0-9]+)*$").expect("feature id regex")
});

/// True for `<3-digit-number>-<kebab-slug>`, e.g. `001-event-notifications`.
pub fn is_valid_feature_id(feature_id: &str) -> bool {
    FEATURE_ID_RE.is_match(feature_id)
}

pub fn validate_feature_id(feature_id: &str) -> Result<(), LoopError> {
    if is_valid_feature_id(feature_id) {
        Ok(())
    } else {
        Err(LoopError::InvalidFeatureId(feature_id.to_string()))
    }
}
