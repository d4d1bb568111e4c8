// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identifier and version validation.
//!
//! Two levels of strictness are used:
//!
//! - [`validate_function_id`] is the deploy-time rule for function ids:
//!   ASCII letters, digits and single dashes, 1 to 64 characters, starting
//!   with a letter and not ending with a dash.
//! - [`validate_storage_id`] is the key-safety rule applied before any
//!   content-store access: no empty strings, whitespace, control characters,
//!   path separators or `..` sequences.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, StoreError};
use crate::version::Version;

/// Maximum length of a function id.
pub const MAX_FUNCTION_ID_LEN: usize = 64;

static FUNCTION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z](?:[A-Za-z0-9]|-[A-Za-z0-9])*$").expect("function id pattern is valid")
});

fn invalid_id(id: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidId {
        id: id.to_string(),
        reason: reason.into(),
    }
}

/// Validate a function id for deployment.
pub fn validate_function_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(invalid_id(id, "must not be empty"));
    }
    if id.len() > MAX_FUNCTION_ID_LEN {
        return Err(invalid_id(
            id,
            format!("must be at most {} characters", MAX_FUNCTION_ID_LEN),
        ));
    }
    if id.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid_id(id, "must not start with a digit"));
    }
    if id.starts_with('-') || id.ends_with('-') {
        return Err(invalid_id(id, "must not start or end with a dash"));
    }
    if !FUNCTION_ID_RE.is_match(id) {
        return Err(invalid_id(
            id,
            "may only contain letters, digits and single dashes",
        ));
    }
    Ok(())
}

/// Validate an id (or slot name) before it becomes part of a storage key.
pub fn validate_storage_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(invalid_id(id, "must not be empty"));
    }
    if id.contains("..") {
        return Err(invalid_id(id, "must not contain path traversal sequences"));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(invalid_id(id, "must not contain path separators"));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid_id(id, "must not contain whitespace"));
    }
    Ok(())
}

/// Validate a version string used as a storage slot.
pub fn validate_slot(version: &str) -> Result<()> {
    validate_storage_id(version).map_err(|e| match e {
        StoreError::InvalidId { reason, .. } => StoreError::InvalidVersion {
            version: version.to_string(),
            reason,
        },
        other => other,
    })
}

/// Validate a semantic version string for deployment.
pub fn validate_semver(version: &str) -> Result<Version> {
    version
        .parse::<Version>()
        .map_err(|reason| StoreError::InvalidVersion {
            version: version.to_string(),
            reason,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_function_ids() {
        for id in ["a", "my-func", "add-ten", "Func2", "a-b-c-1"] {
            assert!(validate_function_id(id).is_ok(), "{} should be valid", id);
        }
        let max = format!("a{}", "b".repeat(MAX_FUNCTION_ID_LEN - 1));
        assert!(validate_function_id(&max).is_ok());
    }

    #[test]
    fn test_invalid_function_ids() {
        let too_long = "a".repeat(MAX_FUNCTION_ID_LEN + 1);
        for id in [
            "",
            "-func",
            "func-",
            "my--func",
            "1func",
            "my_func",
            "my func",
            "my.func",
            too_long.as_str(),
        ] {
            assert!(
                validate_function_id(id).is_err(),
                "{:?} should be invalid",
                id
            );
        }
    }

    #[test]
    fn test_storage_id_rejects_traversal_and_whitespace() {
        assert!(validate_storage_id("../etc").is_err());
        assert!(validate_storage_id("a/b").is_err());
        assert!(validate_storage_id("a\\b").is_err());
        assert!(validate_storage_id("a b").is_err());
        assert!(validate_storage_id("a\tb").is_err());
        assert!(validate_storage_id("").is_err());
        assert!(validate_storage_id("my-func").is_ok());
        assert!(validate_storage_id("my_func.v2").is_ok());
    }

    #[test]
    fn test_validate_slot_reports_version_error() {
        let err = validate_slot("1.0.0/../x").unwrap_err();
        assert!(matches!(err, StoreError::InvalidVersion { .. }));
    }

    #[test]
    fn test_validate_semver() {
        assert!(validate_semver("1.0.0").is_ok());
        assert!(validate_semver("1.0.0-rc.1+build.5").is_ok());
        assert!(matches!(
            validate_semver("v1"),
            Err(StoreError::InvalidVersion { .. })
        ));
    }
}
