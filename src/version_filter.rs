//! # Version Filter
//!
//! Selects which release tags are built.
//!
//! A filter is chosen by the `versionFilter.impl` field of the `Repository`
//! spec. Tags listed in `omitVersions` are always dropped afterwards.
//!
//! ```rust
//! use release_pipeline_controller::version_filter::{SemverFilter, VersionFilter};
//!
//! let filter = SemverFilter::new(">= 1.0.0").unwrap();
//! assert!(filter.matches("v1.0.1").unwrap());
//! assert!(!filter.matches("v0.9.9").unwrap());
//! ```

use crate::crd::VersionFilterSpec;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Name of the semver filter implementation
pub const SEMVER_IMPL: &str = "semver";

#[derive(Debug, Error)]
pub enum VersionFilterError {
    #[error("unknown version filter implementation '{0}'")]
    UnknownImplementation(String),
    #[error("invalid version constraint '{constraint}': {source}")]
    InvalidConstraint {
        constraint: String,
        #[source]
        source: semver::Error,
    },
    #[error("tag '{tag}' is not a semantic version: {source}")]
    InvalidVersion {
        tag: String,
        #[source]
        source: semver::Error,
    },
}

/// Decides whether a release tag should be built
pub trait VersionFilter: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// Returns an error if the tag cannot be interpreted by the filter.
    fn matches(&self, tag: &str) -> Result<bool, VersionFilterError>;
}

/// Filter that rejects every tag
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl VersionFilter for NoFilter {
    fn matches(&self, _tag: &str) -> Result<bool, VersionFilterError> {
        Ok(false)
    }
}

/// Filter matching tags against a semantic version requirement
#[derive(Debug, Clone)]
pub struct SemverFilter {
    requirement: VersionReq,
}

impl SemverFilter {
    /// # Errors
    ///
    /// Returns an error if `constraint` is not a valid version requirement.
    pub fn new(constraint: &str) -> Result<Self, VersionFilterError> {
        let requirement =
            VersionReq::parse(constraint.trim()).map_err(|source| {
                VersionFilterError::InvalidConstraint {
                    constraint: constraint.to_string(),
                    source,
                }
            })?;
        Ok(Self { requirement })
    }
}

impl VersionFilter for SemverFilter {
    fn matches(&self, tag: &str) -> Result<bool, VersionFilterError> {
        let version = parse_tag(tag).map_err(|source| VersionFilterError::InvalidVersion {
            tag: tag.to_string(),
            source,
        })?;
        Ok(self.requirement.matches(&version))
    }
}

/// Parse a release tag leniently: a leading `v` is accepted and a missing
/// minor or patch component is read as zero (`v1.2` is `1.2.0`).
fn parse_tag(tag: &str) -> Result<Version, semver::Error> {
    let trimmed = tag.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);
    let padding = match core.matches('.').count() {
        0 => ".0.0",
        1 => ".0",
        _ => "",
    };
    Version::parse(&format!("{core}{padding}{suffix}"))
}

/// Build the filter selected by `spec`
///
/// # Errors
///
/// Returns an error for an unknown implementation or an invalid argument.
/// Callers fall back to [`NoFilter`] so a broken filter never builds everything.
pub fn from_spec(spec: &VersionFilterSpec) -> Result<Box<dyn VersionFilter>, VersionFilterError> {
    match spec.implementation.as_str() {
        SEMVER_IMPL => Ok(Box::new(SemverFilter::new(&spec.arg)?)),
        other => Err(VersionFilterError::UnknownImplementation(other.to_string())),
    }
}

/// Result of filtering a list of releases
#[derive(Debug)]
pub struct Filtered<T> {
    pub kept: Vec<T>,
    pub errors: Vec<VersionFilterError>,
}

/// Apply `filter` (when set) and then the deny-list to `items`
///
/// Tags the filter cannot interpret are excluded and reported in `errors`.
pub fn apply<T>(
    filter: Option<&dyn VersionFilter>,
    omit_versions: &[String],
    items: Vec<T>,
    tag_of: impl Fn(&T) -> &str,
) -> Filtered<T> {
    let mut errors = Vec::new();
    let kept = items
        .into_iter()
        .filter(|item| {
            let tag = tag_of(item);
            let matches = match filter {
                None => true,
                Some(filter) => filter.matches(tag).unwrap_or_else(|err| {
                    errors.push(err);
                    false
                }),
            };
            matches && !omit_versions.iter().any(|omitted| omitted == tag)
        })
        .collect();

    Filtered { kept, errors }
}
