//! Version parsing and release-aware ordering.
//!
//! Manifest tags are not always full semantic versions: database add-ons are
//! tagged like `9.6` or `9.6-v1`, where the `-vN` suffix is a revision of an
//! already released upstream version rather than a pre-release. Ordering
//! treats such revisions as newer than the plain version they extend.
use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};
use std::{cmp::Ordering, fmt, sync::LazyLock};

use crate::{AutomatonError, Result};

static LENIENT_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^v?(?<major>0|[1-9]\d*)(?:\.(?<minor>0|[1-9]\d*))?(?:\.(?<patch>0|[1-9]\d*))?(?:-(?<pre>[0-9A-Za-z\-]+(?:\.[0-9A-Za-z\-]+)*))?(?:\+(?<build>[0-9A-Za-z\-]+(?:\.[0-9A-Za-z\-]+)*))?$",
    )
    .expect("version regex is valid")
});

/// Relative importance of a tag when looking for the previous release in
/// the same series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Importance {
    /// alpha, beta and other plain pre-releases
    Prerelease,
    /// `-rc.N` pre-releases
    Candidate,
    /// no pre-release component, or a `-vN` revision
    Stable,
}

/// A parsed version tag that remembers how it was written.
#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    original: String,
    semver: Version,
}

impl ReleaseVersion {
    /// Parse leniently: a leading `v` is accepted and missing minor/patch
    /// components default to zero.
    pub fn parse(tag: &str) -> Result<Self> {
        let captures = LENIENT_VERSION_REGEX
            .captures(tag.trim())
            .ok_or_else(|| {
                AutomatonError::invalid_version(tag, "not a semantic version")
            })?;

        let number = |name: &str| -> Result<u64> {
            captures
                .name(name)
                .map(|m| m.as_str().parse::<u64>())
                .transpose()
                .map(|n| n.unwrap_or(0))
                .map_err(|e| AutomatonError::invalid_version(tag, e))
        };

        let mut semver =
            Version::new(number("major")?, number("minor")?, number("patch")?);

        if let Some(pre) = captures.name("pre") {
            semver.pre = Prerelease::new(pre.as_str())
                .map_err(|e| AutomatonError::invalid_version(tag, e))?;
        }
        if let Some(build) = captures.name("build") {
            semver.build = BuildMetadata::new(build.as_str())
                .map_err(|e| AutomatonError::invalid_version(tag, e))?;
        }

        Ok(Self {
            original: tag.to_string(),
            semver,
        })
    }

    /// Parse as a full `MAJOR.MINOR.PATCH` semantic version, allowing only a
    /// leading `v` as an extension.
    pub fn parse_strict(tag: &str) -> Result<Self> {
        let semver = Version::parse(tag.strip_prefix('v').unwrap_or(tag))
            .map_err(|e| AutomatonError::invalid_version(tag, e))?;
        Ok(Self {
            original: tag.to_string(),
            semver,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn semver(&self) -> &Version {
        &self.semver
    }

    pub fn major(&self) -> u64 {
        self.semver.major
    }

    pub fn minor(&self) -> u64 {
        self.semver.minor
    }

    pub fn patch(&self) -> u64 {
        self.semver.patch
    }

    pub fn prerelease(&self) -> &str {
        self.semver.pre.as_str()
    }

    pub fn is_patch_release(&self) -> bool {
        self.semver.patch > 0
    }

    pub fn importance(&self) -> Importance {
        let pre = self.prerelease();
        if pre.is_empty() || pre.starts_with('v') {
            Importance::Stable
        } else if pre.starts_with("rc") {
            Importance::Candidate
        } else {
            Importance::Prerelease
        }
    }

    /// Whether `other` ranks at least as high as `self` and therefore can
    /// serve as the previous release when diffing changelogs for `self`.
    pub fn admits(&self, other: &ReleaseVersion) -> bool {
        other.importance() >= self.importance()
    }

    /// Same version ignoring how it was spelled and any build metadata.
    pub fn same_version(&self, other: &ReleaseVersion) -> bool {
        self.core() == other.core() && self.semver.pre == other.semver.pre
    }

    fn core(&self) -> (u64, u64, u64) {
        (self.semver.major, self.semver.minor, self.semver.patch)
    }

    /// `-vN` revision number; plain versions rank below every revision.
    fn revision(&self) -> i64 {
        self.prerelease()
            .strip_prefix('v')
            .map(|n| n.parse::<i64>().unwrap_or(0))
            .unwrap_or(-1)
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let core = self.core().cmp(&other.core());
        if core != Ordering::Equal {
            return core;
        }

        let self_stable = self.importance() == Importance::Stable;
        let other_stable = other.importance() == Importance::Stable;

        let ordering = match (self_stable, other_stable) {
            (true, true) => self.revision().cmp(&other.revision()),
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.semver.pre.cmp(&other.semver.pre),
        };

        ordering.then_with(|| self.original.cmp(&other.original))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Sort version strings ascending with the release-aware ordering,
/// returning them as originally written.
pub fn sort_versions(versions: &[String]) -> Result<Vec<String>> {
    let mut parsed = versions
        .iter()
        .map(|v| ReleaseVersion::parse(v))
        .collect::<Result<Vec<_>>>()?;
    parsed.sort();
    Ok(parsed.into_iter().map(|v| v.original).collect())
}

/// Compare two tags, falling back to plain string comparison for tags that
/// do not parse as versions.
pub fn compare_tags(a: &str, b: &str) -> Ordering {
    match (ReleaseVersion::parse(a), ReleaseVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
