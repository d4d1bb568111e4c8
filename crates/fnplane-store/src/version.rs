// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Semantic versions.
//!
//! Versions compare by numeric components, so `10.0.0` sorts after `2.0.0`.
//! A pre-release sorts before its release; build metadata does not affect
//! precedence and only breaks ties.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]` version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// Dot-separated pre-release identifiers (empty for a release).
    pub pre: Vec<PreRelease>,
    /// Build metadata, if any.
    pub build: Option<String>,
}

/// One pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PreRelease {
    /// Purely numeric identifier, compared numerically.
    Numeric(u64),
    /// Alphanumeric identifier, compared lexically.
    Alpha(String),
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreRelease::Numeric(a), PreRelease::Numeric(b)) => a.cmp(b),
            (PreRelease::Numeric(_), PreRelease::Alpha(_)) => Ordering::Less,
            (PreRelease::Alpha(_), PreRelease::Numeric(_)) => Ordering::Greater,
            (PreRelease::Alpha(a), PreRelease::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Version {
    /// Compare by semantic-version precedence only, ignoring build metadata.
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_precedence(other)
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            let pre: Vec<String> = self
                .pre
                .iter()
                .map(|p| match p {
                    PreRelease::Numeric(n) => n.to_string(),
                    PreRelease::Alpha(s) => s.clone(),
                })
                .collect();
            write!(f, "-{}", pre.join("."))?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn parse_numeric(part: &str, name: &str) -> Result<u64, String> {
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("{} component '{}' is not a number", name, part));
    }
    if part.len() > 1 && part.starts_with('0') {
        return Err(format!("{} component '{}' has a leading zero", name, part));
    }
    part.parse()
        .map_err(|_| format!("{} component '{}' is out of range", name, part))
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, build) = match s.split_once('+') {
            Some((rest, build)) => {
                if !build.split('.').all(is_identifier) {
                    return Err(format!("invalid build metadata '{}'", build));
                }
                (rest, Some(build.to_string()))
            }
            None => (s, None),
        };

        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => {
                let mut identifiers = Vec::new();
                for ident in pre.split('.') {
                    if !is_identifier(ident) {
                        return Err(format!("invalid pre-release '{}'", pre));
                    }
                    if ident.chars().all(|c| c.is_ascii_digit()) {
                        identifiers.push(PreRelease::Numeric(parse_numeric(ident, "pre-release")?));
                    } else {
                        identifiers.push(PreRelease::Alpha(ident.to_string()));
                    }
                }
                (core, identifiers)
            }
            None => (rest, Vec::new()),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("expected MAJOR.MINOR.PATCH, got '{}'", core));
        }

        Ok(Version {
            major: parse_numeric(parts[0], "major")?,
            minor: parse_numeric(parts[1], "minor")?,
            patch: parse_numeric(parts[2], "patch")?,
            pre,
            build,
        })
    }
}

/// Order two version strings: parseable versions by precedence, unparseable
/// strings after every parseable one, lexically among themselves.
pub fn compare_version_strings(a: &str, b: &str) -> Ordering {
    match (a.parse::<Version>(), b.parse::<Version>()) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
