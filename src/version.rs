//! Version requirements from the manifest.
//!
//! Specs use PEP 440 specifier syntax (`>=0.11.5`, `~=0.9.17`, `>=1.0,<2.0`). Versions
//! reported by package managers carry packaging suffixes (`0.24.0-1build1`,
//! `1:2.3.1-2`, `0.26.1_1`) and release tags carry a `v`; only the upstream part is
//! compared.

use crate::error::{MicasaError, Result};
use pep440_rs::{Version, VersionSpecifiers};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// A parsed manifest version spec.
#[derive(Debug, Clone)]
pub struct VersionRequirement {
    spec: String,
    specifiers: VersionSpecifiers,
}

impl VersionRequirement {
    /// True if `version` meets the requirement. A version that cannot be read as PEP
    /// 440 never does.
    pub fn is_satisfied_by(&self, version: &str) -> bool {
        let upstream = upstream_version(version);
        match Version::from_str(upstream) {
            Ok(parsed) => self.specifiers.contains(&parsed),
            Err(e) => {
                warn!("Cannot compare version '{}' against {}: {}", version, self.spec, e);
                false
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.spec
    }
}

impl FromStr for VersionRequirement {
    type Err = MicasaError;

    fn from_str(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let specifiers =
            VersionSpecifiers::from_str(spec).map_err(|e| MicasaError::InvalidVersionSpec {
                spec: spec.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            spec: spec.to_string(),
            specifiers,
        })
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

/// Strip a Debian epoch, a `v` prefix and any packaging revision.
fn upstream_version(version: &str) -> &str {
    let version = version.trim();
    let version = version.split_once(':').map_or(version, |(_, rest)| rest);
    let version = version.strip_prefix('v').unwrap_or(version);
    version.split(['-', '_', '~']).next().unwrap_or(version)
}
