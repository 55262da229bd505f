//! Platform detection and formula platform matching.
//!
//! Formulas key their installer directives by platform. A detected platform is
//! rendered as a canonical key `{os}-{version}-{arch}`:
//! - `ubuntu-noble-amd64` - Ubuntu 24.04 on x86_64
//! - `amazon-2023-arm64` - Amazon Linux 2023 on Graviton
//! - `macos-sonoma-arm64` - macOS 14 on Apple Silicon
//!
//! Formulas rarely list every key. [`find_best_match`] falls back from the full key
//! to ever shorter left-to-right prefixes, so a formula entry for `ubuntu` covers
//! every Ubuntu release and architecture, while `ubuntu-noble` wins over it on 24.04.
//!
//! # Examples
//!
//! ```
//! use micasa::platform::find_best_match;
//!
//! let available = ["macos", "ubuntu-noble"];
//! assert_eq!(find_best_match("macos-sonoma-arm64", &available), Some("macos"));
//! assert_eq!(find_best_match("ubuntu-noble-amd64", &available), Some("ubuntu-noble"));
//! assert_eq!(find_best_match("fedora-41-amd64", &available), None);
//! ```

use crate::command::CommandRunner;
use crate::error::{MicasaError, Result};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const OS_RELEASE_PATH: &str = "/etc/os-release";

/// A detected platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Distribution or OS token (`ubuntu`, `amazon`, `macos`, ...)
    pub os: String,
    /// Release codename or version (`noble`, `2023`, `sonoma`, ...)
    pub version: Option<String>,
    /// Architecture token (`amd64`, `arm64`, or the raw architecture)
    pub arch: String,
}

impl Platform {
    /// The canonical platform key used for formula lookups.
    pub fn key(&self) -> String {
        match &self.version {
            Some(version) => format!("{}-{}-{}", self.os, version, self.arch),
            None => format!("{}-{}", self.os, self.arch),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Find the most specific entry of `available` matching `platform`.
///
/// An exact match wins. Otherwise the key is split on `-` and the longest proper
/// prefix present in `available` is returned.
pub fn find_best_match<'a, S: AsRef<str>>(platform: &str, available: &'a [S]) -> Option<&'a str> {
    let lookup = |candidate: &str| {
        available
            .iter()
            .map(AsRef::as_ref)
            .find(|name| *name == candidate)
    };

    if let Some(exact) = lookup(platform) {
        return Some(exact);
    }

    let parts: Vec<&str> = platform.split('-').collect();
    (1..parts.len()).rev().find_map(|i| lookup(&parts[..i].join("-")))
}

/// Map a Rust architecture name to the token used in platform keys.
pub fn arch_token(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// The architecture token of the running system.
pub fn system_arch() -> &'static str {
    arch_token(std::env::consts::ARCH)
}

/// Detect the running platform.
///
/// # Errors
///
/// Returns [`MicasaError::UnsupportedPlatform`] on operating systems other than
/// Linux and macOS, or when the distribution cannot be identified.
pub async fn detect(runner: &CommandRunner, cancel: &CancellationToken) -> Result<Platform> {
    let platform = match std::env::consts::OS {
        "linux" => {
            let contents = tokio::fs::read_to_string(OS_RELEASE_PATH)
                .await
                .map_err(|e| {
                    MicasaError::UnsupportedPlatform(format!(
                        "cannot read {}: {}",
                        OS_RELEASE_PATH, e
                    ))
                })?;
            linux_platform(&contents, system_arch())?
        }
        "macos" => {
            let result = runner.run("sw_vers", &["-productVersion"], cancel).await?;
            let result = runner.ensure_success(result)?;
            let version = result.stdout.unwrap_or_default();
            Platform {
                os: "macos".to_string(),
                version: Some(macos_name(version.trim())),
                arch: system_arch().to_string(),
            }
        }
        other => return Err(MicasaError::UnsupportedPlatform(other.to_string())),
    };

    debug!("Detected platform {}", platform);
    Ok(platform)
}

/// Fields of interest from `/etc/os-release`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub version_codename: Option<String>,
}

pub fn parse_os_release(contents: &str) -> OsRelease {
    let mut release = OsRelease::default();

    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "ID" => release.id = Some(value),
            "VERSION_ID" => release.version_id = Some(value),
            "VERSION_CODENAME" => release.version_codename = Some(value),
            _ => {}
        }
    }

    release
}

/// Build a platform from `/etc/os-release` contents.
pub fn linux_platform(os_release: &str, arch: &str) -> Result<Platform> {
    let release = parse_os_release(os_release);

    let id = release.id.ok_or_else(|| {
        MicasaError::UnsupportedPlatform("os-release does not name a distribution".to_string())
    })?;

    let os = match id.to_ascii_lowercase().as_str() {
        "amzn" => "amazon".to_string(),
        other => other.to_string(),
    };

    Ok(Platform {
        os,
        version: release.version_codename.or(release.version_id),
        arch: arch.to_string(),
    })
}

/// Map a macOS product version to its release name. An unknown major version is
/// passed through as a number (`27`), so only generic `macos` entries match it.
pub fn macos_name(version: &str) -> String {
    let major = version.split('.').next().unwrap_or_default().trim();

    let name = match major {
        "26" | "16" => "tahoe",
        "15" => "sequoia",
        "14" => "sonoma",
        "13" => "ventura",
        "12" => "monterey",
        "11" => "big_sur",
        _ => {
            warn!("Unknown macOS version '{}', using it as the release name", version);
            return if major.is_empty() {
                "unknown".to_string()
            } else {
                major.to_string()
            };
        }
    };
    name.to_string()
}
