//! Release asset selection.
//!
//! Picks the one asset of a release that suits this machine: Linux builds for the
//! right architecture, preferring tarballs over AppImages, static `musl` builds over
//! `gnu` ones, and anything over a `.deb`.

use crate::error::{MicasaError, Result};
use crate::github::{Asset, ReleaseInfo};
use tracing::debug;

/// Choose the best asset of `release` for `arch` (`amd64`, `arm64`, ...).
///
/// # Errors
///
/// Returns [`MicasaError::UnsupportedPlatform`] if the release has no Linux assets, or
/// none for the architecture.
pub fn find_best_asset<'a>(release: &'a ReleaseInfo, arch: &str) -> Result<&'a Asset> {
    let (preferred, alternate) = arch_names(arch);

    let linux: Vec<&Asset> = release
        .assets
        .iter()
        .filter(|asset| contains_ignore_case(&asset.name, "linux"))
        .collect();

    if linux.is_empty() {
        return Err(MicasaError::UnsupportedPlatform(
            "no Linux assets found in release".to_string(),
        ));
    }

    let best = best_match(&linux, &preferred)
        .or_else(|| best_match(&linux, &alternate))
        .ok_or_else(|| {
            MicasaError::UnsupportedPlatform(format!(
                "no Linux asset found for architecture {}",
                arch
            ))
        })?;

    debug!("Selected asset {}", best.name);
    Ok(best)
}

fn best_match<'a>(assets: &[&'a Asset], arch_name: &str) -> Option<&'a Asset> {
    let mut best: Option<(&Asset, i32)> = None;

    for asset in assets
        .iter()
        .copied()
        .filter(|asset| contains_ignore_case(&asset.name, arch_name))
    {
        let score = score(&asset.name);
        // Strictly greater keeps the first of equal scores
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((asset, score));
        }
    }

    best.map(|(asset, _)| asset)
}

/// Preference score of an asset file name.
pub fn score(name: &str) -> i32 {
    let name = name.to_ascii_lowercase();
    let mut score = 0;

    if name.ends_with(".tar.gz") {
        score += 1000;
    }
    if name.ends_with(".appimage") {
        score += 900;
    }

    if name.contains("musl") {
        score += 90;
    } else if name.contains("gnu") {
        score += 50;
    }

    if name.ends_with(".deb") {
        score -= 500;
    }

    score
}

fn arch_names(arch: &str) -> (String, String) {
    match arch.to_ascii_lowercase().as_str() {
        "amd64" => ("x86_64".to_string(), "amd64".to_string()),
        "arm64" => ("aarch64".to_string(), "arm64".to_string()),
        _ => (arch.to_string(), arch.to_string()),
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}
