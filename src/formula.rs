//! Formula definitions and the formulary they are read from.
//!
//! A formula names a package and, per platform key, the [`InstallerDirective`] that
//! says how to obtain it there. Formulas ship embedded in the binary; a directory named
//! by `MICASA_FORMULARY` is consulted first so users can add or override entries.
//!
//! Platform keys may be composite (`"ubuntu|debian"`). They are expanded when the
//! formula is read, so callers only ever see single keys.

use crate::error::{MicasaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Formulas compiled into the binary, sorted by name.
const EMBEDDED: &[(&str, &str)] = &[
    ("bat", include_str!("../formulary/bat.json")),
    ("eza", include_str!("../formulary/eza.json")),
    ("fd", include_str!("../formulary/fd.json")),
    ("fzf", include_str!("../formulary/fzf.json")),
    ("jq", include_str!("../formulary/jq.json")),
    ("lazygit", include_str!("../formulary/lazygit.json")),
    ("mise", include_str!("../formulary/mise.json")),
    ("neovim", include_str!("../formulary/neovim.json")),
    ("ripgrep", include_str!("../formulary/ripgrep.json")),
    ("uv", include_str!("../formulary/uv.json")),
    ("zoxide", include_str!("../formulary/zoxide.json")),
];

const SUGGESTION_THRESHOLD: f64 = 0.8;

/// A package and how to obtain it on each platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Formula {
    pub formula_id: String,
    #[serde(default)]
    pub platforms: BTreeMap<String, InstallerDirective>,
}

/// Per-platform installation recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallerDirective {
    /// Name of the driver that carries out this directive
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_fuse: Option<bool>,
}

impl InstallerDirective {
    pub fn requires_fuse(&self) -> bool {
        self.requires_fuse.unwrap_or(false)
    }
}

/// Result of an info query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormulaDetails {
    pub package_id: String,
    pub stable_version: Option<String>,
    pub installed_version: Option<String>,
}

impl Formula {
    /// Parse a formula document and expand its composite platform keys.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut formula: Formula = serde_json::from_str(json)?;
        formula.expand_composite_keys();
        Ok(formula)
    }

    /// Platform keys in sorted order.
    pub fn platform_keys(&self) -> Vec<&str> {
        self.platforms.keys().map(String::as_str).collect()
    }

    /// Replace every `a|b` key with independent `a` and `b` entries sharing its directive.
    ///
    /// A key listed explicitly wins over the same key produced by an expansion.
    fn expand_composite_keys(&mut self) {
        let composite: Vec<String> = self
            .platforms
            .keys()
            .filter(|key| key.contains('|'))
            .cloned()
            .collect();

        for key in composite {
            let Some(directive) = self.platforms.remove(&key) else {
                continue;
            };

            for single in key.split('|').map(str::trim).filter(|s| !s.is_empty()) {
                if self.platforms.contains_key(single) {
                    warn!(
                        "Formula {}: platform '{}' from '{}' is already listed, keeping the explicit entry",
                        self.formula_id, single, key
                    );
                    continue;
                }
                self.platforms.insert(single.to_string(), directive.clone());
            }
        }
    }
}

/// Loads formulas from the overlay directory and the embedded formulary.
#[derive(Debug, Clone, Default)]
pub struct FormulaReader {
    overlay: Option<PathBuf>,
}

impl FormulaReader {
    pub fn new(overlay: Option<PathBuf>) -> Self {
        Self { overlay }
    }

    /// Read the named formula.
    ///
    /// # Errors
    ///
    /// [`MicasaError::FormulaNotFound`] when neither the overlay nor the embedded
    /// formulary defines `name`; [`MicasaError::Json`] when the definition is malformed.
    pub async fn read(&self, name: &str) -> Result<Formula> {
        if !is_valid_name(name) {
            return Err(MicasaError::FormulaNotFound(name.to_string()));
        }

        if let Some(dir) = &self.overlay {
            let path = dir.join(format!("{}.json", name));
            match tokio::fs::read_to_string(&path).await {
                Ok(json) => {
                    debug!("Reading formula {} from {}", name, path.display());
                    return Formula::from_json(&json);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        match EMBEDDED.iter().find(|(id, _)| *id == name) {
            Some((_, json)) => Formula::from_json(json),
            None => Err(MicasaError::FormulaNotFound(name.to_string())),
        }
    }

    /// Names of every known formula, overlay entries included, sorted and deduplicated.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = EMBEDDED.iter().map(|(id, _)| id.to_string()).collect();

        if let Some(dir) = &self.overlay {
            names.extend(overlay_names(dir));
        }

        names.sort();
        names.dedup();
        names
    }

    /// Known formula names that look like `name`, best match first.
    pub fn suggestions(&self, name: &str) -> Vec<String> {
        let mut scored: Vec<(f64, String)> = self
            .available()
            .into_iter()
            .map(|candidate| (strsim::jaro_winkler(name, &candidate), candidate))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, name)| name).take(3).collect()
    }
}

fn overlay_names(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read formulary {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect()
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_composite_keys_expand() {
        let formula = Formula::from_json(
            r#"{
                "formula-id": "bat",
                "platforms": {
                    "ubuntu|debian": { "tool": "apt", "package-id": "bat" },
                    "macos": { "tool": "homebrew", "package-id": "bat" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(formula.platform_keys(), vec!["debian", "macos", "ubuntu"]);
        assert!(formula.platforms.keys().all(|key| !key.contains('|')));
        assert_eq!(formula.platforms["ubuntu"], formula.platforms["debian"]);
        assert_eq!(formula.platforms["ubuntu"].tool, "apt");
    }

    #[test]
    fn test_explicit_key_wins_over_expansion() {
        let formula = Formula::from_json(
            r#"{
                "formula-id": "fd",
                "platforms": {
                    "ubuntu": { "tool": "apt", "package-id": "fd-find" },
                    "ubuntu|amazon": { "tool": "github-archive", "repo-url": "https://github.com/sharkdp/fd" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(formula.platforms["ubuntu"].tool, "apt");
        assert_eq!(formula.platforms["amazon"].tool, "github-archive");
        assert_eq!(formula.platforms.len(), 2);
    }

    #[test]
    fn test_composite_segments_are_trimmed() {
        let formula = Formula::from_json(
            r#"{ "formula-id": "x", "platforms": { " ubuntu | | debian ": { "tool": "apt" } } }"#,
        )
        .unwrap();
        assert_eq!(formula.platform_keys(), vec!["debian", "ubuntu"]);
    }

    #[test]
    fn test_directive_fields_are_kebab_case() {
        let formula = Formula::from_json(
            r#"{
                "formula-id": "neovim",
                "platforms": {
                    "ubuntu": {
                        "tool": "github-archive",
                        "executable": "nvim",
                        "repo-url": "https://github.com/neovim/neovim",
                        "requires-fuse": true
                    }
                }
            }"#,
        )
        .unwrap();

        let directive = &formula.platforms["ubuntu"];
        assert_eq!(directive.executable.as_deref(), Some("nvim"));
        assert_eq!(
            directive.repo_url.as_deref(),
            Some("https://github.com/neovim/neovim")
        );
        assert!(directive.requires_fuse());
        assert_eq!(directive.installer_url, None);
    }

    #[test]
    fn test_every_embedded_formula_parses() {
        for (name, json) in EMBEDDED {
            let formula = Formula::from_json(json)
                .unwrap_or_else(|e| panic!("formula {} is malformed: {}", name, e));
            assert_eq!(&formula.formula_id, name);
            assert!(!formula.platforms.is_empty(), "{} has no platforms", name);
        }
    }

    #[tokio::test]
    async fn test_read_zoxide() {
        let formula = FormulaReader::default().read("zoxide").await.unwrap();
        assert!(formula.platforms.contains_key("amazon-2023"));
        assert!(formula.platforms.contains_key("ubuntu"));
    }

    #[tokio::test]
    async fn test_read_unknown_formula() {
        let err = FormulaReader::default().read("no-such-thing").await.unwrap_err();
        assert!(matches!(err, MicasaError::FormulaNotFound(ref name) if name == "no-such-thing"));
    }

    #[tokio::test]
    async fn test_path_like_names_are_not_found() {
        let reader = FormulaReader::default();
        for name in ["", "../bat", "a/b", ".hidden"] {
            let err = reader.read(name).await.unwrap_err();
            assert!(matches!(err, MicasaError::FormulaNotFound(_)), "{:?}", name);
        }
    }

    #[tokio::test]
    async fn test_overlay_takes_precedence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("bat.json"),
            r#"{ "formula-id": "bat", "platforms": { "arch": { "tool": "shell-script" } } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("mytool.json"),
            r#"{ "formula-id": "mytool", "platforms": { "ubuntu": { "tool": "apt" } } }"#,
        )
        .unwrap();

        let reader = FormulaReader::new(Some(dir.path().to_path_buf()));
        let bat = reader.read("bat").await.unwrap();
        assert_eq!(bat.platform_keys(), vec!["arch"]);

        let available = reader.available();
        assert!(available.contains(&"mytool".to_string()));
        assert_eq!(available.iter().filter(|n| *n == "bat").count(), 1);

        // Embedded formulas remain reachable through the overlay
        assert!(reader.read("ripgrep").await.is_ok());
    }

    #[test]
    fn test_suggestions() {
        let reader = FormulaReader::default();
        assert_eq!(reader.suggestions("ripgrap").first().map(String::as_str), Some("ripgrep"));
        assert!(reader.suggestions("zzzzzzzz").is_empty());
    }
}
