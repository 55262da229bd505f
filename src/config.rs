//! Runtime settings resolved from the environment.
//!
//! Every knob has an environment variable and a sensible default, so the CLI works
//! with zero configuration. Command-line flags override the environment in `main`.
//!
//! | Setting | Variable | Default |
//! |---|---|---|
//! | home directory | `MICASA_HOME`, then `HOME` | `.` |
//! | formula overlay | `MICASA_FORMULARY` | none |
//! | command timeout | `MICASA_COMMAND_TIMEOUT` (seconds) | 60 |
//! | GitHub API base | `MICASA_GITHUB_API` | `https://api.github.com` |
//! | GitHub token | `GITHUB_TOKEN` | none |
//! | manifest | `MICASA_MANIFEST`, then `$XDG_CONFIG_HOME/micasa/micasa.txt` | `~/.config/micasa/micasa.txt` |
//! | scratch directory | `TMPDIR` | the system temp directory |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Clone)]
pub struct Settings {
    pub home_dir: PathBuf,
    pub formulary_dir: Option<PathBuf>,
    pub command_timeout: Duration,
    pub github_api: String,
    pub github_token: Option<String>,
    pub manifest_path: PathBuf,
    /// Parent of per-install working directories and downloaded scripts
    pub temp_dir: PathBuf,
    pub user_agent: String,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let home_dir = non_empty("MICASA_HOME")
            .or_else(|| non_empty("HOME"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let command_timeout = match non_empty("MICASA_COMMAND_TIMEOUT") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(
                        "Ignoring invalid MICASA_COMMAND_TIMEOUT '{}', using {}s",
                        raw,
                        DEFAULT_COMMAND_TIMEOUT.as_secs()
                    );
                    DEFAULT_COMMAND_TIMEOUT
                }
            },
            None => DEFAULT_COMMAND_TIMEOUT,
        };

        let manifest_path = non_empty("MICASA_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let config_root = non_empty("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| home_dir.join(".config"));
                config_root.join("micasa").join("micasa.txt")
            });

        Self {
            formulary_dir: non_empty("MICASA_FORMULARY").map(PathBuf::from),
            command_timeout,
            github_api: non_empty("MICASA_GITHUB_API")
                .map(|api| api.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GITHUB_API.to_string()),
            github_token: non_empty("GITHUB_TOKEN"),
            manifest_path,
            temp_dir: non_empty("TMPDIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            user_agent: format!("micasa/{}", env!("CARGO_PKG_VERSION")),
            home_dir,
        }
    }

    /// Settings rooted at an arbitrary home directory, with every other value defaulted.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        Self {
            manifest_path: home_dir.join(".config/micasa/micasa.txt"),
            formulary_dir: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            github_api: DEFAULT_GITHUB_API.to_string(),
            github_token: None,
            temp_dir: env::temp_dir(),
            user_agent: format!("micasa/{}", env!("CARGO_PKG_VERSION")),
            home_dir,
        }
    }

    /// `{home}/.local/bin`
    pub fn bin_dir(&self) -> PathBuf {
        local_root(&self.home_dir).join("bin")
    }

    /// `{home}/.local/share/man/man1`
    pub fn man1_dir(&self) -> PathBuf {
        local_root(&self.home_dir).join("share/man/man1")
    }

    /// `{home}/.local/opt`
    pub fn opt_dir(&self) -> PathBuf {
        local_root(&self.home_dir).join("opt")
    }
}

fn local_root(home: &Path) -> PathBuf {
    home.join(".local")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[("HOME", "/home/alice")]);
        assert_eq!(settings.home_dir, PathBuf::from("/home/alice"));
        assert_eq!(settings.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(settings.github_api, DEFAULT_GITHUB_API);
        assert!(settings.github_token.is_none());
        assert!(settings.formulary_dir.is_none());
        assert_eq!(
            settings.manifest_path,
            PathBuf::from("/home/alice/.config/micasa/micasa.txt")
        );
        assert!(settings.user_agent.starts_with("micasa/"));
    }

    #[test]
    fn test_temp_dir_from_tmpdir() {
        let settings = settings_from(&[("HOME", "/home/alice"), ("TMPDIR", "/scratch")]);
        assert_eq!(settings.temp_dir, PathBuf::from("/scratch"));

        let settings = settings_from(&[("HOME", "/home/alice"), ("TMPDIR", " ")]);
        assert_eq!(settings.temp_dir, env::temp_dir());
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("HOME", "/home/alice"),
            ("MICASA_HOME", "/tmp/sandbox"),
            ("MICASA_COMMAND_TIMEOUT", "5"),
            ("MICASA_GITHUB_API", "http://127.0.0.1:1234/"),
            ("MICASA_FORMULARY", "/etc/micasa/formulary"),
            ("XDG_CONFIG_HOME", "/xdg"),
            ("GITHUB_TOKEN", "ghp_example"),
        ]);
        assert_eq!(settings.home_dir, PathBuf::from("/tmp/sandbox"));
        assert_eq!(settings.command_timeout, Duration::from_secs(5));
        assert_eq!(settings.github_api, "http://127.0.0.1:1234");
        assert_eq!(
            settings.formulary_dir,
            Some(PathBuf::from("/etc/micasa/formulary"))
        );
        assert_eq!(settings.manifest_path, PathBuf::from("/xdg/micasa/micasa.txt"));
        assert_eq!(settings.github_token.as_deref(), Some("ghp_example"));
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let settings = settings_from(&[("HOME", "/h"), ("MICASA_COMMAND_TIMEOUT", "soon")]);
        assert_eq!(settings.command_timeout, DEFAULT_COMMAND_TIMEOUT);

        let settings = settings_from(&[("HOME", "/h"), ("MICASA_COMMAND_TIMEOUT", "0")]);
        assert_eq!(settings.command_timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_canonical_dirs() {
        let settings = Settings::with_home("/home/bob");
        assert_eq!(settings.bin_dir(), PathBuf::from("/home/bob/.local/bin"));
        assert_eq!(
            settings.man1_dir(),
            PathBuf::from("/home/bob/.local/share/man/man1")
        );
        assert_eq!(settings.opt_dir(), PathBuf::from("/home/bob/.local/opt"));
    }
}
