//! Installation drivers.
//!
//! A driver carries out an [`InstallerDirective`] with one specific tool. Directives
//! name their driver through `tool`:
//!
//! | `tool` | Driver |
//! |---|---|
//! | `apt`, `dnf`, `npm` | [`PackageManagerDriver`] |
//! | `homebrew` | [`HomebrewDriver`] |
//! | `shell-script` | [`ShellScriptDriver`] |
//! | `github-archive` | [`GithubArchiveDriver`] |
//!
//! Every driver answers the same three operations: info, install and uninstall.

pub mod github_archive;
pub mod homebrew;
pub mod package_manager;
pub mod shell_script;

pub use github_archive::{GithubArchiveDriver, InstallStage};
pub use homebrew::HomebrewDriver;
pub use package_manager::{PackageManager, PackageManagerDriver};
pub use shell_script::ShellScriptDriver;

use crate::command::CommandRunner;
use crate::config::Settings;
use crate::error::{MicasaError, Result};
use crate::formula::{FormulaDetails, InstallerDirective};
use crate::github::GithubReleaseFetcher;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Names accepted in a directive's `tool` field.
pub const TOOLS: &[&str] = &[
    "apt",
    "dnf",
    "npm",
    "homebrew",
    "shell-script",
    "github-archive",
];

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A driver for one tool.
#[derive(Debug, Clone)]
pub enum Driver {
    PackageManager(PackageManagerDriver),
    Homebrew(HomebrewDriver),
    ShellScript(ShellScriptDriver),
    GithubArchive(GithubArchiveDriver),
}

impl Driver {
    pub fn name(&self) -> &'static str {
        match self {
            Driver::PackageManager(driver) => driver.manager().name(),
            Driver::Homebrew(_) => "homebrew",
            Driver::ShellScript(_) => "shell-script",
            Driver::GithubArchive(_) => "github-archive",
        }
    }

    /// Query the package's available and installed versions.
    pub async fn info(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<FormulaDetails> {
        match self {
            Driver::PackageManager(driver) => driver.info(formula, directive, cancel).await,
            Driver::Homebrew(driver) => driver.info(formula, directive, cancel).await,
            Driver::ShellScript(driver) => driver.info(formula, directive, cancel).await,
            Driver::GithubArchive(driver) => driver.info(formula, directive, cancel).await,
        }
    }

    pub async fn install(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            Driver::PackageManager(driver) => driver.install(formula, directive, cancel).await,
            Driver::Homebrew(driver) => driver.install(formula, directive, cancel).await,
            Driver::ShellScript(driver) => driver.install(formula, directive, cancel).await,
            Driver::GithubArchive(driver) => driver
                .install(formula, directive, cancel)
                .await
                .map(|_| ()),
        }
    }

    pub async fn uninstall(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self {
            Driver::PackageManager(driver) => driver.uninstall(formula, directive, cancel).await,
            Driver::Homebrew(driver) => driver.uninstall(formula, directive, cancel).await,
            Driver::ShellScript(driver) => driver.uninstall(formula, directive).await,
            Driver::GithubArchive(driver) => driver.uninstall(formula, directive).await,
        }
    }
}

/// Builds drivers by tool name.
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    settings: Settings,
    runner: CommandRunner,
    fetcher: GithubReleaseFetcher,
}

impl DriverRegistry {
    pub fn new(settings: &Settings, runner: CommandRunner) -> Result<Self> {
        Ok(Self {
            fetcher: GithubReleaseFetcher::new(settings)?,
            settings: settings.clone(),
            runner,
        })
    }

    /// The driver registered for `tool`, if any.
    pub fn driver_for(&self, tool: &str) -> Option<Driver> {
        let driver = match tool {
            "apt" => Driver::PackageManager(PackageManagerDriver::new(
                PackageManager::Apt,
                self.runner.clone(),
            )),
            "dnf" => Driver::PackageManager(PackageManagerDriver::new(
                PackageManager::Dnf,
                self.runner.clone(),
            )),
            "npm" => Driver::PackageManager(PackageManagerDriver::new(
                PackageManager::Npm,
                self.runner.clone(),
            )),
            "homebrew" => Driver::Homebrew(HomebrewDriver::new(self.runner.clone())),
            "shell-script" => Driver::ShellScript(ShellScriptDriver::new(
                &self.settings,
                self.runner.clone(),
                self.fetcher.client().clone(),
            )),
            "github-archive" => Driver::GithubArchive(GithubArchiveDriver::new(
                &self.settings,
                self.runner.clone(),
                self.fetcher.clone(),
            )),
            _ => return None,
        };
        Some(driver)
    }
}

/// The value of a directive field the driver cannot work without.
pub(crate) fn required<'a>(
    formula: &str,
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MicasaError::MissingDirectiveField {
            formula: formula.to_string(),
            field,
        })
}

/// The identifier to report for a package: `package-id`, then `executable`, then the
/// formula name.
pub(crate) fn display_id(formula: &str, directive: &InstallerDirective) -> String {
    directive
        .package_id
        .as_deref()
        .or(directive.executable.as_deref())
        .unwrap_or(formula)
        .to_string()
}

/// Locate `executable` in `bin_dir`, then on `PATH`.
pub(crate) fn find_executable(bin_dir: &Path, executable: &str) -> Option<PathBuf> {
    let local = bin_dir.join(executable);
    if local.is_file() {
        return Some(local);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

/// Run `<executable> --version` and pull a version out of its first line of output.
///
/// Returns `None` when the executable is not installed or reports nothing usable.
pub(crate) async fn query_installed_version(
    runner: &CommandRunner,
    bin_dir: &Path,
    executable: &str,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let Some(path) = find_executable(bin_dir, executable) else {
        debug!("...{} not found in {} or on PATH", executable, bin_dir.display());
        return Ok(None);
    };

    let quick = CommandRunner::new(runner.timeout().min(VERSION_QUERY_TIMEOUT));
    let program = path.to_string_lossy();
    let result = match quick.run(program.as_ref(), &["--version"], cancel).await {
        Ok(result) => result,
        Err(MicasaError::Cancelled) => return Err(MicasaError::Cancelled),
        Err(e) => {
            debug!("...version query of {} failed: {}", path.display(), e);
            return Ok(None);
        }
    };

    if result.timed_out {
        return Ok(None);
    }

    let output = [result.stdout.as_deref(), result.stderr.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");

    Ok(output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(extract_version))
}

/// The first token of `line` that looks like a version number, without a leading `v`.
/// Falls back to the whole line.
pub fn extract_version(line: &str) -> String {
    line.split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, ',' | '(' | ')' | ';')))
        .map(|token| token.strip_prefix('v').unwrap_or(token))
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(line)
        .to_string()
}

/// True when the process already runs with root privileges.
pub(crate) fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
