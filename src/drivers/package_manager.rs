//! Package manager driver (apt, dnf and global npm packages).

use crate::command::CommandRunner;
use crate::error::{MicasaError, Result};
use crate::formula::{FormulaDetails, InstallerDirective};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The package managers this driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Npm,
}

impl PackageManager {
    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Npm => "npm",
        }
    }

    fn info_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            PackageManager::Apt => ("apt-cache", &["policy"]),
            PackageManager::Dnf => ("dnf", &["info"]),
            PackageManager::Npm => ("npm", &["view", "--json"]),
        }
    }

    /// A second query for the installed version, for managers whose info command only
    /// describes the registry. The package id is not appended.
    fn installed_command(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            PackageManager::Npm => Some(("npm", &["list", "-g", "--json", "--depth=0"])),
            PackageManager::Apt | PackageManager::Dnf => None,
        }
    }

    fn install_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            PackageManager::Apt => ("apt-get", &["install", "-y"]),
            PackageManager::Dnf => ("dnf", &["install", "-y"]),
            PackageManager::Npm => ("npm", &["install", "-g"]),
        }
    }

    fn remove_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            PackageManager::Apt => ("apt-get", &["remove", "-y"]),
            PackageManager::Dnf => ("dnf", &["remove", "-y"]),
            PackageManager::Npm => ("npm", &["uninstall", "-g"]),
        }
    }

    /// Parse the output of the info command.
    pub fn parse_info(&self, package_id: &str, stdout: &str) -> Result<FormulaDetails> {
        match self {
            PackageManager::Apt => parse_apt_policy(stdout),
            PackageManager::Dnf => Ok(parse_dnf_info(package_id, stdout)),
            PackageManager::Npm => parse_npm_view(package_id, stdout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageManagerDriver {
    manager: PackageManager,
    runner: CommandRunner,
}

impl PackageManagerDriver {
    pub fn new(manager: PackageManager, runner: CommandRunner) -> Self {
        Self { manager, runner }
    }

    pub fn manager(&self) -> PackageManager {
        self.manager
    }

    pub async fn info(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<FormulaDetails> {
        let package_id = package_id(formula, directive);
        let (program, args) = self.manager.info_command();
        let stdout = self
            .query(program, &with_package(args, package_id), package_id, cancel)
            .await?;
        let mut details = self.manager.parse_info(package_id, &stdout)?;

        if let Some((program, args)) = self.manager.installed_command() {
            let stdout = self.query(program, args, package_id, cancel).await?;
            details.installed_version = parse_npm_list(package_id, &stdout)?;
        }

        Ok(details)
    }

    async fn query<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        package_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let result = self.runner.run(program, args, cancel).await?;
        // Output is still worth parsing after a non-zero exit
        self.runner.verify_exit_code_zero(&result);

        let command = result.command_line();
        result.stdout.ok_or_else(|| MicasaError::UnexpectedOutput {
            command,
            reason: format!("no output for package {}", package_id),
        })
    }

    /// Install the package. The package manager decides what to do if it is already
    /// installed.
    pub async fn install(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (program, args) = self.manager.install_command();
        self.run_elevated(program, args, package_id(formula, directive), cancel)
            .await
    }

    pub async fn uninstall(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (program, args) = self.manager.remove_command();
        self.run_elevated(program, args, package_id(formula, directive), cancel)
            .await
    }

    async fn run_elevated(
        &self,
        program: &str,
        args: &[&str],
        package_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (program, args) = elevate(program, with_package(args, package_id), super::is_root());
        debug!("...{} {}...", program, args.join(" "));

        let result = self.runner.run(&program, &args, cancel).await?;
        self.runner.ensure_success(result)?;
        Ok(())
    }
}

fn package_id<'a>(formula: &'a str, directive: &'a InstallerDirective) -> &'a str {
    directive.package_id.as_deref().unwrap_or(formula)
}

fn with_package(args: &[&str], package_id: &str) -> Vec<String> {
    args.iter()
        .map(|a| a.to_string())
        .chain(std::iter::once(package_id.to_string()))
        .collect()
}

/// Prefix the command with `sudo` unless already running as root.
fn elevate(program: &str, args: Vec<String>, is_root: bool) -> (String, Vec<String>) {
    if is_root {
        (program.to_string(), args)
    } else {
        let mut elevated = vec![program.to_string()];
        elevated.extend(args);
        ("sudo".to_string(), elevated)
    }
}

/// Parse `apt-cache policy <package>` output.
///
/// ```text
/// bat:
///   Installed: (none)
///   Candidate: 0.24.0-1build1
/// ```
pub fn parse_apt_policy(stdout: &str) -> Result<FormulaDetails> {
    let mut package_id = None;
    let mut installed = None;
    let mut candidate = None;

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if package_id.is_none() && line.ends_with(':') {
            package_id = Some(line.trim_end_matches(':').to_string());
            continue;
        }

        if let Some(value) = line.strip_prefix("Installed:") {
            let value = value.trim();
            installed = (value != "(none)" && !value.is_empty()).then(|| value.to_string());
        } else if let Some(value) = line.strip_prefix("Candidate:") {
            let value = value.trim();
            candidate = (value != "(none)" && !value.is_empty()).then(|| value.to_string());
        }
    }

    let package_id = package_id.ok_or_else(|| MicasaError::UnexpectedOutput {
        command: "apt-cache policy".to_string(),
        reason: "could not find the package id".to_string(),
    })?;

    Ok(FormulaDetails {
        package_id,
        stable_version: candidate,
        installed_version: installed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DnfSection {
    None,
    Installed,
    Available,
}

#[derive(Debug, Default)]
struct DnfPackage {
    name: Option<String>,
    version: Option<String>,
    release: Option<String>,
}

impl DnfPackage {
    fn full_version(&self) -> Option<String> {
        match (&self.version, &self.release) {
            (Some(v), Some(r)) => Some(format!("{}-{}", v, r)),
            (Some(v), None) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Parse `dnf info <package>` output.
///
/// Fields are read from the `Installed Packages` and `Available Packages` sections.
/// With no separate available version, the installed one is the newest known.
pub fn parse_dnf_info(package_id: &str, stdout: &str) -> FormulaDetails {
    let mut section = DnfSection::None;
    let mut installed = DnfPackage::default();
    let mut available = DnfPackage::default();

    for line in stdout.lines() {
        let trimmed = line.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "installed packages" => {
                section = DnfSection::Installed;
                continue;
            }
            "available packages" => {
                section = DnfSection::Available;
                continue;
            }
            _ => {}
        }

        let package = match section {
            DnfSection::Installed => &mut installed,
            DnfSection::Available => &mut available,
            DnfSection::None => continue,
        };

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let slot = match key.trim() {
            "Name" => &mut package.name,
            "Version" => &mut package.version,
            "Release" => &mut package.release,
            _ => continue,
        };
        // First package of a section wins
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }

    let installed_version = installed.full_version();
    let stable_version = available
        .full_version()
        .or_else(|| installed_version.clone());
    FormulaDetails {
        package_id: available
            .name
            .or(installed.name)
            .unwrap_or_else(|| package_id.to_string()),
        stable_version,
        installed_version,
    }
}

#[derive(Debug, Deserialize)]
struct NpmView {
    name: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NpmList {
    #[serde(default)]
    dependencies: HashMap<String, NpmListedPackage>,
}

#[derive(Debug, Deserialize)]
struct NpmListedPackage {
    version: Option<String>,
}

/// Parse `npm view --json <package>`.
///
/// An unknown package comes back as an `error` object, which has no version.
pub fn parse_npm_view(package_id: &str, stdout: &str) -> Result<FormulaDetails> {
    let view: NpmView = serde_json::from_str(stdout)?;
    Ok(FormulaDetails {
        package_id: view.name.unwrap_or_else(|| package_id.to_string()),
        stable_version: view.version,
        installed_version: None,
    })
}

/// The version of `package_id` in `npm list -g --json --depth=0` output.
pub fn parse_npm_list(package_id: &str, stdout: &str) -> Result<Option<String>> {
    let list: NpmList = serde_json::from_str(stdout)?;
    Ok(list
        .dependencies
        .get(package_id)
        .and_then(|package| package.version.clone()))
}
