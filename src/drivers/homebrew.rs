//! Homebrew driver.

use crate::command::CommandRunner;
use crate::error::{MicasaError, Result};
use crate::formula::{FormulaDetails, InstallerDirective};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct BrewInfo {
    #[serde(default)]
    formulae: Vec<BrewFormula>,
}

#[derive(Debug, Deserialize)]
struct BrewFormula {
    name: String,
    #[serde(default)]
    versions: Option<BrewVersions>,
    #[serde(default)]
    installed: Vec<BrewInstalled>,
}

#[derive(Debug, Deserialize)]
struct BrewVersions {
    #[serde(default)]
    stable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrewInstalled {
    #[serde(default)]
    version: Option<String>,
}

/// Parse `brew info --json=v2` output, which must describe exactly one formula.
pub fn parse_brew_info(stdout: &str) -> Result<FormulaDetails> {
    let info: BrewInfo = serde_json::from_str(stdout)?;

    let [formula] = info.formulae.as_slice() else {
        return Err(MicasaError::UnexpectedOutput {
            command: "brew info".to_string(),
            reason: format!("expected exactly one formula, found {}", info.formulae.len()),
        });
    };

    Ok(FormulaDetails {
        package_id: formula.name.clone(),
        stable_version: formula.versions.as_ref().and_then(|v| v.stable.clone()),
        installed_version: formula.installed.first().and_then(|i| i.version.clone()),
    })
}

#[derive(Debug, Clone)]
pub struct HomebrewDriver {
    runner: CommandRunner,
}

impl HomebrewDriver {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub async fn info(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<FormulaDetails> {
        let package_id = package_id(formula, directive);
        let result = self
            .runner
            .run("brew", &["info", "--json=v2", package_id], cancel)
            .await?;

        match result.stdout.as_deref() {
            Some(stdout) => parse_brew_info(stdout),
            None => {
                self.runner.verify_exit_code_zero(&result);
                Err(MicasaError::UnexpectedOutput {
                    command: result.command_line(),
                    reason: format!("no output for formula {}", package_id),
                })
            }
        }
    }

    pub async fn install(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.brew("install", package_id(formula, directive), cancel)
            .await
    }

    pub async fn uninstall(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.brew("uninstall", package_id(formula, directive), cancel)
            .await
    }

    async fn brew(&self, subcommand: &str, package_id: &str, cancel: &CancellationToken) -> Result<()> {
        let result = self
            .runner
            .run("brew", &[subcommand, package_id], cancel)
            .await?;
        self.runner.ensure_success(result)?;
        Ok(())
    }
}

fn package_id<'a>(formula: &'a str, directive: &'a InstallerDirective) -> &'a str {
    directive.package_id.as_deref().unwrap_or(formula)
}
