//! Installer-script driver.
//!
//! Downloads a vendor install script (`https://astral.sh/uv/install.sh` and friends)
//! into a private temporary file and runs it with `sh`. The temporary file is owned by
//! a guard and removed on every exit path.

use super::{display_id, query_installed_version, required};
use crate::command::CommandRunner;
use crate::config::Settings;
use crate::download::download_file;
use crate::error::{MicasaError, Result};
use crate::formula::{FormulaDetails, InstallerDirective};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ShellScriptDriver {
    runner: CommandRunner,
    client: reqwest::Client,
    bin_dir: PathBuf,
    temp_dir: PathBuf,
}

impl ShellScriptDriver {
    pub fn new(settings: &Settings, runner: CommandRunner, client: reqwest::Client) -> Self {
        Self {
            runner,
            client,
            bin_dir: settings.bin_dir(),
            temp_dir: settings.temp_dir.clone(),
        }
    }

    pub async fn info(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<FormulaDetails> {
        let installed_version = match directive.executable.as_deref() {
            Some(executable) => {
                query_installed_version(&self.runner, &self.bin_dir, executable, cancel).await?
            }
            None => None,
        };

        Ok(FormulaDetails {
            package_id: display_id(formula, directive),
            stable_version: None,
            installed_version,
        })
    }

    pub async fn install(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let installer_url = required(formula, &directive.installer_url, "installer-url")?;

        let script = tempfile::Builder::new()
            .prefix("micasa-")
            .suffix(".sh")
            .tempfile_in(&self.temp_dir)?;

        let outcome = self.run_script(installer_url, &script, cancel).await;

        let path = script.path().to_path_buf();
        if let Err(e) = script.close() {
            warn!("Failed to remove installer script {}: {}", path.display(), e);
        }

        outcome
    }

    async fn run_script(
        &self,
        installer_url: &str,
        script: &NamedTempFile,
        cancel: &CancellationToken,
    ) -> Result<()> {
        download_file(&self.client, installer_url, script.path(), None, cancel).await?;

        let path = script.path().to_string_lossy().into_owned();
        info!("Running installer script from {}", installer_url);
        let result = self.runner.run("sh", &[path], cancel).await?;
        self.runner.ensure_success(result)?;
        Ok(())
    }

    /// Remove `{home}/.local/bin/{executable}`.
    pub async fn uninstall(&self, formula: &str, directive: &InstallerDirective) -> Result<()> {
        let executable = required(formula, &directive.executable, "executable")?;
        let path = self.bin_dir.join(executable);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("...removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MicasaError::NotInstalled(executable.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
