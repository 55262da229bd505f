//! GitHub release archive driver.
//!
//! Installs a tool straight from the latest GitHub release of its repository:
//!
//! ```text
//! Idle -> FetchingRelease -> SelectingAsset -> Downloading -> Unpacking -> Distributing -> Done
//!                                    \______________ any failure ______________/ -> Failed
//! ```
//!
//! All work happens inside one private temporary directory that is removed when the
//! install ends, whichever stage it ended in. No stage is retried.

use super::{query_installed_version, required};
use crate::command::CommandRunner;
use crate::config::Settings;
use crate::distribute::{Distribution, FileDistributor};
use crate::download::download_file;
use crate::error::{MicasaError, Result};
use crate::extract::ArchiveUnpacker;
use crate::formula::{FormulaDetails, InstallerDirective};
use crate::github::GithubReleaseFetcher;
use crate::platform::system_arch;
use crate::seeker::find_best_asset;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a GitHub archive install currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Idle,
    FetchingRelease,
    SelectingAsset,
    Downloading,
    Unpacking,
    Distributing,
    Done,
    Failed,
}

impl InstallStage {
    fn advance(&mut self, formula: &str, next: InstallStage) {
        debug!("...{}: {} -> {}", formula, self, next);
        *self = next;
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstallStage::Idle => "idle",
            InstallStage::FetchingRelease => "fetching release info",
            InstallStage::SelectingAsset => "selecting asset",
            InstallStage::Downloading => "downloading",
            InstallStage::Unpacking => "unpacking",
            InstallStage::Distributing => "distributing",
            InstallStage::Done => "done",
            InstallStage::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone)]
pub struct GithubArchiveDriver {
    runner: CommandRunner,
    fetcher: GithubReleaseFetcher,
    distributor: FileDistributor,
    bin_dir: PathBuf,
    opt_dir: PathBuf,
    man1_dir: PathBuf,
    temp_dir: PathBuf,
}

impl GithubArchiveDriver {
    pub fn new(settings: &Settings, runner: CommandRunner, fetcher: GithubReleaseFetcher) -> Self {
        Self {
            runner,
            fetcher,
            distributor: FileDistributor::new(settings),
            bin_dir: settings.bin_dir(),
            opt_dir: settings.opt_dir(),
            man1_dir: settings.man1_dir(),
            temp_dir: settings.temp_dir.clone(),
        }
    }

    /// Latest release version, and the version reported by the installed executable.
    pub async fn info(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<FormulaDetails> {
        let repo_url = required(formula, &directive.repo_url, "repo-url")?;
        let release = self.fetcher.fetch_latest_release(repo_url, cancel).await?;

        let installed_version = match directive.executable.as_deref() {
            Some(executable) => {
                query_installed_version(&self.runner, &self.bin_dir, executable, cancel).await?
            }
            None => None,
        };

        Ok(FormulaDetails {
            package_id: directive
                .executable
                .clone()
                .unwrap_or_else(|| formula.to_string()),
            stable_version: release.version().map(String::from),
            installed_version,
        })
    }

    /// Install the latest release, returning where its files went.
    pub async fn install(
        &self,
        formula: &str,
        directive: &InstallerDirective,
        cancel: &CancellationToken,
    ) -> Result<Distribution> {
        let repo_url = required(formula, &directive.repo_url, "repo-url")?;

        let workspace = tempfile::Builder::new()
            .prefix("micasa-")
            .tempdir_in(&self.temp_dir)?;
        let mut stage = InstallStage::Idle;

        let outcome = self
            .run_stages(formula, repo_url, directive, workspace.path(), &mut stage, cancel)
            .await;

        match &outcome {
            Ok(_) => stage.advance(formula, InstallStage::Done),
            Err(e) => {
                debug!("...{} failed while {}: {}", formula, stage, e);
                stage.advance(formula, InstallStage::Failed);
            }
        }

        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
        }

        outcome
    }

    async fn run_stages(
        &self,
        formula: &str,
        repo_url: &str,
        directive: &InstallerDirective,
        workspace: &Path,
        stage: &mut InstallStage,
        cancel: &CancellationToken,
    ) -> Result<Distribution> {
        stage.advance(formula, InstallStage::FetchingRelease);
        let release = self.fetcher.fetch_latest_release(repo_url, cancel).await?;

        stage.advance(formula, InstallStage::SelectingAsset);
        let asset = find_best_asset(&release, system_arch())?;

        stage.advance(formula, InstallStage::Downloading);
        let archive_path = workspace.join(&asset.name);
        info!(
            "Downloading {} {}",
            asset.name,
            release.version().unwrap_or_default()
        );
        download_file(
            self.fetcher.client(),
            &asset.download_url,
            &archive_path,
            asset.sha256(),
            cancel,
        )
        .await?;

        stage.advance(formula, InstallStage::Unpacking);
        ArchiveUnpacker::new(self.runner.clone())
            .unpack(directive, &archive_path, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(MicasaError::Cancelled);
        }

        stage.advance(formula, InstallStage::Distributing);
        let distributor = self.distributor.clone();
        let workspace = workspace.to_path_buf();
        let executable = directive.executable.clone();
        let distribution = tokio::task::spawn_blocking(move || {
            distributor.distribute(&workspace, executable.as_deref())
        })
        .await
        .map_err(|e| anyhow::anyhow!("distribution task failed: {}", e))??;

        for path in distribution.installed_paths() {
            info!("Installed {}", path.display());
        }

        Ok(distribution)
    }

    /// Remove the executable from the bin directory, along with its opt tree and man
    /// page when present.
    pub async fn uninstall(&self, formula: &str, directive: &InstallerDirective) -> Result<()> {
        let executable = required(formula, &directive.executable, "executable")?;

        let candidates = [
            self.bin_dir.join(executable),
            self.opt_dir.join(executable),
            self.man1_dir.join(format!("{}.1", executable)),
        ];

        let mut removed = false;
        for path in &candidates {
            removed |= remove_path(path).await?;
        }

        if removed {
            Ok(())
        } else {
            Err(MicasaError::NotInstalled(executable.to_string()))
        }
    }
}

/// Remove a file, symlink or directory tree. Returns false when nothing was there.
async fn remove_path(path: &Path) -> Result<bool> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    debug!("...removed {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::TempDir;

    fn directive(repo_url: Option<&str>, executable: Option<&str>) -> InstallerDirective {
        InstallerDirective {
            tool: "github-archive".to_string(),
            package_id: None,
            executable: executable.map(String::from),
            installer_url: None,
            repo_url: repo_url.map(String::from),
            requires_fuse: None,
        }
    }

    fn driver(settings: &Settings) -> GithubArchiveDriver {
        GithubArchiveDriver::new(
            settings,
            CommandRunner::default(),
            GithubReleaseFetcher::new(settings).unwrap(),
        )
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(InstallStage::FetchingRelease.to_string(), "fetching release info");
        let mut stage = InstallStage::Idle;
        stage.advance("bat", InstallStage::SelectingAsset);
        assert_eq!(stage, InstallStage::SelectingAsset);
    }

    #[tokio::test]
    async fn test_install_requires_repo_url() {
        let home = TempDir::new().unwrap();
        let err = driver(&Settings::with_home(home.path()))
            .install("bat", &directive(None, Some("bat")), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MicasaError::MissingDirectiveField { field: "repo-url", .. }
        ));
    }

    #[tokio::test]
    async fn test_release_without_linux_assets_fails() {
        let home = TempDir::new().unwrap();
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/example/tool/releases/latest")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"name": "v1.0.0", "tag_name": "v1.0.0", "assets": [
                    {"name": "tool-1.0.0-x86_64-apple-darwin.tar.gz",
                     "browser_download_url": "https://example.invalid/tool.tar.gz"}
                ]}"#,
            )
            .create_async()
            .await;

        let mut settings = Settings::with_home(home.path());
        settings.github_api = server.url();
        settings.temp_dir = home.path().join("tmp");
        std::fs::create_dir_all(&settings.temp_dir).unwrap();

        let err = driver(&settings)
            .install(
                "tool",
                &directive(Some("https://github.com/example/tool"), Some("tool")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MicasaError::UnsupportedPlatform(_)));
        assert!(!settings.bin_dir().exists());
        assert_eq!(std::fs::read_dir(&settings.temp_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_info_reports_latest_release() {
        let home = TempDir::new().unwrap();
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/sharkdp/bat/releases/latest")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(include_str!("../../tests/fixtures/github/bat.json"))
            .create_async()
            .await;

        let mut settings = Settings::with_home(home.path());
        settings.github_api = server.url();

        let details = driver(&settings)
            .info(
                "bat",
                &directive(Some("https://github.com/sharkdp/bat"), Some("micasa-test-no-bat")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(details.package_id, "micasa-test-no-bat");
        assert_eq!(details.stable_version.as_deref(), Some("v0.26.1"));
        assert_eq!(details.installed_version, None);
    }

    #[tokio::test]
    async fn test_uninstall_removes_links_opt_tree_and_man_page() {
        let home = TempDir::new().unwrap();
        let settings = Settings::with_home(home.path());
        let opt = settings.opt_dir().join("nvim");
        std::fs::create_dir_all(opt.join("bin")).unwrap();
        std::fs::write(opt.join("bin/nvim"), "binary").unwrap();
        std::fs::create_dir_all(settings.bin_dir()).unwrap();
        std::os::unix::fs::symlink(opt.join("bin/nvim"), settings.bin_dir().join("nvim")).unwrap();
        std::fs::create_dir_all(settings.man1_dir()).unwrap();
        std::fs::write(settings.man1_dir().join("nvim.1"), "man").unwrap();

        let d = driver(&settings);
        let nvim = directive(Some("https://github.com/neovim/neovim"), Some("nvim"));
        d.uninstall("neovim", &nvim).await.unwrap();

        assert!(std::fs::symlink_metadata(settings.bin_dir().join("nvim")).is_err());
        assert!(!opt.exists());
        assert!(!settings.man1_dir().join("nvim.1").exists());

        let err = d.uninstall("neovim", &nvim).await.unwrap_err();
        assert!(matches!(err, MicasaError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn test_uninstall_requires_executable() {
        let home = TempDir::new().unwrap();
        let err = driver(&Settings::with_home(home.path()))
            .uninstall("bat", &directive(Some("https://github.com/sharkdp/bat"), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MicasaError::MissingDirectiveField { field: "executable", .. }
        ));
    }
}
