//! Archive unpacking for downloaded release assets.
//!
//! Archives are unpacked in place, into the directory that holds them:
//! ```text
//! /tmp/micasa-XXXXXX/
//!   bat-v0.26.1-x86_64-unknown-linux-musl.tar.gz
//!   bat-v0.26.1-x86_64-unknown-linux-musl/    <- unpacked here
//!     bat
//!     bat.1
//! ```
//!
//! Formats are detected from the file name, compound suffixes (`.tar.gz`, `.tar.bz2`,
//! `.tar.xz`) first. Tarballs are unpacked with the system `tar`. AppImages are used as
//! they are unless the directive says they need FUSE, in which case they are
//! self-extracted with `--appimage-extract`. Anything else is an error, never skipped.

use crate::command::CommandRunner;
use crate::error::{MicasaError, Result};
use crate::formula::InstallerDirective;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Archive kinds recognised by file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarBz2,
    TarXz,
    AppImage,
    /// Any other extension, lowercased with its leading dot (empty if none)
    Other(String),
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") {
            return ArchiveFormat::TarGz;
        }
        if name.ends_with(".tar.bz2") {
            return ArchiveFormat::TarBz2;
        }
        if name.ends_with(".tar.xz") {
            return ArchiveFormat::TarXz;
        }

        match path.extension().map(|e| e.to_string_lossy().to_lowercase()) {
            Some(ext) if ext == "appimage" => ArchiveFormat::AppImage,
            Some(ext) => ArchiveFormat::Other(format!(".{}", ext)),
            None => ArchiveFormat::Other(String::new()),
        }
    }

    fn extension(&self) -> &str {
        match self {
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::TarBz2 => ".tar.bz2",
            ArchiveFormat::TarXz => ".tar.xz",
            ArchiveFormat::AppImage => ".appimage",
            ArchiveFormat::Other(ext) => ext,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
    runner: CommandRunner,
}

impl ArchiveUnpacker {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Unpack `archive_path` into its containing directory.
    pub async fn unpack(
        &self,
        directive: &InstallerDirective,
        archive_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let work_dir = archive_path.parent().ok_or_else(|| {
            MicasaError::InvalidArgument(format!(
                "cannot determine the directory of {}",
                archive_path.display()
            ))
        })?;

        match ArchiveFormat::detect(archive_path) {
            ArchiveFormat::TarGz => self.unpack_tar_gz(archive_path, work_dir, cancel).await,
            ArchiveFormat::AppImage => {
                self.unpack_appimage(directive, archive_path, work_dir, cancel)
                    .await
            }
            other => Err(MicasaError::UnsupportedFormat(format!(
                "unpacking '{}' archives is not implemented ({})",
                other.extension(),
                archive_path.display()
            ))),
        }
    }

    async fn unpack_tar_gz(
        &self,
        archive_path: &Path,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let archive = archive_path.to_string_lossy();
        let result = self
            .runner
            .run_in("tar", &["xvfz", &*archive], work_dir, cancel)
            .await?;
        self.runner.ensure_success(result)?;
        Ok(())
    }

    async fn unpack_appimage(
        &self,
        directive: &InstallerDirective,
        archive_path: &Path,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !directive.requires_fuse() {
            debug!(
                "...{} does not need extracting, using it as is",
                archive_path.display()
            );
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            debug!(
                "...setting executable permissions on AppImage file {}...",
                archive_path.display()
            );
            tokio::fs::set_permissions(archive_path, std::fs::Permissions::from_mode(0o700))
                .await?;
        }

        let program = archive_path.to_string_lossy();
        let result = self
            .runner
            .run_in(program.as_ref(), &["--appimage-extract"], work_dir, cancel)
            .await?;
        self.runner.ensure_success(result)?;
        Ok(())
    }
}
