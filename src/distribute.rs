//! Placement of unpacked release files into the user's canonical directories.
//!
//! An unpacked release comes in one of three shapes, tried in this order:
//!
//! 1. **Opt-tree**: a subdirectory with `bin/`, `lib/` or `share/`. The whole tree moves
//!    to `~/.local/opt/{name}` and every file in its `bin/` is symlinked from
//!    `~/.local/bin`, so binaries keep finding their libraries.
//! 2. **Subdirectory binary**: a subdirectory holding exactly one extensionless,
//!    non-documentation file. It is copied to `~/.local/bin`, and a sibling `.1` man
//!    page to `~/.local/share/man/man1`.
//! 3. **Flat binary**: the extraction root itself holds exactly one file that is neither
//!    an archive nor documentation. It is copied to `~/.local/bin`.
//!
//! Single binaries take the formula's executable name when it has one, so
//! `nvim-linux-x86_64.appimage` lands as `~/.local/bin/nvim`.
//!
//! If no shape matches, distribution fails with [`MicasaError::NoDistributionPattern`].
//!
//! ```text
//! nvim-linux-x86_64/          ~/.local/opt/nvim/
//!   bin/nvim           =>       bin/nvim  <-  ~/.local/bin/nvim
//!   lib/nvim/...                lib/nvim/...
//!   share/...                   share/...
//! ```

use crate::config::Settings;
use crate::error::{MicasaError, Result};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Extensions of files that are archives, not binaries.
const ARCHIVE_EXTENSIONS: &[&str] = &["gz", "zip", "tgz", "tar"];

/// File name fragments marking documentation, matched case-insensitively.
const DOC_MARKERS: &[&str] = &["license", "readme", "changelog", "copying", "authors"];

const OPT_TREE_DIRS: &[&str] = &["bin", "lib", "share"];

/// What [`FileDistributor::distribute`] put where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    /// A tree moved under the opt directory, with symlinks into the bin directory
    OptTree { root: PathBuf, links: Vec<PathBuf> },
    /// A single binary, and its man page when one was found
    Binary {
        binary: PathBuf,
        man_page: Option<PathBuf>,
    },
}

impl Distribution {
    /// Every path created in the user's directories.
    pub fn installed_paths(&self) -> Vec<&Path> {
        match self {
            Distribution::OptTree { root, links } => std::iter::once(root.as_path())
                .chain(links.iter().map(PathBuf::as_path))
                .collect(),
            Distribution::Binary { binary, man_page } => std::iter::once(binary.as_path())
                .chain(man_page.as_deref())
                .collect(),
        }
    }
}

/// Distributes unpacked files into `~/.local/{bin,opt,share/man/man1}`.
#[derive(Debug, Clone)]
pub struct FileDistributor {
    bin_dir: PathBuf,
    man1_dir: PathBuf,
    opt_dir: PathBuf,
}

impl FileDistributor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            bin_dir: settings.bin_dir(),
            man1_dir: settings.man1_dir(),
            opt_dir: settings.opt_dir(),
        }
    }

    /// Distribute the contents of `extraction_dir`, naming a single binary
    /// `executable` when given.
    pub fn distribute(
        &self,
        extraction_dir: &Path,
        executable: Option<&str>,
    ) -> Result<Distribution> {
        let subdirs = sorted_entries(extraction_dir, EntryKind::Dir)?;

        for subdir in &subdirs {
            if is_opt_tree(subdir) {
                return self.install_opt_tree(subdir);
            }
        }

        for subdir in &subdirs {
            let files = sorted_entries(subdir, EntryKind::File)?;
            if let Some(binary) = single(files.iter().filter(|f| is_subdir_binary(f))) {
                return self.install_binary(binary, find_man_page(&files, binary), executable);
            }
        }

        let files = sorted_entries(extraction_dir, EntryKind::File)?;
        if let Some(binary) = single(files.iter().filter(|f| is_flat_binary(f))) {
            return self.install_binary(binary, None, executable);
        }

        Err(MicasaError::NoDistributionPattern(
            extraction_dir.to_path_buf(),
        ))
    }

    fn install_opt_tree(&self, subdir: &Path) -> Result<Distribution> {
        let bin = subdir.join("bin");
        let first_binary = if bin.is_dir() {
            sorted_entries(&bin, EntryKind::NotDir)?.into_iter().next()
        } else {
            None
        };

        let target_name = first_binary
            .as_deref()
            .or(Some(subdir))
            .and_then(Path::file_name)
            .ok_or_else(|| MicasaError::NoDistributionPattern(subdir.to_path_buf()))?;

        fs::create_dir_all(&self.opt_dir)?;
        let root = self.opt_dir.join(target_name);
        remove_existing(&root)?;
        move_dir(subdir, &root)?;

        let mut links = Vec::new();
        let target_bin = root.join("bin");
        if target_bin.is_dir() {
            fs::create_dir_all(&self.bin_dir)?;
            for binary in sorted_entries(&target_bin, EntryKind::NotDir)? {
                let Some(name) = binary.file_name() else {
                    continue;
                };
                let link = self.bin_dir.join(name);
                create_symlink(&binary, &link)?;
                links.push(link);
            }
        }

        Ok(Distribution::OptTree { root, links })
    }

    fn install_binary(
        &self,
        binary: &Path,
        man_page: Option<&Path>,
        executable: Option<&str>,
    ) -> Result<Distribution> {
        let name = match executable {
            Some(executable) => OsStr::new(executable),
            None => binary
                .file_name()
                .ok_or_else(|| MicasaError::NoDistributionPattern(binary.to_path_buf()))?,
        };

        fs::create_dir_all(&self.bin_dir)?;
        let target = self.bin_dir.join(name);
        copy_file(binary, &target)?;
        set_executable(&target)?;

        let man_target = match man_page {
            Some(page) => {
                fs::create_dir_all(&self.man1_dir)?;
                let target = self
                    .man1_dir
                    .join(format!("{}.1", name.to_string_lossy()));
                copy_file(page, &target)?;
                Some(target)
            }
            None => None,
        };

        Ok(Distribution::Binary {
            binary: target,
            man_page: man_target,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    /// Files and symlinks
    NotDir,
}

/// Non-hidden entries of `dir` of the given kind, sorted by name.
fn sorted_entries(dir: &Path, kind: EntryKind) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        let keep = match kind {
            EntryKind::File => file_type.is_file(),
            EntryKind::Dir => file_type.is_dir(),
            EntryKind::NotDir => !file_type.is_dir(),
        };
        if keep {
            entries.push(entry.path());
        }
    }

    entries.sort();
    Ok(entries)
}

fn single<T>(mut iter: impl Iterator<Item = T>) -> Option<T> {
    let first = iter.next()?;
    match iter.next() {
        Some(_) => None,
        None => Some(first),
    }
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn is_opt_tree(subdir: &Path) -> bool {
    OPT_TREE_DIRS.iter().any(|d| subdir.join(d).is_dir())
}

fn is_doc(path: &Path) -> bool {
    let name = file_name_lower(path);
    DOC_MARKERS.iter().any(|marker| name.contains(marker))
}

fn is_subdir_binary(path: &Path) -> bool {
    path.extension().is_none() && !is_doc(path)
}

fn is_flat_binary(path: &Path) -> bool {
    let is_archive = extension_lower(path)
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()));
    let is_markdown = extension_lower(path).is_some_and(|ext| ext == "md");

    !is_archive && !is_markdown && !is_doc(path)
}

/// `{binary}.1` when present, else the first `.1` file.
fn find_man_page<'a>(files: &'a [PathBuf], binary: &Path) -> Option<&'a Path> {
    let preferred = binary
        .file_name()
        .map(|name| format!("{}.1", name.to_string_lossy()));

    files
        .iter()
        .find(|f| {
            f.file_name()
                .is_some_and(|n| preferred.as_deref() == Some(&*n.to_string_lossy()))
        })
        .or_else(|| files.iter().find(|f| extension_lower(f).as_deref() == Some("1")))
        .map(PathBuf::as_path)
}

/// Remove whatever is at `path`: a directory tree, a file, or a (possibly dangling) symlink.
fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            debug!("...replacing existing directory {}", path.display());
            fs::remove_dir_all(path)
        }
        Ok(_) => {
            debug!("...replacing existing {}", path.display());
            fs::remove_file(path)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_file(source: &Path, target: &Path) -> Result<()> {
    info!(
        "...copying file from '{}' to '{}'...",
        source.display(),
        target.display()
    );
    remove_existing(target)?;
    fs::copy(source, target)?;
    Ok(())
}

fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    info!(
        "...creating symlink at '{}' pointing to '{}'...",
        link.display(),
        target.display()
    );
    remove_existing(link)?;
    unix_fs::symlink(target, link)?;
    Ok(())
}

fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// Move a directory tree, falling back to copy-and-delete across filesystems.
pub fn move_dir(source: &Path, target: &Path) -> Result<()> {
    info!(
        "...moving directory from '{}' to '{}'...",
        source.display(),
        target.display()
    );

    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("...rename crosses filesystems, copying instead");
            copy_then_remove(source, target)
        }
        Err(e) => Err(e.into()),
    }
}

/// The cross-filesystem half of [`move_dir`]: copy `source` to `target`, then delete
/// `source`. A failed copy leaves `source` untouched.
pub fn copy_then_remove(source: &Path, target: &Path) -> Result<()> {
    copy_dir_recursive(source, target)?;
    fs::remove_dir_all(source)?;
    Ok(())
}

fn is_cross_device(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::CrossesDevices
}

/// Copy every file, directory and symlink under `source` to `target`.
pub fn copy_dir_recursive(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| MicasaError::Other(e.into()))?;
        let destination = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&destination)?;
        } else if file_type.is_symlink() {
            unix_fs::symlink(fs::read_link(entry.path())?, &destination)?;
        } else {
            fs::copy(entry.path(), &destination)?;
        }
    }

    Ok(())
}
