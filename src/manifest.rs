//! The user's package manifest.
//!
//! One formula per line, optionally followed by a version spec:
//!
//! ```text
//! # editors
//! neovim: >=0.11.5
//! ripgrep
//! uv: ~=0.9.17
//! ```
//!
//! Version specs use PEP 440 syntax and are checked by `micasa install`; see
//! [`crate::version`].

use crate::error::{MicasaError, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub version_spec: Option<String>,
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_spec {
            Some(spec) => write!(f, "{} ({})", self.name, spec),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn read_from_path(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MicasaError::ManifestNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        content.parse()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromStr for Manifest {
    type Err = MicasaError;

    fn from_str(content: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (name, version_spec) = match line.split_once(':') {
                Some((name, spec)) => {
                    let spec = spec.trim();
                    (name.trim(), (!spec.is_empty()).then(|| spec.to_string()))
                }
                None => (line, None),
            };

            if name.is_empty() {
                return Err(MicasaError::InvalidManifest(format!(
                    "empty package name on line {}",
                    index + 1
                )));
            }

            entries.push(ManifestEntry {
                name: name.to_string(),
                version_spec,
            });
        }

        Ok(Self { entries })
    }
}
