use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MicasaError {
    #[error("Formula not found: {0}")]
    FormulaNotFound(String),

    #[error("No matching platform for {platform} in formula {formula} (known platforms: {known})")]
    NoMatchingPlatform {
        formula: String,
        platform: String,
        known: String,
    },

    #[error("No installation driver for tool '{0}'")]
    NoDriver(String),

    #[error("Installer directive for {formula} is missing '{field}'")]
    MissingDirectiveField {
        formula: String,
        field: &'static str,
    },

    #[error("'{command}' exited with {}: {}", describe_exit(.exit_code), describe_stderr(.stderr))]
    ExternalTool {
        command: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("Unexpected output from '{command}': {reason}")]
    UnexpectedOutput { command: String, reason: String },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No recognizable distribution pattern found in {}", .0.display())]
    NoDistributionPattern(PathBuf),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Manifest file not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid version spec '{spec}': {reason}")]
    InvalidVersionSpec { spec: String, reason: String },

    #[error("No version of {formula} satisfies {spec} (found {found})")]
    NoSatisfactoryVersion {
        formula: String,
        spec: String,
        found: String,
    },

    #[error("Checksum verification failed for {0}")]
    ChecksumMismatch(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl MicasaError {
    /// NotFound-class failures stop the operation without failing the process.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MicasaError::FormulaNotFound(_)
                | MicasaError::NoMatchingPlatform { .. }
                | MicasaError::NoDriver(_)
        )
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "no exit code".to_string(),
    }
}

fn describe_stderr(stderr: &Option<String>) -> &str {
    stderr.as_deref().map(str::trim).unwrap_or("<no stderr>")
}

pub type Result<T> = std::result::Result<T, MicasaError>;
