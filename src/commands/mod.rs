//! Command implementations for the micasa CLI
//!
//! - **install**: install a formula, or everything in the manifest
//! - **uninstall**: remove a formula
//! - **info**: show available and installed versions
//! - **list**: list known formulas
//!
//! A formula that cannot be resolved (unknown name, no entry for this platform, no
//! driver for its tool) is reported and skipped; it never fails the command.

pub mod info;
pub mod install;
pub mod list;
pub mod uninstall;

pub use info::info;
pub use install::install;
pub use list::list;
pub use uninstall::uninstall;

use crate::command::CommandRunner;
use crate::config::Settings;
use crate::error::{MicasaError, Result};
use crate::factory::{DriverFactory, Resolved};
use crate::manifest::Manifest;
use crate::output::{fail_mark, ok_mark, warn_mark};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Everything a command needs.
#[derive(Debug)]
pub struct Context {
    pub settings: Settings,
    pub factory: DriverFactory,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(settings: Settings, cancel: CancellationToken) -> Result<Self> {
        let runner = CommandRunner::new(settings.command_timeout);
        let factory = DriverFactory::new(&settings, runner)?;
        Ok(Self {
            settings,
            factory,
            cancel,
        })
    }

    /// Use an already-built factory (fixed platform in tests).
    pub fn with_factory(settings: Settings, factory: DriverFactory, cancel: CancellationToken) -> Self {
        Self {
            settings,
            factory,
            cancel,
        }
    }

    /// Resolve `name`, printing a line and returning `None` when it cannot be resolved.
    pub(crate) async fn resolve(&self, name: &str) -> Result<Option<Resolved>> {
        let resolution = self.factory.resolve(name, &self.cancel).await?;
        match resolution.into_resolved() {
            Ok(resolved) => Ok(Some(resolved)),
            Err(e) if e.is_not_found() => {
                println!("  {} {}", warn_mark(), e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn read_manifest(&self) -> Result<Manifest> {
        Manifest::read_from_path(&self.settings.manifest_path)
    }

    /// The manifest's version spec for `name`. A missing or unreadable manifest has
    /// none.
    pub(crate) fn manifest_spec(&self, name: &str) -> Option<String> {
        let manifest = match self.read_manifest() {
            Ok(manifest) => manifest,
            Err(MicasaError::ManifestNotFound(_)) => return None,
            Err(e) => {
                warn!("Ignoring manifest for {}: {}", name, e);
                return None;
            }
        };

        manifest
            .entries()
            .iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| entry.version_spec.clone())
    }
}

/// What happened to one formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Done,
    /// Not resolvable on this system
    Skipped,
}

/// Per-entry results of a manifest run.
#[derive(Debug, Default)]
pub struct Summary {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl Summary {
    pub fn record(&mut self, name: &str, outcome: &Result<Status>) {
        match outcome {
            Ok(Status::Done) => self.succeeded.push(name.to_string()),
            Ok(Status::Skipped) => self.skipped.push(name.to_string()),
            Err(e) => self.failed.push((name.to_string(), e.to_string())),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn print(&self, verb: &str) {
        println!();
        println!(
            "{} {} of {} {}",
            ok_mark(),
            self.succeeded.len().to_string().bold(),
            self.total(),
            verb
        );

        if !self.skipped.is_empty() {
            println!(
                "{} Skipped (not available here): {}",
                warn_mark(),
                self.skipped.join(", ").dimmed()
            );
        }

        for (name, error) in &self.failed {
            println!("{} {}: {}", fail_mark(), name.bold(), error);
        }
    }

    /// An error when any entry failed.
    pub fn into_result(self) -> Result<()> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(MicasaError::Other(anyhow::anyhow!(
                "{} of {} manifest entries failed",
                self.failed.len(),
                self.total()
            )))
        }
    }
}
