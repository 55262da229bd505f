//! Formula resolution: name -> formula -> platform entry -> driver.
//!
//! Each stage that can come up empty (unknown formula, no entry for this platform,
//! no driver for the entry's tool) is logged and recorded on the returned
//! [`Resolution`] rather than raised, so callers can report exactly where resolution
//! stopped. Anything else (a malformed formula, an unrecognisable platform,
//! cancellation) is a hard error.

use crate::command::CommandRunner;
use crate::config::Settings;
use crate::drivers::{Driver, DriverRegistry};
use crate::error::{MicasaError, Result};
use crate::formula::{Formula, FormulaReader, InstallerDirective};
use crate::platform::{self, Platform, find_best_match};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// How far resolving a formula got.
#[derive(Debug)]
pub struct Resolution {
    pub name: String,
    pub formula: Option<Formula>,
    pub platform: Option<Platform>,
    /// The formula's platform key that matched
    pub matched_platform: Option<String>,
    pub directive: Option<InstallerDirective>,
    pub driver: Option<Driver>,
    /// Why resolution stopped early
    pub problem: Option<MicasaError>,
}

/// A fully resolved formula.
#[derive(Debug)]
pub struct Resolved {
    pub formula: Formula,
    pub platform: Platform,
    pub matched_platform: String,
    pub directive: InstallerDirective,
    pub driver: Driver,
}

impl Resolution {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            formula: None,
            platform: None,
            matched_platform: None,
            directive: None,
            driver: None,
            problem: None,
        }
    }

    fn stop(mut self, problem: MicasaError) -> Self {
        error!("{}", problem);
        self.problem = Some(problem);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.driver.is_some()
    }

    /// The resolved parts, or the reason resolution stopped.
    pub fn into_resolved(self) -> Result<Resolved> {
        if let Some(problem) = self.problem {
            return Err(problem);
        }

        match (
            self.formula,
            self.platform,
            self.matched_platform,
            self.directive,
            self.driver,
        ) {
            (Some(formula), Some(platform), Some(matched_platform), Some(directive), Some(driver)) => {
                Ok(Resolved {
                    formula,
                    platform,
                    matched_platform,
                    directive,
                    driver,
                })
            }
            _ => Err(MicasaError::FormulaNotFound(self.name)),
        }
    }
}

/// Resolves formula names to drivers for the running platform.
#[derive(Debug)]
pub struct DriverFactory {
    reader: FormulaReader,
    registry: DriverRegistry,
    runner: CommandRunner,
    platform: OnceCell<Platform>,
}

impl DriverFactory {
    pub fn new(settings: &Settings, runner: CommandRunner) -> Result<Self> {
        Ok(Self {
            reader: FormulaReader::new(settings.formulary_dir.clone()),
            registry: DriverRegistry::new(settings, runner.clone())?,
            runner,
            platform: OnceCell::new(),
        })
    }

    /// Resolve against `platform` instead of detecting it.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = OnceCell::from(platform);
        self
    }

    pub fn reader(&self) -> &FormulaReader {
        &self.reader
    }

    /// The running platform, detected on first use.
    pub async fn platform(&self, cancel: &CancellationToken) -> Result<&Platform> {
        self.platform
            .get_or_try_init(|| platform::detect(&self.runner, cancel))
            .await
    }

    /// Resolve `name` as far as possible.
    ///
    /// # Errors
    ///
    /// Only for failures other than a missing formula, platform entry or driver; those
    /// are reported through [`Resolution::problem`].
    pub async fn resolve(&self, name: &str, cancel: &CancellationToken) -> Result<Resolution> {
        let mut resolution = Resolution::new(name);

        let formula = match self.reader.read(name).await {
            Ok(formula) => formula,
            Err(MicasaError::FormulaNotFound(_)) => {
                let suggestions = self.reader.suggestions(name);
                if !suggestions.is_empty() {
                    error!("Did you mean: {}?", suggestions.join(", "));
                }
                return Ok(resolution.stop(MicasaError::FormulaNotFound(name.to_string())));
            }
            Err(e) => return Err(e),
        };

        let platform = self.platform(cancel).await?.clone();
        let keys = formula.platform_keys();
        let matched = find_best_match(&platform.key(), &keys).map(String::from);
        debug!("...{} on {} matched {:?}", name, platform, matched);

        let known = keys.join(", ");
        resolution.platform = Some(platform);
        resolution.formula = Some(formula);

        let Some(matched) = matched else {
            let platform = resolution
                .platform
                .as_ref()
                .map(Platform::key)
                .unwrap_or_default();
            return Ok(resolution.stop(MicasaError::NoMatchingPlatform {
                formula: name.to_string(),
                platform,
                known,
            }));
        };

        let directive = resolution
            .formula
            .as_ref()
            .and_then(|formula| formula.platforms.get(&matched))
            .cloned();
        resolution.matched_platform = Some(matched);

        let Some(directive) = directive else {
            return Ok(resolution.stop(MicasaError::FormulaNotFound(name.to_string())));
        };

        let driver = self.registry.driver_for(&directive.tool);
        let tool = directive.tool.clone();
        resolution.directive = Some(directive);

        match driver {
            Some(driver) => {
                debug!("...{} uses the {} driver", name, driver.name());
                resolution.driver = Some(driver);
                Ok(resolution)
            }
            None => Ok(resolution.stop(MicasaError::NoDriver(tool))),
        }
    }
}
