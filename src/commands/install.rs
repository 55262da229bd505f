use super::{Context, Status, Summary};
use crate::error::{MicasaError, Result};
use crate::factory::Resolved;
use crate::formula::FormulaDetails;
use crate::manifest::ManifestEntry;
use crate::output::{fail_mark, ok_mark};
use crate::version::VersionRequirement;
use colored::Colorize;
use tracing::{debug, warn};

/// Install `formula`, or every manifest entry when no formula is given.
///
/// A single formula still honours its manifest version spec, if it has one.
pub async fn install(ctx: &Context, formula: Option<&str>) -> Result<()> {
    match formula {
        Some(name) => {
            let entry = ManifestEntry {
                name: name.to_string(),
                version_spec: ctx.manifest_spec(name),
            };
            install_one(ctx, &entry).await.map(|_| ())
        }
        None => install_manifest(ctx).await,
    }
}

async fn install_manifest(ctx: &Context) -> Result<()> {
    let manifest = ctx.read_manifest()?;
    if manifest.is_empty() {
        println!("Manifest is empty, nothing to install");
        return Ok(());
    }

    println!(
        "Installing {} formulae from {}...",
        manifest.len().to_string().bold(),
        ctx.settings.manifest_path.display().to_string().cyan()
    );

    let mut summary = Summary::default();
    for entry in manifest.entries() {
        println!();
        let outcome = install_one(ctx, entry).await;
        if matches!(outcome, Err(MicasaError::Cancelled)) {
            return Err(MicasaError::Cancelled);
        }
        if let Err(e) = &outcome {
            println!("  {} Failed to install {}: {}", fail_mark(), entry.name.bold(), e);
        }
        summary.record(&entry.name, &outcome);
    }

    summary.print("installed");
    summary.into_result()
}

async fn install_one(ctx: &Context, entry: &ManifestEntry) -> Result<Status> {
    let requirement = entry
        .version_spec
        .as_deref()
        .map(str::parse::<VersionRequirement>)
        .transpose()?;

    let Some(resolved) = ctx.resolve(&entry.name).await? else {
        return Ok(Status::Skipped);
    };
    let name = entry.name.as_str();

    if let Some(requirement) = &requirement {
        let details = query(ctx, &resolved).await?;
        if let Some(installed) = details
            .installed_version
            .as_deref()
            .filter(|v| requirement.is_satisfied_by(v))
        {
            println!(
                "  {} {} {} already installed (wanted {})",
                ok_mark(),
                name.bold().green(),
                installed,
                requirement
            );
            return Ok(Status::Done);
        }
        if let Some(stable) = details
            .stable_version
            .as_deref()
            .filter(|v| !requirement.is_satisfied_by(v))
        {
            return Err(unsatisfied(name, requirement, stable));
        }
    }

    println!(
        "Installing {} with {} ({})",
        name.bold(),
        resolved.driver.name().cyan(),
        resolved.matched_platform.dimmed()
    );

    resolved
        .driver
        .install(&resolved.formula.formula_id, &resolved.directive, &ctx.cancel)
        .await?;

    match &requirement {
        Some(requirement) => {
            let version = verify_installed(ctx, &resolved, name, requirement).await?;
            println!(
                "  {} {} {} installed",
                ok_mark(),
                name.bold().green(),
                version.unwrap_or_default()
            );
        }
        None => println!("  {} {} installed", ok_mark(), name.bold().green()),
    }
    Ok(Status::Done)
}

/// Check what the driver reports after installing. The installed version decides when
/// it is known, otherwise the available one does.
async fn verify_installed(
    ctx: &Context,
    resolved: &Resolved,
    name: &str,
    requirement: &VersionRequirement,
) -> Result<Option<String>> {
    let details = query(ctx, resolved).await?;
    let Some(version) = details.installed_version.or(details.stable_version) else {
        warn!(
            "Could not determine the version of {} to check against {}",
            name, requirement
        );
        return Ok(None);
    };

    if requirement.is_satisfied_by(&version) {
        debug!("...{} {} satisfies {}", name, version, requirement);
        Ok(Some(version))
    } else {
        Err(unsatisfied(name, requirement, &version))
    }
}

async fn query(ctx: &Context, resolved: &Resolved) -> Result<FormulaDetails> {
    resolved
        .driver
        .info(&resolved.formula.formula_id, &resolved.directive, &ctx.cancel)
        .await
}

fn unsatisfied(name: &str, requirement: &VersionRequirement, found: &str) -> MicasaError {
    MicasaError::NoSatisfactoryVersion {
        formula: name.to_string(),
        spec: requirement.to_string(),
        found: found.to_string(),
    }
}
