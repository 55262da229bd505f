use super::{Context, Status, Summary};
use crate::error::{MicasaError, Result};
use crate::formula::FormulaDetails;
use crate::manifest::ManifestEntry;
use crate::output::{fail_mark, heading, ok_mark};
use crate::version::VersionRequirement;
use colored::Colorize;

/// Show versions for `formula`, or for every manifest entry when no formula is given.
pub async fn info(ctx: &Context, formula: Option<&str>) -> Result<()> {
    match formula {
        Some(name) => {
            let entry = ManifestEntry {
                name: name.to_string(),
                version_spec: None,
            };
            info_one(ctx, &entry).await.map(|_| ())
        }
        None => info_manifest(ctx).await,
    }
}

async fn info_manifest(ctx: &Context) -> Result<()> {
    let manifest = ctx.read_manifest()?;
    if manifest.is_empty() {
        println!("Manifest is empty");
        return Ok(());
    }

    let mut summary = Summary::default();
    for entry in manifest.entries() {
        let outcome = info_one(ctx, entry).await;
        if matches!(outcome, Err(MicasaError::Cancelled)) {
            return Err(MicasaError::Cancelled);
        }
        if let Err(e) = &outcome {
            println!("  {} {}", fail_mark(), e);
        }
        summary.record(&entry.name, &outcome);
        println!();
    }

    summary.print("queried");
    summary.into_result()
}

async fn info_one(ctx: &Context, entry: &ManifestEntry) -> Result<Status> {
    let Some(resolved) = ctx.resolve(&entry.name).await? else {
        return Ok(Status::Skipped);
    };

    println!(
        "{} {}",
        heading(&entry.name),
        format!("({}, {})", resolved.driver.name(), resolved.matched_platform).dimmed()
    );

    let details = resolved
        .driver
        .info(&resolved.formula.formula_id, &resolved.directive, &ctx.cancel)
        .await?;

    print_details(&details, entry.version_spec.as_deref());
    Ok(Status::Done)
}

fn print_details(details: &FormulaDetails, version_spec: Option<&str>) {
    println!("{}: {}", "Package".bold(), details.package_id);
    println!(
        "{}: {}",
        "Available".bold(),
        details.stable_version.as_deref().unwrap_or("unknown")
    );
    match &details.installed_version {
        Some(version) => println!("{}: {}", "Installed".bold(), version.green()),
        None => println!("{}: {}", "Installed".bold(), "not installed".dimmed()),
    }
    if let Some(spec) = version_spec {
        let met = spec
            .parse::<VersionRequirement>()
            .ok()
            .zip(details.installed_version.as_deref())
            .map(|(requirement, installed)| requirement.is_satisfied_by(installed));
        match met {
            Some(true) => println!("{}: {} {}", "Wanted".bold(), spec, ok_mark()),
            Some(false) => println!("{}: {} {}", "Wanted".bold(), spec, fail_mark()),
            None => println!("{}: {}", "Wanted".bold(), spec),
        }
    }
}
