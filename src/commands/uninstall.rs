use super::Context;
use crate::error::Result;
use crate::output::ok_mark;
use colored::Colorize;

pub async fn uninstall(ctx: &Context, formula: &str) -> Result<()> {
    let Some(resolved) = ctx.resolve(formula).await? else {
        return Ok(());
    };

    println!(
        "Uninstalling {} with {}",
        formula.bold(),
        resolved.driver.name().cyan()
    );

    resolved
        .driver
        .uninstall(&resolved.formula.formula_id, &resolved.directive, &ctx.cancel)
        .await?;

    println!("  {} Uninstalled {}", ok_mark(), formula.bold());
    Ok(())
}
