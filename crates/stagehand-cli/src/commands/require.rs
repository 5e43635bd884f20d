use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};
use stagehand_core::CoreError;
use stagehand_schema::PackageRequirement;

pub fn run(
    ctx: &Context,
    token: &str,
    packages: &[PackageRequirement],
    dev: &[PackageRequirement],
) -> Result<u8, CoreError> {
    let mut engine = ctx.claimed_engine(token)?;
    with_spinner(
        ctx,
        "running dependency manager in stage...",
        "requirements staged",
        "require failed",
        || engine.require(packages, dev),
    )?;

    if ctx.json {
        let payload = serde_json::json!({
            "token": token,
            "require": packages,
            "require_dev": dev,
            "state": "required",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for p in packages {
            println!("required {p}");
        }
        for p in dev {
            println!("required {p} (dev)");
        }
    }
    Ok(EXIT_SUCCESS)
}
