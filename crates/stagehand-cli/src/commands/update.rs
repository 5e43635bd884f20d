use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};
use stagehand_core::{install_signal_handler, CoreError, PackageUpdater};
use stagehand_schema::{IdentityNormalizer, LegacyVersionConverter, VersionNormalizer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// `vendor/package=version`.
pub fn parse_target(input: &str) -> Result<(String, String), String> {
    let (name, version) = input
        .split_once('=')
        .ok_or_else(|| format!("expected vendor/package=version, got '{input}'"))?;
    if name.trim().is_empty() || version.trim().is_empty() {
        return Err(format!("expected vendor/package=version, got '{input}'"));
    }
    Ok((name.trim().to_owned(), version.trim().to_owned()))
}

/// Create a stage, require the target versions, apply, and destroy, in one
/// process. Any failure after the stage exists destroys it; a failure marker
/// written by a failed apply stays in place.
pub fn run(
    ctx: &Context,
    packages: Vec<(String, String)>,
    dev: Vec<(String, String)>,
    legacy: bool,
) -> Result<u8, CoreError> {
    let normalizer: Arc<dyn VersionNormalizer> = if legacy {
        Arc::new(LegacyVersionConverter)
    } else {
        Arc::new(IdentityNormalizer)
    };
    let runtime: BTreeMap<String, String> = packages.into_iter().collect();
    let dev: BTreeMap<String, String> = dev.into_iter().collect();

    let mut updater = PackageUpdater::new(ctx.engine()?, normalizer);
    install_signal_handler();

    let token = with_spinner(ctx, "creating stage...", "stage created", "create failed", || {
        updater.begin(&runtime, &dev)
    })?;

    let staged = with_spinner(
        ctx,
        "running dependency manager in stage...",
        "requirements staged",
        "require failed",
        || updater.stage(),
    )
    .and_then(|()| {
        with_spinner(
            ctx,
            "syncing stage into the active directory...",
            "stage applied",
            "apply failed",
            || updater.apply(),
        )
    });
    let (required, required_dev) = updater.package_versions().unwrap_or_default();

    if let Err(e) = updater.destroy(false) {
        warn!("failed to destroy stage {token}: {e}");
    }
    staged?;

    if ctx.json {
        let payload = serde_json::json!({
            "token": token,
            "require": required,
            "require_dev": required_dev,
            "state": "applied",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for p in required.iter().chain(&required_dev) {
            println!("updated {p}");
        }
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_parse() {
        assert_eq!(
            parse_target("drupal/token=8.x-1.9").unwrap(),
            ("drupal/token".to_owned(), "8.x-1.9".to_owned())
        );
        assert!(parse_target("drupal/token").is_err());
        assert!(parse_target("drupal/token=").is_err());
    }
}
