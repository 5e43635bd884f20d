use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};
use stagehand_core::{install_signal_handler, CoreError};

pub fn run(ctx: &Context, token: &str) -> Result<u8, CoreError> {
    let mut engine = ctx.claimed_engine(token)?;
    install_signal_handler();

    let result = with_spinner(
        ctx,
        "syncing stage into the active directory...",
        "stage applied",
        "apply failed",
        || engine.apply(),
    );
    if let Err(ref e) = result {
        if engine.failure_marker().exists() {
            eprintln!(
                "warning: the active directory may be inconsistent ({e}); failure marker written to {}",
                engine.failure_marker().path().display()
            );
        }
    }
    result?;

    if ctx.json {
        let payload = serde_json::json!({
            "token": token,
            "state": "applied",
            "project_root": engine.locator().project_root(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "applied stage {token} to {}",
            engine.locator().project_root().display()
        );
    }
    Ok(EXIT_SUCCESS)
}
