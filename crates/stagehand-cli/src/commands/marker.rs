use super::{json_pretty, Context, EXIT_MARKER_PRESENT, EXIT_SUCCESS};
use stagehand_core::CoreError;
use stagehand_store::{FailureMarker, PathLocator};
use tracing::warn;

/// Show the failure marker, or remove it once the operator has verified the
/// active directory by hand.
pub fn run(ctx: &Context, clear: bool) -> Result<u8, CoreError> {
    let config = ctx.config()?;
    let locator = PathLocator::from_config(&config)?;
    let marker = FailureMarker::new(&locator);
    let record = marker.read()?;

    if clear {
        if let Some(ref r) = record {
            warn!(
                "clearing failure marker for stage {} at operator request ({})",
                r.stage_token, ctx.owner
            );
        }
        marker.clear()?;
        if ctx.json {
            let payload = serde_json::json!({ "cleared": record.is_some() });
            println!("{}", json_pretty(&payload)?);
        } else if record.is_some() {
            println!("failure marker cleared");
        } else {
            println!("no failure marker present");
        }
        return Ok(EXIT_SUCCESS);
    }

    if ctx.json {
        let payload = serde_json::json!({
            "present": record.is_some(),
            "path": marker.path(),
            "marker": record,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match &record {
            Some(r) => {
                println!("{}", r.message);
                println!();
                println!("stage:      {}", r.stage_token);
                println!("owner:      {}", r.owner_id);
                println!("written_at: {}", r.written_at);
                println!("path:       {}", marker.path().display());
            }
            None => println!("no failure marker present"),
        }
    }
    Ok(if record.is_some() {
        EXIT_MARKER_PRESENT
    } else {
        EXIT_SUCCESS
    })
}
