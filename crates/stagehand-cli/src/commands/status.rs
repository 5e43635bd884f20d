use super::{colorize_state, json_pretty, Context, EXIT_SUCCESS};
use stagehand_core::CoreError;

pub fn run(ctx: &Context) -> Result<u8, CoreError> {
    let engine = ctx.engine()?;
    let status = engine.status()?;
    if ctx.json {
        println!("{}", json_pretty(&status)?);
        return Ok(EXIT_SUCCESS);
    }

    if status.available {
        println!("no stage exists; create is available");
    } else {
        let state = status.state.map(|s| s.to_string()).unwrap_or_default();
        println!("token:      {}", status.token.as_deref().unwrap_or("-"));
        println!("owner:      {}", status.owner_id.as_deref().unwrap_or("-"));
        println!("state:      {}", colorize_state(&state));
        if status.finalized == Some(false) {
            println!("            (creation did not complete)");
        }
        println!("created_at: {}", status.created_at.as_deref().unwrap_or("-"));
        if let Some(dir) = &status.stage_dir {
            println!("stage_dir:  {}", dir.display());
        }
    }
    if let Some(marker) = &status.failure_marker {
        println!();
        println!(
            "{}",
            console::Style::new()
                .red()
                .bold()
                .apply_to("FAILURE MARKER PRESENT")
        );
        println!("  {}", marker.message);
    }
    Ok(EXIT_SUCCESS)
}
