use super::{colorize_state, json_pretty, Context, EXIT_SUCCESS};
use stagehand_core::CoreError;

pub fn run(ctx: &Context, token: &str) -> Result<u8, CoreError> {
    let engine = ctx.claimed_engine(token)?;
    let state = engine
        .state()?
        .map(|s| s.to_string())
        .unwrap_or_default();
    if ctx.json {
        let payload = serde_json::json!({
            "token": token,
            "owner_id": engine.owner(),
            "state": state,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("stage {token} is held by {} ({})", engine.owner(), colorize_state(&state));
    }
    Ok(EXIT_SUCCESS)
}
