use super::{json_pretty, Context, EXIT_SUCCESS};
use stagehand_core::CoreError;
use tracing::warn;

pub fn run(ctx: &Context, token: Option<&str>, force: bool) -> Result<u8, CoreError> {
    let mut engine = ctx.engine()?;
    let (previous_token, previous_owner) = match engine.status() {
        Ok(status) => (status.token, status.owner_id),
        Err(e) if force => {
            warn!("cannot read stage status: {e}; forcing");
            (None, None)
        }
        Err(e) => return Err(e),
    };
    if let Some(token) = token {
        match ctx.claimed_engine(token) {
            Ok(claimed) => engine = claimed,
            Err(e) if force => warn!("cannot claim {token}: {e}; forcing"),
            Err(e) => return Err(e),
        }
    }
    engine.destroy(force)?;

    if ctx.json {
        let payload = serde_json::json!({
            "destroyed": previous_token,
            "owner_id": previous_owner,
            "forced": force,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match previous_token {
            Some(t) => println!("destroyed stage {t}"),
            None => println!("no stage to destroy"),
        }
    }
    Ok(EXIT_SUCCESS)
}
