use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};
use stagehand_core::CoreError;
use stagehand_store::Metadata;

/// `key=value`; the value is stored as JSON when it parses as JSON, and as a
/// plain string otherwise.
pub fn parse_meta(input: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{input}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty metadata key in '{input}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

pub fn run(ctx: &Context, meta: Vec<(String, serde_json::Value)>) -> Result<u8, CoreError> {
    let mut engine = ctx.engine()?;
    let metadata: Metadata = meta.into_iter().collect();
    let token = with_spinner(ctx, "creating stage...", "stage created", "create failed", || {
        engine.create(metadata)
    })?;

    let stage_dir = engine.locator().stage_dir(&token);
    if ctx.json {
        let payload = serde_json::json!({
            "token": token,
            "owner_id": engine.owner(),
            "stage_dir": stage_dir,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("token:     {token}");
        println!("stage_dir: {}", stage_dir.display());
    }
    Ok(EXIT_SUCCESS)
}
