use super::{json_pretty, print_results, Context, EXIT_SUCCESS, EXIT_VALIDATION_ERROR};
use stagehand_core::CoreError;
use stagehand_schema::has_errors;

/// Run the status-check validators. The results never block anything; the
/// exit code only reports whether any of them is an error.
pub fn run(ctx: &Context) -> Result<u8, CoreError> {
    let engine = ctx.engine()?;
    let results = engine.status_check()?;
    let ready = !has_errors(&results);

    if ctx.json {
        let payload = serde_json::json!({
            "ready": ready,
            "results": results,
        });
        println!("{}", json_pretty(&payload)?);
    } else if results.is_empty() {
        println!("all checks passed");
    } else {
        print_results(&results);
    }
    Ok(if ready {
        EXIT_SUCCESS
    } else {
        EXIT_VALIDATION_ERROR
    })
}
