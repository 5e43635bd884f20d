pub mod apply;
pub mod check;
pub mod claim;
pub mod completions;
pub mod create;
pub mod destroy;
pub mod doctor;
pub mod marker;
pub mod require;
pub mod status;
pub mod update;

use indicatif::{ProgressBar, ProgressStyle};
use stagehand_core::{CoreError, StageEngine};
use stagehand_schema::{parse_config_file, OwnerId, StageToken, StagehandConfig, ValidationResult};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_MARKER_PRESENT: u8 = 4;

/// Global options shared by every command.
pub struct Context {
    pub config_path: PathBuf,
    pub owner: OwnerId,
    pub json: bool,
}

impl Context {
    pub fn config(&self) -> Result<StagehandConfig, CoreError> {
        Ok(parse_config_file(&self.config_path)?)
    }

    pub fn engine(&self) -> Result<StageEngine, CoreError> {
        StageEngine::from_config(&self.config()?, self.owner.clone())
    }

    /// Engine holding the stage identified by `token`.
    pub fn claimed_engine(&self, token: &str) -> Result<StageEngine, CoreError> {
        let mut engine = self.engine()?;
        engine.claim(&StageToken::parse(token)?)?;
        Ok(engine)
    }

    /// A spinner in human mode; nothing in JSON mode.
    pub fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        if self.json {
            None
        } else {
            Some(spinner(msg))
        }
    }
}

/// Map an engine error to the process exit code.
pub fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::Validation(_) => EXIT_VALIDATION_ERROR,
        CoreError::StageBusy { .. } | CoreError::Ownership { .. } | CoreError::Store(_) => {
            EXIT_STORE_ERROR
        }
        CoreError::FailureMarkerPresent { .. } => EXIT_MARKER_PRESENT,
        _ => EXIT_FAILURE,
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CoreError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(style("{msg}"));
        pb.finish_with_message(format!("✓ {msg}"));
    }
}

pub fn spin_fail(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(style("{msg}"));
        pb.finish_with_message(format!("✗ {msg}"));
    }
}

/// Run `f` under a spinner, finishing it with `ok` or `failed`.
pub fn with_spinner<T>(
    ctx: &Context,
    msg: &str,
    ok: &str,
    failed: &str,
    f: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    let pb = ctx.spinner(msg);
    let result = f();
    match &result {
        Ok(_) => spin_ok(pb.as_ref(), ok),
        Err(_) => spin_fail(pb.as_ref(), failed),
    }
    result
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "created" => Style::new().yellow().apply_to(state).to_string(),
        "required" => Style::new().cyan().apply_to(state).to_string(),
        "applied" => Style::new().green().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn colorize_result(result: &ValidationResult) -> String {
    use console::Style;
    let text = result.to_string();
    if result.is_error() {
        Style::new().red().apply_to(text).to_string()
    } else {
        Style::new().yellow().apply_to(text).to_string()
    }
}

/// Print every result, with multi-message results expanded below their
/// summary.
pub fn print_results(results: &[ValidationResult]) {
    for r in results {
        println!("  {}", colorize_result(r));
        if r.summary().is_some() {
            for m in r.messages() {
                println!("      - {m}");
            }
        }
    }
}
