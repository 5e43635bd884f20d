use super::{Context, EXIT_FAILURE, EXIT_SUCCESS};
use stagehand_core::CoreError;
use stagehand_schema::StagehandConfig;
use stagehand_store::{FailureMarker, OwnershipStore, PathLocator, StoreError, StoreLock};
use std::path::Path;

pub fn run(ctx: &Context) -> Result<u8, CoreError> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    match ctx.config() {
        Ok(config) => {
            checks.push(Check::pass(
                "config",
                &format!("Configuration {} is valid", ctx.config_path.display()),
            ));
            check_prereqs(&config, &mut checks, &mut all_pass);
            match PathLocator::from_config(&config) {
                Ok(locator) => {
                    checks.push(Check::pass(
                        "project_root",
                        &format!("Project root {} exists", locator.project_root().display()),
                    ));
                    check_state(&locator, &mut checks, &mut all_pass);
                    check_disk_space(locator.staging_root(), &mut checks);
                }
                Err(e) => {
                    all_pass = false;
                    checks.push(Check::fail("project_root", &e.to_string()));
                }
            }
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("config", &e.to_string()));
        }
    }

    print_results(&checks, all_pass, ctx.json)
}

fn check_prereqs(config: &StagehandConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = stagehand_runtime::check_backend_prereqs(&config.runtime);
    if missing.is_empty() {
        checks.push(Check::pass(
            "runtime_prereqs",
            &format!("Backend '{}' prerequisites satisfied", config.runtime.backend),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "runtime_prereqs",
            &stagehand_runtime::format_missing(&missing),
        ));
    }
}

fn check_state(locator: &PathLocator, checks: &mut Vec<Check>, all_pass: &mut bool) {
    if !locator.state_dir().exists() {
        checks.push(Check::info(
            "state_dir",
            "State directory not initialized (will be created on first create)",
        ));
        return;
    }
    checks.push(Check::pass(
        "state_dir",
        &format!("State directory {} exists", locator.state_dir().display()),
    ));

    // Ownership record
    let live_token = match OwnershipStore::new(locator.clone()).current_owner() {
        Ok(None) => {
            checks.push(Check::pass("ownership", "No stage exists"));
            None
        }
        Ok(Some(record)) if !record.finalized => {
            checks.push(Check::warn(
                "ownership",
                &format!(
                    "Stage {} by '{}' never finished creating (destroy --force to recover)",
                    record.token, record.owner_id
                ),
            ));
            Some(record.token)
        }
        Ok(Some(record)) => {
            checks.push(Check::info(
                "ownership",
                &format!(
                    "Stage {} held by '{}' ({}, since {})",
                    record.token, record.owner_id, record.state, record.created_at
                ),
            ));
            Some(record.token)
        }
        Err(e @ StoreError::IntegrityFailure { .. }) => {
            *all_pass = false;
            checks.push(Check::fail(
                "ownership",
                &format!("Ownership record is corrupt: {e}"),
            ));
            None
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "ownership",
                &format!("Cannot read ownership record: {e}"),
            ));
            None
        }
    };

    // Lock
    match StoreLock::try_acquire(&locator.ownership_lock()) {
        Ok(Some(_)) => checks.push(Check::pass("ownership_lock", "Ownership lock is free")),
        Ok(None) => checks.push(Check::warn(
            "ownership_lock",
            "Ownership lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "ownership_lock",
                &format!("Cannot check ownership lock: {e}"),
            ));
        }
    }

    // Failure marker
    match FailureMarker::new(locator).read() {
        Ok(None) => checks.push(Check::pass("failure_marker", "No failure marker")),
        Ok(Some(record)) => {
            *all_pass = false;
            checks.push(Check::fail(
                "failure_marker",
                &format!("Failure marker present: {}", record.message),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "failure_marker",
                &format!("Cannot read failure marker: {e}"),
            ));
        }
    }

    // Abandoned stage directories
    let stale = locator
        .stage_dirs()
        .iter()
        .filter(|(token, _)| live_token.as_ref() != Some(token))
        .count();
    if stale > 0 {
        checks.push(Check::warn(
            "stale_stages",
            &format!("{stale} abandoned stage directories (removed by the next create)"),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, CoreError> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("Stagehand Doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn new(name: &str, status: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

/// Free space at `path`, or at its closest existing ancestor.
fn check_disk_space(path: &Path, checks: &mut Vec<Check>) {
    let Some(existing) = path.ancestors().find(|p| p.exists()) else {
        return;
    };
    let Ok(c_path) = std::ffi::CString::new(existing.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs with a valid, NUL-terminated path and a zeroed output
    // struct is well-defined; the struct is only read when ret == 0.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    #[allow(clippy::unnecessary_cast)]
    let avail_mb = (stat.f_bavail as u64 * stat.f_frsize as u64) / (1024 * 1024);
    let location = existing.display();
    if avail_mb < 100 {
        checks.push(Check::fail(
            "disk_space",
            &format!("Low disk space at {location}: {avail_mb} MB available"),
        ));
    } else if avail_mb < 1024 {
        checks.push(Check::warn(
            "disk_space",
            &format!("Disk space at {location}: {avail_mb} MB available (consider freeing space)"),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("Disk space at {location}: {} GB available", avail_mb / 1024),
        ));
    }
}
