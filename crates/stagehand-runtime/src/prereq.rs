use stagehand_schema::{RuntimeSection, SyncerKind};
use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// True when `name` is an existing path or resolves on `PATH`.
pub fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check everything the configured backend needs. Empty means ready.
pub fn check_backend_prereqs(config: &RuntimeSection) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if config.backend == "mock" {
        return missing;
    }

    if !command_exists(&config.composer) {
        missing.push(MissingPrereq {
            name: config.composer.clone(),
            purpose: "dependency manager run inside the stage",
            install_hint: "https://getcomposer.org/download/ or set [runtime] composer",
        });
    }

    if config.syncer == SyncerKind::Rsync && !command_exists("rsync") {
        missing.push(MissingPrereq {
            name: "rsync".to_owned(),
            purpose: "syncing the stage with the active directory",
            install_hint: "zypper install rsync | apt install rsync | dnf install rsync | pacman -S rsync",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nStagehand requires these tools to stage and apply updates.");
    msg
}
