mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, print_results, Context};
use stagehand_schema::{OwnerId, PackageRequirement};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Staged, validated, crash-evident updates of a live project tree"
)]
struct Cli {
    /// Path to the Stagehand configuration file.
    #[arg(long, default_value = "stagehand.toml", global = true)]
    config: PathBuf,

    /// Owner identity recorded on the stage (defaults to $STAGEHAND_OWNER, then $USER).
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a stage by copying the active directory.
    Create {
        /// Metadata entry as key=value (value parsed as JSON, else taken as a string).
        #[arg(long = "meta", value_parser = commands::create::parse_meta)]
        meta: Vec<(String, serde_json::Value)>,
    },
    /// Take over an existing stage by token.
    Claim {
        /// Stage token printed by `create`.
        token: String,
    },
    /// Run the dependency manager inside the stage.
    Require {
        /// Stage token.
        token: String,
        /// Runtime packages as vendor/package[:constraint].
        #[arg(required = true)]
        packages: Vec<PackageRequirement>,
        /// Development packages as vendor/package[:constraint].
        #[arg(long = "dev")]
        dev: Vec<PackageRequirement>,
    },
    /// Sync the stage back into the active directory.
    Apply {
        /// Stage token.
        token: String,
    },
    /// Remove the stage and release ownership.
    Destroy {
        /// Stage token (omit with --force to remove whatever stage exists).
        token: Option<String>,
        /// Destroy even if the stage belongs to another owner.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Create, require, apply, and destroy in one step.
    Update {
        /// Targets as vendor/package=version.
        #[arg(required = true, value_parser = commands::update::parse_target)]
        packages: Vec<(String, String)>,
        /// Development targets as vendor/package=version.
        #[arg(long = "dev", value_parser = commands::update::parse_target)]
        dev: Vec<(String, String)>,
        /// Convert legacy `8.x-1.9` style versions to semantic versions.
        #[arg(long, default_value_t = false)]
        legacy: bool,
    },
    /// Show the current stage, if any.
    Status,
    /// Run readiness checks without creating a stage.
    Check,
    /// Show or clear the failure marker.
    Marker {
        /// Remove the marker after the active directory has been verified.
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
    /// Run diagnostic checks on the configuration and state.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn default_owner() -> OwnerId {
    let name = std::env::var("STAGEHAND_OWNER")
        .or_else(|_| std::env::var("USER"))
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "stagehand".to_owned());
    OwnerId::new(name)
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STAGEHAND_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        config_path: cli.config,
        owner: cli.owner.map_or_else(default_owner, OwnerId::new),
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Create { meta } => commands::create::run(&ctx, meta),
        Commands::Claim { token } => commands::claim::run(&ctx, &token),
        Commands::Require {
            token,
            packages,
            dev,
        } => commands::require::run(&ctx, &token, &packages, &dev),
        Commands::Apply { token } => commands::apply::run(&ctx, &token),
        Commands::Destroy { token, force } => commands::destroy::run(&ctx, token.as_deref(), force),
        Commands::Update {
            packages,
            dev,
            legacy,
        } => commands::update::run(&ctx, packages, dev, legacy),
        Commands::Status => commands::status::run(&ctx),
        Commands::Check => commands::check::run(&ctx),
        Commands::Marker { clear } => commands::marker::run(&ctx, clear),
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(v) = e.validation() {
                if !ctx.json {
                    print_results(v.results());
                }
            }
            ExitCode::from(exit_code_for(&e))
        }
    }
}
