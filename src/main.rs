use bmad_sync::cli::{Cli, Commands, commands};
use bmad_sync::logging::init_logging;
use bmad_sync::SyncError;
use clap::Parser;
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, cli.json) {
        eprintln!("Failed to initialize logging: {e}");
        // Continue without structured logging rather than dying here.
    }

    let result = run(&cli);

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => handle_error(&e, cli.json),
    }
}

fn run(cli: &Cli) -> Result<i32, SyncError> {
    match &cli.command {
        Commands::Sync(args) => {
            let root = commands::resolve_project_root(cli.project_dir.as_deref())?;
            commands::sync::execute(args, cli.json, &root)
        }
        Commands::Preview => {
            let root = commands::resolve_project_root(cli.project_dir.as_deref())?;
            commands::preview::execute(cli.json, &root)
        }
        Commands::Validate => {
            let root = commands::resolve_project_root(cli.project_dir.as_deref())?;
            commands::validate::execute(cli.json, &root)
        }
        Commands::Rollback(args) => {
            let root = commands::resolve_project_root(cli.project_dir.as_deref())?;
            commands::rollback::execute(args, cli.json, &root)
        }
        Commands::Dashboard => {
            let root = commands::resolve_project_root(cli.project_dir.as_deref())?;
            commands::dashboard::execute(cli.json, &root)
        }
        Commands::Portfolio { command } => commands::portfolio::execute(command, cli.json),
    }
}

/// Print an error and exit with its code.
///
/// JSON goes to stderr when `--json` is set or stdout is not a TTY;
/// otherwise a human-readable message with an optional suggestion.
fn handle_error(err: &SyncError, json_mode: bool) -> ! {
    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&err.to_json()).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("error: {err}");
        if let Some(hint) = err.suggestion() {
            eprintln!("hint: {hint}");
        }
    }

    std::process::exit(err.exit_code());
}
