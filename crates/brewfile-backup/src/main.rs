use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use brewfile_backup::Result;
use brewfile_backup::app;
use brewfile_backup::backup::{BackupCtx, TracingSink};
use brewfile_backup::config::{self, LogFormat, Settings};
use brewfile_backup::logging::{self, LogOptions};
use brewfile_backup::paths::AppPaths;
use brewfile_backup::state::{JsonFileStore, StateStore};

#[derive(Debug, Parser)]
#[command(author, version, about = "Back up your Homebrew Brewfile to a private GitHub Gist")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,
    /// Upload even if the Brewfile has not changed since the last backup
    #[arg(long)]
    force: bool,
    /// Generate and route, but never touch the Gist or the state file
    #[arg(long)]
    dry_run: bool,
    /// Debug logging for this crate
    #[arg(short, long)]
    verbose: bool,
    /// Settings TOML (default: <config dir>/settings.toml, optional)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the state file location
    #[arg(long)]
    state_file: Option<PathBuf>,
    /// Log output format for stderr and the log file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    /// Do not append to <config dir>/backup.log
    #[arg(long)]
    no_log_file: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the recorded backup state without contacting the network
    Status,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match real_main(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet; stderr always is.
            if tracing::dispatcher::has_been_set() {
                tracing::error!(kind = e.kind().label(), "{}", e.message());
            } else {
                eprintln!("error: {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn real_main(args: Args) -> Result<()> {
    let paths = AppPaths::discover()?;
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths.settings_file());
    let settings = config::load(&settings_path, args.config.is_some())?;

    let log_file = (!args.no_log_file && settings.log.file).then(|| paths.log_file());
    logging::init(&LogOptions {
        verbose: args.verbose,
        format: args.log_format.unwrap_or(settings.log.format),
        file: log_file,
    })?;

    let state_path = app::resolve_state_path(&paths, &settings, args.state_file.as_deref())?;

    match args.cmd {
        Some(Command::Status) => cmd_status(&state_path),
        None => cmd_backup(&args, &paths, &settings, &state_path),
    }
}

fn cmd_status(state_path: &Path) -> Result<()> {
    let state = JsonFileStore::new(state_path).load()?;
    print!("{}", app::format_status(&state, state_path));
    Ok(())
}

fn cmd_backup(args: &Args, paths: &AppPaths, settings: &Settings, state_path: &Path) -> Result<()> {
    tracing::info!("{}", "=".repeat(60));
    tracing::info!("Homebrew Brewfile Backup to GitHub Gist");
    tracing::info!("{}", "=".repeat(60));

    if config::load_dotenv(&paths.dotenv_file())? {
        tracing::debug!(path = %paths.dotenv_file().display(), "loaded .env");
    }
    tracing::debug!(state = %state_path.display(), "using state file");

    let ctx = BackupCtx::new(args.force, args.dry_run, Arc::new(TracingSink));
    let report = app::run_default(&ctx, settings, state_path)?;

    tracing::info!("{}", "=".repeat(60));
    tracing::info!(elapsed_ms = report.elapsed_ms as u64, "backup run finished");
    tracing::info!("{}", "=".repeat(60));
    println!("SUMMARY");
    print!("{}", app::format_report(&report));
    Ok(())
}
