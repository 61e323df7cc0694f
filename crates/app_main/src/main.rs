//! browsefs - sandboxed directory browser
//!
//! Main entry point of the command line front end.

mod cli;
mod commands;

use app_core::{AppConfig, AppError, AppState};
use clap::Parser;
use cli::{Cli, Commands};
use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = match e.downcast_ref::<AppError>() {
                Some(app) => {
                    eprintln!("browsefs: {}", app.user_message());
                    app.exit_code()
                }
                None => {
                    eprintln!("browsefs: {:#}", e);
                    1
                }
            };
            tracing::debug!("Exiting with code {}: {:?}", code, e);
            ExitCode::from(code as u8)
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, AppError> {
    let mut config =
        AppConfig::load(cli.config.as_deref()).map_err(|e| AppError::Config(format!("{:#}", e)))?;
    cli.apply(&mut config);
    config
        .validate()
        .map_err(|e| AppError::Config(format!("{:#}", e)))?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    // Initialize logging and panic hook first
    let _log_guard = app_log::init(&config.log.level, config.log.file)?;

    if config.log.file {
        if let Err(e) = app_log::cleanup_old_logs(config.log.retain_days) {
            tracing::warn!("Failed to cleanup old logs: {}", e);
        }
    }

    tracing::info!("browsefs starting...");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Commands::Sanitize { name, windows } = &cli.command {
        let fs_encoding = config
            .upload
            .fs_encoding
            .clone()
            .unwrap_or_else(app_fs::system_fs_encoding);
        commands::sanitize(name, *windows, &fs_encoding, &mut out)?;
        return Ok(());
    }

    let state = app_core::init(config)?;
    tracing::debug!("Context: {:?}", state.context);

    execute(state, cli.command, &mut out)?;
    Ok(())
}

fn execute<W: Write>(state: &AppState, command: Commands, out: &mut W) -> Result<(), AppError> {
    match command {
        Commands::Ls { path, sort } => commands::ls(state, path.as_deref(), sort.as_deref(), out),
        Commands::Info { path, json } => commands::info(state, &path, json, out),
        Commands::Download { path, output } => {
            let stream = commands::open_archive(state, path.as_deref())?;
            match output {
                Some(output) => {
                    let target = commands::archive_target(&output, &stream);
                    let mut file = File::create(&target)?;
                    let written = commands::write_archive(stream, &mut file)?;
                    tracing::info!("Wrote {} bytes to {:?}", written, target);
                    eprintln!("{}", target.display());
                    Ok(())
                }
                None => commands::write_archive(stream, out).map(|_| ()),
            }
        }
        Commands::Rm { path } => commands::rm(state, &path, out),
        Commands::Upload { dir, files } => commands::upload(state, &dir, &files, out),
        Commands::Mkdir { dir, name } => commands::mkdir(state, &dir, &name, out),
        // Handled before the state exists
        Commands::Sanitize { name, windows } => {
            let encoding = state.context.fs_encoding().to_string();
            commands::sanitize(&name, windows, &encoding, out)
        }
    }
}
