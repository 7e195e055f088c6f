//! `sf` - inspect and maintain simulation job directories.

use clap::Parser;
use simforge::cli::{Cli, Commands};
use simforge::commands::{self, Output};
use simforge::config::Settings;
use simforge::{logging, Result};
use std::path::PathBuf;
use std::process;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };
    let _log_guard = logging::init(&settings.logging);

    // Job directory: --job-directory flag > config file > cwd
    let job_directory = resolve_job_directory(cli.job_directory, &settings);

    let result = run_command(cli.command, &job_directory);
    match result {
        Ok(output) => {
            if settings.logging.user_output {
                println!("{}", output.render(human));
            }
        }
        Err(e) => {
            if human {
                eprintln!("Error: {}", e);
            } else {
                eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            }
            process::exit(commands::exit_code(&e));
        }
    }
}

fn resolve_job_directory(flag: Option<PathBuf>, settings: &Settings) -> PathBuf {
    flag.or_else(|| settings.platform.job_directory.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_command(command: Commands, job_directory: &std::path::Path) -> Result<Output> {
    match command {
        Commands::Status { id } => commands::status(job_directory, &id),
        Commands::Path { id } => commands::path(job_directory, &id),
        Commands::Jobs => commands::jobs(job_directory),
        Commands::StopContainer { id } => commands::stop_container(job_directory, &id),
        Commands::GetLatest => commands::get_latest(job_directory),
        Commands::StatusReport => commands::status_report(job_directory),
        Commands::ClearFiles => commands::clear_files(job_directory),
    }
}
