use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use starsync::cli::Cli;

fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let color = cli.color_enabled();
    colored::control::set_override(color);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .compact()
        .with_target(false)
        .init();

    match starsync::run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{}: {}", "error".red().bold(), starsync::describe_error(&err));
            ExitCode::from(starsync::error_exit_code(&err))
        }
    }
}
