// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands};

mod cli;
mod commands;
mod logging;

fn main() -> ExitCode {
    let _logger = match logging::init() {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("medid: logging disabled: {e}");
            None
        }
    };

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Cli::parse();

    if let Commands::Version = args.command {
        commands::print_version();
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(commands::run(args.command, args.log_path))
}
