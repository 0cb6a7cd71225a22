pub mod formats;

use flexi_logger::{Logger, LoggerHandle};

use crate::Error;

/// Start the CLI logger on stderr, so stdout carries only command output.
///
/// The returned handle must live until the process exits.
pub fn init() -> Result<LoggerHandle, Error> {
    let handle = Logger::try_with_env_or_str("info")?
        .format(formats::cli_format)
        .log_to_stderr()
        .start()?;

    Ok(handle)
}
