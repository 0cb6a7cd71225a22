use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Issue and check emergency access tokens against the demo patient roster.
#[derive(Parser)]
#[command(name = "medid", version)]
pub struct Cli {
    /// Access log file. Defaults to `<data dir>/medid/emergency-access-log.json`.
    #[arg(long, global = true, env = "MEDID_ACCESS_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue an emergency token from a scanned patient code.
    Issue {
        /// Requesting doctor's id.
        #[arg(long)]
        doctor: String,

        /// Scanned QR payload, e.g. `QR-PAT100`.
        #[arg(long)]
        code: String,

        /// Requesting client's IP address, recorded in the access log.
        #[arg(long)]
        ip: Option<String>,

        /// Requesting site, recorded in the access log.
        #[arg(long)]
        location: Option<String>,

        /// Write the token JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Present a token and print the patient snapshot.
    Verify {
        /// Token JSON file written by `issue`.
        #[arg(long)]
        token: PathBuf,

        /// Treat these doctors as revoked.
        #[arg(long)]
        revoked: Vec<String>,
    },

    /// Print the access log.
    Logs {
        /// Only rows whose patient or doctor id contains this text.
        #[arg(long)]
        search: Option<String>,
    },

    /// Print version.
    Version,
}
