use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use medid_core::config::{EmergencyConfig, TokenVerification};
use medid_core::emergency::{
    AccessContext, EmergencyAccessController, EmergencyToken, InMemorySnapshotProvider,
    JsonFileAccessLogStore, SeparatorQrDecoder, StaticCredentialChecker,
};

use crate::Result;
use crate::cli::Commands;

/// File name of the access log under the data directory.
const ACCESS_LOG_FILE: &str = "emergency-access-log.json";

pub async fn run(command: Commands, log_path: Option<PathBuf>) -> Result<()> {
    let mut config = EmergencyConfig::from_env()?;
    if config.token_verification == TokenVerification::Registry {
        // Each invocation is a fresh process with an empty token registry.
        warn!("MEDID_STRICT_TOKENS is ignored by the CLI: issued tokens do not outlive the process");
        config.token_verification = TokenVerification::TrustStructure;
    }
    let log_path = log_path.unwrap_or_else(default_log_path);
    let checker = Arc::new(StaticCredentialChecker::permit_all());

    let controller = EmergencyAccessController::new(
        checker.clone(),
        Arc::new(SeparatorQrDecoder::default()),
        Arc::new(InMemorySnapshotProvider::with_demo_patients()),
        Arc::new(JsonFileAccessLogStore::new(&log_path)),
        config,
    )?;

    match command {
        Commands::Issue {
            doctor,
            code,
            ip,
            location,
            out,
        } => {
            let context = AccessContext {
                ip_address: ip,
                location,
            };
            let token = controller.issue_access(&doctor, &code, &context).await?;
            let json = serde_json::to_string_pretty(&token)?;
            match out {
                Some(path) => {
                    fs::write(&path, json)?;
                    info!("token written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Verify { token, revoked } => {
            let token: EmergencyToken = serde_json::from_slice(&fs::read(&token)?)?;
            for doctor in &revoked {
                checker.revoke(doctor);
            }
            let snapshot = controller.verify_and_access(&token).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Logs { search } => {
            let entries = match search {
                Some(term) => controller.search_access_logs(&term).await?,
                None => controller.access_logs().await?,
            };
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Version => print_version(),
    }

    Ok(())
}

pub fn print_version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}

/// `<data dir>/medid/emergency-access-log.json`, falling back to the
/// working directory.
fn default_log_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medid")
        .join(ACCESS_LOG_FILE)
}
