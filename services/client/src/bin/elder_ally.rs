//! services/client/src/bin/elder_ally.rs

use client_lib::{
    adapters::{SqliteStorage, SupabaseAdapter},
    config::Config,
    error::ClientError,
    shell::Shell,
};
use elder_ally_core::{ports::RemoteProfileService, session::SessionStore};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting Elder Ally...");

    // --- 2. Open Local Session Storage ---
    info!("Opening local session storage...");
    let storage = Arc::new(SqliteStorage::connect(&config.session_db_url).await?);
    let session = Arc::new(SessionStore::new(storage.clone()));

    // --- 3. Connect to the Hosted Backend ---
    // The auth session lives next to the saved profile so a relaunch stays signed in.
    let remote: Arc<dyn RemoteProfileService> =
        Arc::new(SupabaseAdapter::from_config(&config)?.with_token_store(storage.clone()));
    match remote.ping().await {
        Ok(()) => info!(url = %config.supabase_url, "Backend reachable"),
        Err(e) => warn!(error = %e, "Backend check failed; continuing offline-first"),
    }

    // --- 4. Run the Terminal Shell ---
    let mut shell = Shell::new(
        remote,
        session,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .conceal_secrets(std::io::stdin().is_terminal());
    shell.run().await?;

    storage.close().await;
    info!("Goodbye.");
    Ok(())
}
