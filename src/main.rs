// objectdb - a document database engine persisted entirely on an
// S3-compatible object store.
//
// This binary's job is narrow: load configuration, connect (which loads or
// initializes `s3db.json`, rehydrates every manifest-recorded resource, and
// runs every registered plugin's `setup`/`start`), then sit until asked to
// stop. Resource CRUD and plugin registration happen through the
// `objectdb-core` library API (see `objectdb-cli` for a command-line client
// exercising that API), not through this process.

use anyhow::Result;
use objectdb_core::{Database, DatabaseConfig};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("objectdb=info".parse()?))
        .json()
        .init();

    info!("starting objectdb");

    let config = DatabaseConfig::load()?;
    let db = Database::new(config);

    if let Err(err) = db.connect().await {
        error!(error = %err, "failed to connect to the object store");
        return Err(err.into());
    }
    info!("objectdb connected");

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, disconnecting"),
        Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
    }

    if let Err(err) = db.disconnect().await {
        error!(error = %err, "error during disconnect");
        return Err(err.into());
    }

    info!("objectdb stopped");
    Ok(())
}
