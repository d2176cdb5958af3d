//! DB Transaction Manager - Main entry point.
//!
//! Loads a datasource file, lists the artifacts registered for every backend
//! and, with `--check`, connects each backend and runs an empty transaction
//! through its connection transaction manager.

use clap::Parser;
use db_txn_manager::config::Config;
use db_txn_manager::db::{Artifact, ResourceRegistry};
use db_txn_manager::error::DbResult;
use db_txn_manager::txn::TransactionDefinition;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_artifacts(artifacts: &[Artifact], json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(artifacts)?);
        return Ok(());
    }

    for artifact in artifacts {
        let marker = if artifact.primary { " (primary)" } else { "" };
        println!("{:<32} {}{}", artifact.name, artifact.kind, marker);
    }
    Ok(())
}

/// Connect a backend and run one empty transaction on it.
async fn check_backend(registry: &ResourceRegistry, name: &str) -> DbResult<()> {
    let manager = registry.connection_transaction_manager(name).await?;
    let definition = TransactionDefinition::read_only().with_name("check");
    let mut status = manager.get_transaction(&definition);
    manager.begin(&mut status, &definition).await?;
    manager.rollback(&mut status).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        config = %config.config.display(),
        "Starting DB Transaction Manager v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = ResourceRegistry::from_file(&config.config)?;
    print_artifacts(&registry.artifacts(), config.json)?;

    if !config.check {
        return Ok(());
    }

    let mut failures = 0;
    for name in registry.names() {
        match check_backend(&registry, &name).await {
            Ok(()) => info!(datasource = %name, "Backend check passed"),
            Err(e) => {
                failures += 1;
                error!(
                    datasource = %name,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    "Backend check failed"
                );
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} backend(s) failed the check").into());
    }

    info!(backends = registry.names().len(), "All backends checked");
    Ok(())
}
