//! svsd entry point.

use std::path::Path;

use tracing::{error, info};

use svsd::config::Config;
use svsd::db::Database;
use svsd::state::Network;
use svsd::{dcc, event, init_services, link};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `svsd.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "svsd.toml".to_string(),
    };

    // Canonicalize so a rehash works regardless of the working directory.
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration validation failed");
        return Err(e.into());
    }

    info!(
        server = %config.serverinfo.name,
        sid = config.serverinfo.sid.as_deref().unwrap_or("(legacy)"),
        "starting svsd"
    );

    let db = Database::new(&config.database.path).await.map_err(|e| {
        error!(error = %e, "database initialization failed");
        anyhow::anyhow!("database initialization failed: {}", e)
    })?;

    let (net, out_rx) = Network::new(config, config_path, db);
    init_services(&net).await.map_err(|e| {
        error!(error = %e, "registry load failed");
        anyhow::anyhow!("registry load failed: {}", e)
    })?;
    info!(
        services = net.services.read().len(),
        accounts = net.registry.accounts.len(),
        channels = net.registry.channels.len(),
        "context initialized"
    );

    // The mailbox scan and the scheduler ticker run for the lifetime of
    // the process.
    net.scheduler.add("dbhook_scan", svsd::e_dbhook_scan, 60);
    event::spawn_ticker(net.clone());

    dcc::init(&net);
    dcc::spawn_listener(net.clone());

    // The link loop only returns on a fatal error.
    match link::run(net.clone(), out_rx).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "fatal error, shutting down");
            net.send(format!(":{} WALLOPS :services terminating: {}", net.me.name, e));
            net.db.close().await;
            std::process::exit(1);
        }
    }
}
