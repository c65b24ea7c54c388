use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use stockroom::config::{Cli, Config, default_config_dir, default_config_path};
use stockroom::db::Database;
use stockroom::directory::Directory;
use stockroom::handler::AppState;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    // The database lives next to the config file.
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("stockroom.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));

    let directory = Directory::new(db.connection());
    for user in &cfg.directory.users {
        if let Err(e) = directory.provision(user).await {
            tracing::error!(error = %e, user_id = %user.id, "failed to provision user");
            std::process::exit(1);
        }
    }
    tracing::info!(users = cfg.directory.users.len(), "directory provisioned");

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let app = stockroom::router(AppState {
        db,
        inventory: Arc::new(cfg.inventory.clone()),
    });

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("stockroom.svc running on {}", &address);
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("ctrl+c signal received, preparing to shutdown");
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }

    tracing::info!("stockroom.svc going off, graceful shutdown complete");
}
