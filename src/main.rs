//! `tetora-server` — process entry point.
//!
//! Reads `TETORA_BASE_DIR` (defaulting to the platform data directory,
//! `config::default_base_dir`), loads `config.json` from it, opens the
//! SQLite store alongside it, wires up `Server`, and serves the HTTP API
//! built in `http::build_router`. Background tickers (cron, reminders,
//! retention pruning, route-result cleanup, rate-limiter cleanup) are
//! spawned the same way the teacher's `setup` hook spawns its cron
//! heartbeat loop in `lib.rs`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tetora::atoms::error::{TetoraError, TetoraResult};
use tetora::reminders::MultiNotifier;
use tetora::server::Server;
use tetora::{config, cron, dispatch, http, reminders, store, tls};

fn base_dir() -> PathBuf {
    std::env::var("TETORA_BASE_DIR").map(PathBuf::from).unwrap_or_else(|_| config::default_base_dir())
}

#[tokio::main]
async fn main() -> TetoraResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_target(false).init();

    let base_dir = base_dir();
    std::fs::create_dir_all(&base_dir).map_err(TetoraError::from)?;
    log::info!("[main] base dir: {}", base_dir.display());

    let config = config::load(&base_dir)?;
    let config_path = config::config_path(&base_dir);
    let db_path = base_dir.join("tetora.db");
    let db = store::open(&db_path)?;

    let listen_addr: SocketAddr = config.listen_addr.parse().map_err(|e| TetoraError::Config(format!("invalid listenAddr '{}': {}", config.listen_addr, e)))?;
    let tls_cfg = config.tls.clone();

    let server = Server::init(config, config_path, db)?;
    let router = http::build_router(server.clone());

    spawn_background_tasks(server.clone());

    match tls_cfg {
        Some(tls_cfg) => {
            let rustls_config = tls::load_server_config(&PathBuf::from(&tls_cfg.cert_file), &PathBuf::from(&tls_cfg.key_file)).await?;
            log::info!("[main] listening on https://{} (tls)", listen_addr);
            axum_server::bind_rustls(listen_addr, rustls_config)
                .serve(router.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|e| TetoraError::Internal(format!("tls server error: {}", e)))?;
        }
        None => {
            log::info!("[main] listening on http://{}", listen_addr);
            let listener = tokio::net::TcpListener::bind(listen_addr).await.map_err(TetoraError::from)?;
            axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|e| TetoraError::Internal(format!("http server error: {}", e)))?;
        }
    }

    server.shutdown();
    Ok(())
}

fn spawn_background_tasks(server: Arc<Server>) {
    cron::spawn(server.clone());
    reminders::spawn(server.clone(), Arc::new(MultiNotifier::default()));
    store::pruner::spawn(server.clone());
    dispatch::spawn_route_cleanup_ticker(server.clone());
    http::spawn_rate_limiter_cleanup(server);
}
