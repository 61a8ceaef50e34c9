// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use identity_login::{
    api::router,
    auth::{AuthOrchestrator, JwtCredentialIssuer},
    clock::{Clock, TokioClock},
    config::{AppConfig, LogFormat},
    providers::HttpIdentityProvider,
    state::AppState,
    storage::{InMemoryUserStore, RedbUserStore, UserStore, USER_DB_FILE},
};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
const DEBUG_LOG_FILTER: &str = "info,identity_login=debug,tower_http=debug";

fn init_tracing(config: &AppConfig) {
    let default_filter = if config.debug_logging {
        DEBUG_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match config.server.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let store: Arc<dyn UserStore> = match &config.server.data_dir {
        Some(dir) => {
            let path = dir.join(USER_DB_FILE);
            info!(path = %path.display(), "Using redb user store");
            Arc::new(RedbUserStore::open(&path)?)
        }
        None => {
            warn!("DATA_DIR not set, users are kept in memory and lost on restart");
            Arc::new(InMemoryUserStore::new())
        }
    };

    let provider = Arc::new(HttpIdentityProvider::new(&config.provider)?);
    info!(url = %provider.identity_url(), "Identity provider configured");

    let issuer = Arc::new(JwtCredentialIssuer::from_config(&config.session));
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let orchestrator = Arc::new(AuthOrchestrator::from_config(
        &config,
        provider,
        Arc::clone(&store),
        issuer.clone(),
        clock,
    ));
    info!(
        auto_create = config.reconcile.auto_create_users,
        auto_verify = config.reconcile.auto_verify_users,
        link_existing = config.reconcile.link_existing_users,
        cache_enabled = config.cache.enabled,
        "Login policy loaded"
    );

    let app = router(AppState::new(orchestrator, store, issuer));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Identity login server listening on http://{addr} (docs at /docs)");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}
