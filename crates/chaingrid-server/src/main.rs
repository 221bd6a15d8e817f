mod config;
mod purge;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chaingrid_api::auth::{self, AppState, AppStateInner, TokenSettings};
use chaingrid_api::mail::{BrevoMailer, DisabledMailer, Mailer};
use chaingrid_api::registrar::{Registrar, RegistrarConfig};
use chaingrid_api::routes;
use chaingrid_db::{Database, MemoryStagingStore, StagingStore};

use crate::config::{ServerConfig, StagingBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chaingrid=debug,chaingrid_api=debug,chaingrid_db=info,tower_http=debug".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Fix it in your environment or .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    if let Some(admin) = &config.admin {
        auth::bootstrap_admin(&db, &admin.name, &admin.username, &admin.email, &admin.password)?;
    }

    let staging: Arc<dyn StagingStore> = match config.staging_backend {
        StagingBackend::Sqlite => db.clone(),
        StagingBackend::Memory => Arc::new(MemoryStagingStore::new()),
    };

    let mailer: Arc<dyn Mailer> = match &config.brevo {
        Some(brevo) => Arc::new(BrevoMailer::new(brevo.clone())?),
        None => {
            warn!("BREVO_API_KEY not set, OTP emails will not be delivered");
            Arc::new(DisabledMailer)
        }
    };

    if config.debug {
        warn!("Debug mode is ON: OTP codes and internal errors are returned to clients");
    }

    let registrar = Registrar::new(
        db.clone(),
        staging.clone(),
        mailer,
        RegistrarConfig {
            otp_ttl: chrono::Duration::minutes(config.otp_ttl_minutes),
            max_attempts: config.otp_max_attempts,
            debug: config.debug,
        },
    );

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        registrar,
        tokens: TokenSettings {
            secret: config.jwt_secret.clone(),
            ttl: chrono::Duration::days(config.token_ttl_days),
        },
        debug: config.debug,
    });

    // Background purge of expired staging slots and revocations
    tokio::spawn(purge::run_purge_loop(db, staging, config.purge_interval_secs));

    // The React front end is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("ChainGrid auth server listening on {}", addr);
    info!(
        "OTP lifetime {} min, {} attempts, {:?} staging",
        config.otp_ttl_minutes, config.otp_max_attempts, config.staging_backend
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
