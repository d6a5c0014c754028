//! SchemaFlow ZDM API - zero-downtime PostgreSQL migrations
//!
//! Accepts schema operations over HTTP and returns (or executes) statement
//! plans that avoid long exclusive locks and table rewrites.
//!
//! Without DATABASE_URL the server plans offline from request-supplied
//! server capabilities, catalog and row estimates. With it, plans are built
//! from the live catalog and can be executed.

mod models;
mod routes;
mod state;

use crate::routes::create_router;
use crate::state::AppState;
use schemaflow_zdm::config::{DatabaseConfig, Settings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting SchemaFlow ZDM...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");
    info!(
        "🛡️  Planner: lock_timeout={:?}ms statement_timeout={:?}ms not_null={:?} raise_for_unsafe={}",
        settings.planner.lock_timeout_ms,
        settings.planner.statement_timeout_ms,
        settings.planner.not_null_mode,
        settings.planner.raise_for_unsafe
    );

    let pool = match &settings.database {
        Some(database) => match init_database_pool(database).await {
            Ok(pool) => {
                info!("✅ Database pool created for {}/{}", database.host, database.database);
                Some(pool)
            }
            Err(e) => {
                error!("❌ Failed to initialize database pool: {}", e);
                warn!("⚠️  Continuing in offline planning mode");
                None
            }
        },
        None => {
            warn!("⚠️  DATABASE_URL not set, live planning and execution are disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(pool, settings.planner.clone()));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                   - Health check");
    info!("   POST /api/plan                 - Compile operations into safe plans");
    info!("   POST /api/execute              - Compile and execute against DATABASE_URL");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemaflow_zdm=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Initialize the target database pool
async fn init_database_pool(database: &DatabaseConfig) -> anyhow::Result<deadpool_postgres::Pool> {
    use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod, Runtime};

    let mut cfg = Config::new();
    cfg.url = Some(database.url.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(database.max_pool_size));

    // Create pool with TLS support if needed
    let pool = if database.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    // Test the connection
    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;

    let version: String = client
        .query_one("SHOW server_version", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?
        .get(0);

    info!("✅ Connected to PostgreSQL {} (TLS: {})", version, database.require_tls);
    Ok(pool)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
