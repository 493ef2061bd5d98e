use admin_panel::{
    AppState,
    auth_service::{AuthService, AuthState},
    config::{AppConfig, Env},
    create_router,
    models::{USER_SORT_COLUMNS, User},
    password::Passwords,
    repository::{BaseRepository, RepositoryState},
    session::session_layer,
    store::{PostgresStore, StoreState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_sessions::ExpiredDeletion;
use tower_sessions_sqlx_store::PostgresStore as SessionPgStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// How often expired session rows are purged.
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 60;

/// main
///
/// The asynchronous entry point: configuration, logging, database, session
/// store, services, and finally the HTTP server.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise our crate at debug and the noisy stack quieter.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "admin_panel=debug,tower_http=info,sqlx=warn".into());

    // 3. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            // LOCAL: Pretty print output for human readability.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // PROD: JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Database Initialization (Postgres)
    // One pool for the whole process, injected into everything that needs it.
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");

    // 5. Session Store (Postgres-backed, survives restarts)
    let session_store = SessionPgStore::new(pool.clone());
    session_store
        .migrate()
        .await
        .expect("FATAL: Failed to prepare the session table.");

    let cleanup_task = tokio::spawn(session_store.clone().continuously_delete_expired(
        tokio::time::Duration::from_secs(SESSION_CLEANUP_INTERVAL_SECS),
    ));

    // 6. Repository and Services
    let store = Arc::new(PostgresStore::new(pool)) as StoreState;
    let users = Arc::new(BaseRepository::<User>::new(store).with_sort_columns(USER_SORT_COLUMNS))
        as RepositoryState<User>;

    let auth: AuthState = Arc::new(
        AuthService::new(users.clone(), Passwords::default(), config.min_password_length)
            .expect("FATAL: Failed to initialise password hashing."),
    );

    // 7. Unified State Assembly
    let sessions = session_layer(session_store, &config);
    let port = config.app_port;
    let app_state = AppState {
        users,
        auth,
        config,
    };

    // 8. Router and Server Startup
    let app = create_router(app_state, sessions);

    let address = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&address)
        .await
        .expect("FATAL: Failed to bind the HTTP listener.");

    tracing::info!("Listening on {address}");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{port}/swagger-ui");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("FATAL: HTTP server error.");

    cleanup_task.abort();
    tracing::info!("Server stopped.");
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections.");
}
