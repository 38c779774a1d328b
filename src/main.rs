use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, SqlitePool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod assembler;
mod categories;
mod config;
mod db;
mod error;
mod exams;
mod jwt;
mod models;

use config::{AdminCredentials, Config};

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    pub admin: Option<AdminCredentials>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "drivequiz-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ============================================================================
// Router
// ============================================================================

fn app(state: Arc<AppState>, static_dir: &str) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin_routes = Router::new()
        .route(
            "/questions",
            get(admin::list_questions).post(admin::create_question),
        )
        .route(
            "/questions/:id",
            get(admin::get_question).put(admin::update_question),
        )
        .route_layer(middleware::from_fn(jwt::require_admin));

    let api = Router::new()
        .route("/tests", get(exams::list_tests))
        .route("/tests/start", post(exams::start_test))
        .route("/tests/finish", post(exams::finish_test))
        .route("/tests/:id", get(exams::get_test))
        .nest("/admin", admin_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            jwt::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/admin/login", post(jwt::login))
        .nest("/api", api)
        .fallback_service(
            ServeDir::new(static_dir)
                .not_found_service(ServeFile::new(format!("{}/index.html", static_dir))),
        )
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drivequiz=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Connecting to database: {}", config.database_url);

    let connect_options: SqliteConnectOptions = config
        .database_url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect_with(connect_options)
        .await?;

    // Run migrations
    db::setup_database(&pool).await?;
    tracing::info!("Database setup complete");

    if config.admin.is_none() {
        tracing::warn!("ADMIN_USERNAME/ADMIN_PASSWORD not set, admin login disabled");
    }

    let state = Arc::new(AppState {
        db: pool,
        jwt_secret: config.jwt_secret.clone(),
        admin: config.admin.clone(),
    });

    let app = app(state, &config.static_dir);
    tracing::info!("Serving static files from {}", config.static_dir);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Server listening on {}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
