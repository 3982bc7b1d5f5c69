//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, MemoryAdapter},
    config::Config,
    error::ApiError,
    web::{
        annotations::{
            create_annotation_handler, create_reply_handler, delete_annotation_handler,
            get_thread_handler, list_annotations_flat_handler, list_annotations_handler,
            rendered_chapter_handler,
        },
        auth::{login_handler, logout_handler},
        require_admin,
        rest::{
            create_chapter_handler, delete_chapter_handler, get_chapter_handler,
            get_metadata_handler, list_chapters_handler, update_chapter_handler,
            update_metadata_handler, ApiDoc,
        },
        AppState,
    },
};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use scribeloop_core::domain::ProjectMetadata;
use scribeloop_core::ports::DatabaseService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use tower_http::cors::CorsLayer;
use axum::http::{Method, HeaderName, HeaderValue, header::{ACCEPT, CONTENT_TYPE}};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    let defaults = ProjectMetadata {
        book_title: config.default_book_title.clone(),
        total_chapters: config.default_total_chapters,
    };

    // --- 2. Connect to Database & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool, defaults);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set: using the in-memory store, nothing will be persisted");
            Arc::new(MemoryAdapter::new(defaults))
        }
    };
    if config.admin_secret.is_none() {
        warn!("ADMIN_SECRET is not set: admin routes will reject every request");
    }

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(db, config.clone()));

    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-admin-token")]);

    // --- 4. Create the Web Router ---
    // Public routes (no admin token required)
    let public_routes = Router::new()
        .route("/api/chapters", get(list_chapters_handler))
        .route("/api/chapters/{id}", get(get_chapter_handler))
        .route("/api/chapters/{id}/rendered", get(rendered_chapter_handler))
        .route(
            "/api/chapters/{id}/annotations",
            get(list_annotations_handler).post(create_annotation_handler),
        )
        .route(
            "/api/chapters/{id}/annotations/flat",
            get(list_annotations_flat_handler),
        )
        .route("/api/annotations/{id}", delete(delete_annotation_handler))
        .route("/api/annotations/{id}/reply", post(create_reply_handler))
        .route("/api/annotations/{id}/thread", get(get_thread_handler))
        .route("/api/metadata", get(get_metadata_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler));

    // Admin routes (x-admin-token required)
    let admin_routes = Router::new()
        .route("/api/chapters", post(create_chapter_handler))
        .route(
            "/api/chapters/{id}",
            put(update_chapter_handler).delete(delete_chapter_handler),
        )
        .route("/api/metadata", put(update_metadata_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_admin,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
