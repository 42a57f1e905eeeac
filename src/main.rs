use anyhow::Result;
use aws_config::{BehaviorVersion, Region};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use config::{Config, ConfigError};
use mongodb::options::ClientOptions;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

mod auth;
mod config_types;
mod error;
mod handlers;
mod metadata;
mod models;
mod notifier;
mod providers;
mod security;
mod utils;
mod validator;


use config_types::ServiceConfig;
use metadata::{MetadataBackend, MetadataStore, MongoMetadata, PostgresMetadata, RecordCache};
use notifier::Notifier;
use providers::{
    default_policy_table, HttpCdnBackend, MongoBlobBackend, PgBlobBackend, ProviderPolicy,
    S3Backend, StorageRouter,
};
use security::SecurityGate;
use self::validator::FileValidator;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub security: Arc<SecurityGate>,
    pub validator: Arc<FileValidator>,
    pub policy_table: Arc<Vec<ProviderPolicy>>,
    pub storage: Arc<StorageRouter>,
    pub metadata: Arc<MetadataStore>,
    pub notifier: Arc<Notifier>,
    pub http: reqwest::Client,
    pub started_at: Instant,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub services: HashMap<String, bool>,
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "file_cdn=debug,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Starting file CDN service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!("Configuration loaded");

    let state = initialize_services(config).await?;
    info!("All services initialized");

    let addr = SocketAddr::new(state.config.server.host.parse()?, state.config.server.port);
    let app = create_router(state);

    info!("File CDN service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("File CDN service shutting down");
    Ok(())
}

/// Load configuration from an optional file and the environment
fn load_config() -> Result<Arc<ServiceConfig>, ConfigError> {
    let settings = Config::builder()
        .add_source(config::File::with_name("config/file-cdn").required(false))
        .add_source(config::Environment::with_prefix("FILE_CDN").separator("__"))
        .build()?;

    let config = settings.try_deserialize::<ServiceConfig>()?;
    Ok(Arc::new(config))
}

/// Connect every backend and assemble the shared state
async fn initialize_services(config: Arc<ServiceConfig>) -> Result<AppState> {
    // Redis backs both the metadata cache and the blocklist mirror.
    let redis = match &config.cache.redis_uri {
        Some(uri) => {
            let client = redis::Client::open(uri.as_str())?;
            match client.get_tokio_connection_manager().await {
                Ok(manager) => {
                    info!("Connected to Redis");
                    Some(manager)
                }
                Err(e) => {
                    warn!("Redis unavailable, continuing without cache: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    // PostgreSQL is the designated metadata primary and one blob store.
    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(Duration::from_secs(config.database.call_timeout_secs))
        .connect(&config.database.postgres_uri)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {e}"))?;

    // MongoDB is the metadata replica and the other blob store.
    let mongo_options = ClientOptions::parse(&config.database.mongodb_uri)
        .await
        .map_err(|e| anyhow::anyhow!("Invalid MongoDB URI: {e}"))?;
    let mongo_client = mongodb::Client::with_options(mongo_options)
        .map_err(|e| anyhow::anyhow!("Failed to build MongoDB client: {e}"))?;
    let mongo_db = mongo_client.database(&config.database.mongodb_database);
    match mongo_db
        .run_command(bson::doc! {"ping": 1}, None)
        .await
    {
        Ok(_) => info!("Connected to MongoDB"),
        Err(e) => warn!("MongoDB ping failed, continuing: {}", e),
    }

    // S3-compatible primary object store.
    let mut aws_builder = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.storage.s3.region.clone()));
    if let Some(endpoint) = &config.storage.s3.endpoint {
        aws_builder = aws_builder.endpoint_url(endpoint);
    }
    let aws_config = aws_builder.load().await;
    let s3_client = aws_sdk_s3::Client::new(&aws_config);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("FileCdn/1.0")
        .build()?;

    let base_url = &config.server.base_url;
    let mut storage = StorageRouter::new();
    storage.register(Arc::new(S3Backend::new(s3_client, &config.storage.s3)));
    storage.register(Arc::new(HttpCdnBackend::new(
        models::StorageProvider::MediaCdnA,
        &config.storage.media_cdn_a,
        http.clone(),
    )));
    storage.register(Arc::new(HttpCdnBackend::new(
        models::StorageProvider::MediaCdnB,
        &config.storage.media_cdn_b,
        http.clone(),
    )));

    let pg_blobs = PgBlobBackend::new(pg_pool.clone(), base_url);
    pg_blobs
        .ensure_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to prepare blob schema: {e}"))?;
    storage.register(Arc::new(pg_blobs));
    storage.register(Arc::new(MongoBlobBackend::new(mongo_db.clone(), base_url)));

    let pg_metadata = PostgresMetadata::new(pg_pool);
    pg_metadata
        .ensure_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to prepare metadata schema: {e}"))?;

    let backends: Vec<Arc<dyn MetadataBackend>> = vec![
        Arc::new(pg_metadata),
        Arc::new(MongoMetadata::new(mongo_db)),
    ];
    let cache = redis.clone().map(|manager| {
        RecordCache::new(
            manager,
            Duration::from_secs(config.cache.metadata_ttl_secs),
        )
    });
    let metadata = Arc::new(MetadataStore::new(
        backends,
        cache,
        config.database.write_quorum,
        Duration::from_secs(config.database.call_timeout_secs),
    ));

    let security = Arc::new(SecurityGate::new(&config.security, redis));
    security.load_blocked_from_redis().await;
    spawn_blocklist_sweeper(security.clone());

    let state = AppState {
        validator: Arc::new(FileValidator::new(config.limits.max_file_size)),
        policy_table: Arc::new(default_policy_table()),
        storage: Arc::new(storage),
        metadata,
        security,
        notifier: Arc::new(Notifier::new(&config.notifier)),
        http,
        started_at: Instant::now(),
        config,
    };

    Ok(state)
}

/// Periodically drop expired in-memory blocklist entries.
fn spawn_blocklist_sweeper(security: Arc<SecurityGate>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let removed = security.sweep_expired().await;
            if removed > 0 {
                debug!(removed, "expired IP blocks swept");
            }
        }
    });
}

/// Build the application router
fn create_router(state: AppState) -> Router {
    let body_limit = state.config.limits.max_file_size as usize
        * state.config.limits.max_files_per_request
        + 1024 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/upload", post(handlers::upload_files))
        .route("/api/upload/url", post(handlers::upload_from_url))
        .route("/files/:id", get(handlers::file_info))
        .route("/files/:id/status", get(handlers::file_status))
        .route("/files/:id/download", get(handlers::download_file))
        .route("/api/stats", get(handlers::stats))
        .route("/api/admin/cleanup", post(handlers::admin_cleanup))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Health check endpoint probing every backend
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut services = HashMap::new();

    for (name, healthy) in state.metadata.health_check().await {
        services.insert(format!("metadata_{name}"), healthy);
    }

    for provider in state.storage.providers() {
        if let Ok(backend) = state.storage.get(provider) {
            services.insert(
                format!("storage_{provider}"),
                backend.health_check().await.is_ok(),
            );
        }
    }

    let all_healthy = services.values().all(|&healthy| healthy);
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    };

    (status_code, Json(response))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
