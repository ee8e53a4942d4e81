use axum::{
    extract::State,
    http::HeaderValue,
    response::Json,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod services;
mod store;

use config::{Config, StoreBackend};
use errors::AppError;
use handlers::{auth, rewards, tasks};
use middleware::AuthConfig;
use services::{
    GeminiSuggester, OwnershipPolicy, RewardCalculator, RewardLedgerService, RewardSuggester,
    TaskLifecycle,
};
use store::{MemoryStore, PgStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub lifecycle: TaskLifecycle,
    pub ledger: RewardLedgerService,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        rewards: RewardCalculator,
        policy: OwnershipPolicy,
        auth: AuthConfig,
    ) -> Self {
        Self {
            lifecycle: TaskLifecycle::new(store.clone(), rewards, policy),
            ledger: RewardLedgerService::new(store.clone(), policy),
            store,
            auth,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("taskhive_backend=info,sqlx=warn,tower_http=info")
            }),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let database_url = config.database_url.as_deref().unwrap_or_default();
            let pool = database::create_pool(database_url).await?;

            if config.skip_migrations {
                warn!("⚠️ Skipping migrations due to SKIP_MIGRATIONS=true");
            } else {
                database::run_migrations(&pool).await;
            }
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("⚠️ Using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    info!("🗄️ Store backend: {}", store.backend());

    let suggester: Option<Arc<dyn RewardSuggester>> = match &config.gemini_api_key {
        Some(key) => {
            info!("🤖 Reward suggestions enabled via {}", config.gemini_endpoint);
            Some(Arc::new(GeminiSuggester::new(config.gemini_endpoint.clone(), key.clone())))
        }
        None => {
            info!("🧮 GEMINI_API_KEY not set, rewards use the fallback formula");
            None
        }
    };

    let policy = OwnershipPolicy {
        relaxed: config.relaxed_ownership,
    };
    if policy.relaxed {
        warn!("⚠️ TASKHIVE_RELAXED_OWNERSHIP=true: ownership checks are relaxed, do not use in production");
    }

    let state = AppState::new(
        store,
        RewardCalculator::new(suggester, config.reward_suggestion_timeout),
        policy,
        AuthConfig::new(config.jwt_secret.clone(), config.token_ttl),
    );

    let app = build_router(state, cors_layer(&config));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("🚀 Server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = if config.debug_mode {
        info!("🔓 Development mode: Using permissive CORS");
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("⚠️ Ignoring invalid origin '{}': {}", origin, e);
                    None
                }
            })
            .collect();

        info!("🔒 Production mode: CORS configured for origins: {:?}", config.allowed_origins);
        CorsLayer::new().allow_origin(origins).allow_credentials(true)
    };

    cors.allow_methods([
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::PUT,
        axum::http::Method::DELETE,
        axum::http::Method::OPTIONS,
    ])
    .allow_headers([
        axum::http::header::CONTENT_TYPE,
        axum::http::header::AUTHORIZATION,
        axum::http::header::ACCEPT,
        axum::http::HeaderName::from_static(middleware::auth::LEGACY_TOKEN_HEADER),
    ])
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/auth", auth::router())
        .nest("/api/tasks", tasks::router())
        .nest("/api/rewards", rewards::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.ping().await?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "taskhive-backend",
        "store": state.store.backend(),
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{call, TestApp};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn health_reports_the_store() {
        let app = TestApp::new(false);
        let (status, body) = call(&app.router, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let app = TestApp::new(false);
        let token = crate::handlers::test_support::register(&app.router, "Tess").await;
        let (status, body) = call(
            &app.router,
            Method::GET,
            &format!("/api/tasks/{}", uuid::Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }
}
