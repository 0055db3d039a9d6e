use axum::{extract::State, http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod metrics;
pub mod state;

pub use error::AppError;
pub use metrics::SweeperMetrics;
pub use state::AppState;

/// Operational router: liveness plus Prometheus scrape endpoint.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let database = match &state.db {
        Some(db) => {
            db.ping().await.map_err(|err| {
                tracing::warn!(error = %err, "Database ping failed");
                AppError::Unavailable("database")
            })?;
            "up"
        }
        None => "detached",
    };
    Ok(Json(json!({ "status": "ok", "database": database })))
}

async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    Ok(state.metrics.export()?)
}
