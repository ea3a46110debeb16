mod health;
mod research;

use axum::Router;
use health::health_router;
use research::research_router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health_router())
        .nest("/research", research_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
