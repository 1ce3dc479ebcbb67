pub mod completion_routes;

use axum::routing::post;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::transcoder::CompletionRelay;
use completion_routes::completion_handler;

/// Builds the relay router. Methods other than POST on the endpoint get 405.
pub fn router(relay: CompletionRelay) -> Router {
    Router::new()
        .route("/api/completion", post(completion_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}
