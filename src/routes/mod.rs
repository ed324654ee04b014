use axum::http::HeaderValue;
use axum::{
    routing::{get, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub mod batches;
pub mod health;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => AllowOrigin::list(parse_origins(origins)),
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true);

    let batch_routes = Router::new()
        .route(
            "/",
            get(batches::list_batches).post(batches::create_batch),
        )
        .route("/search", get(batches::search_batches))
        .route("/:batch_id", get(batches::get_batch))
        .route("/:batch_id/statuses", put(batches::update_status));

    Router::new()
        .nest("/api/batches", batch_routes)
        .route("/search_batches", get(batches::search_batches))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn parse_origins(origins: &str) -> Vec<HeaderValue> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter_map(|value| match value.parse::<HeaderValue>() {
            Ok(header) => Some(header),
            Err(err) => {
                warn!(origin = value, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_origins;

    #[test]
    fn parses_comma_separated_origins() {
        let origins = parse_origins("https://a.example.com, ,https://b.example.com");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1], "https://b.example.com");
    }
}
