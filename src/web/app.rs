use super::{SharedStorage, error::ErrorDetail, handlers};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get},
};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

// A worker serves requests strictly one after another
const REQUESTS_IN_FLIGHT_PER_WORKER: usize = 1;

pub fn create_app(storage: SharedStorage) -> Router<()> {
    let body_limit = usize::try_from(storage.max_file_size() + super::MULTIPART_OVERHEAD_BYTES)
        .unwrap_or(usize::MAX);

    Router::new()
        // Health check
        .route("/", get(handlers::welcome))
        // Listing and upload, with or without the trailing slash
        .route(
            "/upload",
            get(handlers::list_images)
                .post(handlers::upload_image)
                .delete(handlers::delete_without_filename),
        )
        .route(
            "/upload/",
            get(handlers::list_images)
                .post(handlers::upload_image)
                .delete(handlers::delete_without_filename),
        )
        // The wildcard captures separators too, so traversal attempts reach validation
        .route("/upload/{*filename}", delete(handlers::delete_image))
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        // Apply a layer to limit the maximum size of request bodies
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_error_responses))
        .layer(GlobalConcurrencyLimitLayer::new(REQUESTS_IN_FLIGHT_PER_WORKER))
        // Add CORS layer for browser clients served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        // Provide the shared state
        .with_state(storage)
}

async fn log_error_responses(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>() {
        let status = response.status();
        if status.is_server_error() {
            tracing::error!("{} {} -> {}: {}", method, path, status.as_u16(), detail);
        } else {
            tracing::warn!("{} {} -> {}: {}", method, path, status.as_u16(), detail);
        }
    }

    response
}
