use super::handlers;
use super::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Headroom for the text fields sent alongside an image.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::public::root))
        .route("/health", get(handlers::public::health))
        .route("/sitemap.xml", get(handlers::public::sitemap))
        .route("/media/:key", get(handlers::public::serve_media))
}

pub fn article_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    let limit = DefaultBodyLimit::max(max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES));

    Router::new()
        .route("/articles", get(handlers::articles::index))
        .route(
            "/articles",
            post(handlers::articles::create).layer(limit.clone()),
        )
        .route("/articles/new", get(handlers::articles::new))
        .route("/articles/:slug", get(handlers::articles::show))
        .route(
            "/articles/:slug",
            post(handlers::articles::update).layer(limit),
        )
        .route("/articles/:slug/edit", get(handlers::articles::edit))
        .route(
            "/articles/:slug/image",
            get(handlers::public::optimized_image),
        )
        .route(
            "/articles/:slug/delete",
            post(handlers::articles::destroy),
        )
}
