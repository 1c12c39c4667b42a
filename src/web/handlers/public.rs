use crate::services::error::ArticleError;
use crate::services::{article, image};
use crate::web::error::AppResult;
use crate::web::handlers::articles::not_found;
use crate::web::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;

pub async fn root() -> Redirect {
    Redirect::to("/articles")
}

pub async fn health() -> &'static str {
    "ok"
}

/// Bounded WebP rendition of the article's current image.
pub async fn optimized_image(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Response> {
    let article = match article::find_by_slug(&state.db, &slug) {
        Ok(a) => a,
        Err(ArticleError::NotFound(_)) => return not_found(&state),
        Err(e) => return Err(e.into()),
    };
    let Some(attachment) = article.image else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let state_for_task = state.clone();
    let rendition = tokio::task::spawn_blocking(move || {
        image::optimized_image(
            &state_for_task.blobs,
            &attachment,
            state_for_task.config.images.max_dimension,
        )
    })
    .await??;

    Ok((
        [
            (header::CONTENT_TYPE, rendition.content_type),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        rendition.data,
    )
        .into_response())
}

pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> AppResult<Response> {
    // Rejects anything that is not a plain blob key, including traversal.
    let Ok(path) = state.blobs.path(&key) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let content = match tokio::fs::read(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(StatusCode::NOT_FOUND.into_response())
        }
        Err(e) => return Err(e.into()),
    };
    let mime = mime_guess::from_path(&key).first_or_octet_stream();

    Ok(([(header::CONTENT_TYPE, mime.as_ref())], content).into_response())
}

pub async fn sitemap(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    match tokio::fs::read(&state.config.sitemap.path).await {
        Ok(xml) => Ok((
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            xml,
        )
            .into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(StatusCode::NOT_FOUND.into_response())
        }
        Err(e) => Err(e.into()),
    }
}
