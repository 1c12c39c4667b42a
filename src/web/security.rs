use super::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Request, Response};
use axum::middleware::Next;
use std::sync::Arc;

const X_ROBOTS_TAG: HeaderName = HeaderName::from_static("x-robots-tag");

pub fn security_headers<B>(mut response: Response<B>) -> Response<B> {
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; frame-ancestors 'none'; base-uri 'self'; form-action 'self'",
        ),
    );

    response
}

/// Only a production site asks to be indexed.
pub fn robots_tag(production: bool) -> HeaderValue {
    if production {
        HeaderValue::from_static("all")
    } else {
        HeaderValue::from_static("noindex, nofollow")
    }
}

pub async fn apply_security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let response = next.run(request).await;
    security_headers(response)
}

pub async fn apply_robots_header(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(X_ROBOTS_TAG, robots_tag(state.config.site.production));
    response
}
