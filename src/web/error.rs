use crate::services::error::ArticleError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<ArticleError>() {
            Some(ArticleError::NotFound(_)) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            Some(err @ ArticleError::Validation(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response()
            }
            Some(err @ ArticleError::SlugConflict { .. }) => {
                tracing::warn!("{}", err);
                (
                    StatusCode::CONFLICT,
                    "Another article claimed this slug at the same time, please retry",
                )
                    .into_response()
            }
            _ => {
                tracing::error!("Application error: {:?}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
