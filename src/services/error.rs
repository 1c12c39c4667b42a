use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ArticleError {
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("article not found: {0}")]
    NotFound(String),

    #[error("could not find a free slug for '{base}' after {attempts} attempts")]
    SlugConflict { base: String, attempts: u32 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ArticleError {
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

impl From<rusqlite::Error> for ArticleError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type ArticleResult<T> = Result<T, ArticleError>;
