use crate::models::{Article, ArticleField, CreateArticle, ImageUpload, UpdateArticle};
use crate::services::article;
use crate::services::error::{ArticleError, FieldError};
use crate::services::sitemap::article_url;
use crate::web::error::AppResult;
use crate::web::state::AppState;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tera::Context;

const EXCERPT_LENGTH: usize = 160;

#[derive(Deserialize)]
pub struct NoticeQuery {
    notice: Option<String>,
}

fn notice_message(code: Option<&str>) -> Option<&'static str> {
    match code? {
        "created" => Some("Article was successfully created."),
        "updated" => Some("Article was successfully updated."),
        "destroyed" => Some("Article was successfully destroyed."),
        _ => None,
    }
}

pub(crate) fn make_context(state: &AppState, notice: Option<&str>) -> Context {
    let mut ctx = Context::new();
    ctx.insert("site", &state.config.site);
    ctx.insert("notice", &notice_message(notice));
    ctx
}

pub(crate) fn not_found(state: &AppState) -> AppResult<Response> {
    let ctx = make_context(state, None);
    let html = state.templates.render("404.html", &ctx)?;
    Ok((StatusCode::NOT_FOUND, Html(html)).into_response())
}

/// Values echoed back into the form when it is re-rendered.
#[derive(Debug, Default, Serialize)]
struct FormValues {
    title: String,
    content: String,
    slug: String,
    meta_description: String,
}

impl From<&Article> for FormValues {
    fn from(article: &Article) -> Self {
        Self {
            title: article.title.clone(),
            content: article.content.clone(),
            slug: article.slug.clone(),
            meta_description: article.meta_description.clone().unwrap_or_default(),
        }
    }
}

/// The permitted multipart fields of an article form.
#[derive(Debug, Default)]
pub struct ArticleForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub meta_description: Option<String>,
    pub image: Option<ImageUpload>,
}

impl ArticleForm {
    fn values(&self) -> FormValues {
        FormValues {
            title: self.title.clone().unwrap_or_default(),
            content: self.content.clone().unwrap_or_default(),
            slug: self.slug.clone().unwrap_or_default(),
            meta_description: self.meta_description.clone().unwrap_or_default(),
        }
    }

    fn into_create(self) -> CreateArticle {
        CreateArticle {
            title: self.title.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            slug: self.slug,
            meta_description: self.meta_description,
            image: self.image,
        }
    }

    fn into_update(self) -> UpdateArticle {
        UpdateArticle {
            title: self.title,
            content: self.content,
            slug: self.slug,
            meta_description: self.meta_description,
            image: self.image,
        }
    }
}

pub enum FormRejection {
    Unpermitted(String),
    TooLarge(usize),
    Malformed(MultipartError),
}

impl IntoResponse for FormRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unpermitted(name) => (
                StatusCode::BAD_REQUEST,
                format!("Unpermitted parameter: {}", name),
            )
                .into_response(),
            Self::TooLarge(max) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Image exceeds the maximum upload size of {} bytes", max),
            )
                .into_response(),
            Self::Malformed(e) => e.into_response(),
        }
    }
}

/// Accepts `title` or Rails-style `article[title]` names; anything outside the
/// whitelist rejects the whole request.
fn field_for(name: &str) -> Option<ArticleField> {
    let name = name
        .strip_prefix("article[")
        .and_then(|n| n.strip_suffix(']'))
        .unwrap_or(name);
    ArticleField::from_name(name)
}

pub async fn read_article_form(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<ArticleForm, FormRejection> {
    let mut form = ArticleForm::default();

    while let Some(field) = multipart.next_field().await.map_err(FormRejection::Malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        let Some(kind) = field_for(&name) else {
            return Err(FormRejection::Unpermitted(name));
        };

        match kind {
            ArticleField::Image => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(FormRejection::Malformed)?;
                if data.len() > max_upload_bytes {
                    return Err(FormRejection::TooLarge(max_upload_bytes));
                }
                // Browsers submit an empty part when no file was chosen.
                if !data.is_empty() {
                    form.image = Some(ImageUpload {
                        filename,
                        data: data.to_vec(),
                    });
                }
            }
            text_field => {
                let value = field.text().await.map_err(FormRejection::Malformed)?;
                match text_field {
                    ArticleField::Title => form.title = Some(value),
                    ArticleField::Content => form.content = Some(value),
                    ArticleField::Slug => form.slug = Some(value),
                    ArticleField::MetaDescription => form.meta_description = Some(value),
                    ArticleField::Image => {}
                }
            }
        }
    }

    Ok(form)
}

fn render_form(
    state: &AppState,
    values: &FormValues,
    errors: &[FieldError],
    current_slug: Option<&str>,
    status: StatusCode,
) -> AppResult<Response> {
    let mut ctx = make_context(state, None);
    ctx.insert("form", values);
    ctx.insert(
        "errors",
        &errors.iter().map(humanize_error).collect::<Vec<_>>(),
    );
    ctx.insert("is_new", &current_slug.is_none());
    ctx.insert("slug", &current_slug);
    let action = match current_slug {
        Some(slug) => format!("/articles/{}", slug),
        None => "/articles".to_string(),
    };
    ctx.insert("action", &action);

    let html = state.templates.render("articles/form.html", &ctx)?;
    Ok((status, Html(html)).into_response())
}

fn humanize_error(error: &FieldError) -> String {
    let field = match error.field {
        "meta_description" => "Meta description".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    };
    format!("{} {}", field, error.message)
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NoticeQuery>,
) -> AppResult<Html<String>> {
    let articles = article::list_articles(&state.db)?;

    let mut ctx = make_context(&state, query.notice.as_deref());
    ctx.insert("articles", &articles);

    let html = state.templates.render("articles/index.html", &ctx)?;
    Ok(Html(html))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<NoticeQuery>,
) -> AppResult<Response> {
    let article = match article::find_by_slug(&state.db, &slug) {
        Ok(a) => a,
        Err(ArticleError::NotFound(_)) => return not_found(&state),
        Err(e) => return Err(e.into()),
    };

    let base_url = state.config.base_url();
    let description = article
        .meta_description
        .clone()
        .unwrap_or_else(|| state.markdown.generate_excerpt(&article.content, EXCERPT_LENGTH));
    let image_url = article
        .image
        .as_ref()
        .map(|_| format!("{}/image", article_url(base_url, &article.slug)));

    let mut ctx = make_context(&state, query.notice.as_deref());
    ctx.insert("article", &article);
    ctx.insert("body_html", &state.markdown.render(&article.content));
    ctx.insert("description", &description);
    ctx.insert("canonical_url", &article_url(base_url, &article.slug));
    ctx.insert("image_url", &image_url);

    let html = state.templates.render("articles/show.html", &ctx)?;
    Ok(Html(html).into_response())
}

pub async fn new(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    render_form(&state, &FormValues::default(), &[], None, StatusCode::OK)
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = match read_article_form(multipart, state.max_upload_bytes).await {
        Ok(form) => form,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let values = form.values();

    match article::create_article(&state.db, &state.blobs, &state.jobs, form.into_create()) {
        Ok(article) => {
            Ok(Redirect::to(&format!("/articles/{}?notice=created", article.slug)).into_response())
        }
        Err(ArticleError::Validation(errors)) => render_form(
            &state,
            &values,
            &errors,
            None,
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        Err(e) => Err(e.into()),
    }
}

pub async fn edit(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Response> {
    match article::find_by_slug(&state.db, &slug) {
        Ok(article) => render_form(
            &state,
            &FormValues::from(&article),
            &[],
            Some(&article.slug),
            StatusCode::OK,
        ),
        Err(ArticleError::NotFound(_)) => not_found(&state),
        Err(e) => Err(e.into()),
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> AppResult<Response> {
    let current = match article::find_by_slug(&state.db, &slug) {
        Ok(a) => a,
        Err(ArticleError::NotFound(_)) => return not_found(&state),
        Err(e) => return Err(e.into()),
    };

    let form = match read_article_form(multipart, state.max_upload_bytes).await {
        Ok(form) => form,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let values = form.values();

    match article::update_article(
        &state.db,
        &state.blobs,
        &state.jobs,
        current.id,
        form.into_update(),
    ) {
        Ok(article) => {
            Ok(Redirect::to(&format!("/articles/{}?notice=updated", article.slug)).into_response())
        }
        Err(ArticleError::Validation(errors)) => render_form(
            &state,
            &values,
            &errors,
            Some(&current.slug),
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        Err(ArticleError::NotFound(_)) => not_found(&state),
        Err(e) => Err(e.into()),
    }
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Response> {
    let article = match article::find_by_slug(&state.db, &slug) {
        Ok(a) => a,
        Err(ArticleError::NotFound(_)) => return not_found(&state),
        Err(e) => return Err(e.into()),
    };

    article::delete_article(&state.db, &state.blobs, article.id)?;

    Ok(Redirect::to("/articles?notice=destroyed").into_response())
}
