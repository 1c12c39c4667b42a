use crate::jobs::{Job, JobQueue};
use crate::models::{
    Article, ArticleField, ArticleSummary, CreateArticle, ImageAttachment, ImageUpload,
    UpdateArticle,
};
use crate::services::blob::{BlobStore, StoredBlob};
use crate::services::error::{ArticleError, ArticleResult, FieldError};
use crate::services::image::{read_dimensions, sniff_image, TARGET_CONTENT_TYPE};
use crate::services::slug::{disambiguate, generate_slug, normalize_slug, MAX_SLUG_LENGTH};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;

/// Write attempts before a slug collision is surfaced to the caller.
pub const MAX_SLUG_ATTEMPTS: u32 = 5;

const ARTICLE_SELECT: &str = r#"
    SELECT a.id, a.title, a.content, a.slug, a.meta_description, a.created_at, a.updated_at,
           t.id, t.article_id, t.blob_key, t.filename, t.content_type, t.byte_size, t.checksum,
           t.width, t.height, t.created_at
    FROM articles a
    LEFT JOIN attachments t ON t.article_id = a.id
"#;

/// An image stored in the blob store but not yet attached to a committed row.
struct PendingImage {
    blob: StoredBlob,
    filename: String,
    content_type: &'static str,
    dimensions: Option<(u32, u32)>,
}

pub fn create_article(
    db: &Database,
    blobs: &BlobStore,
    jobs: &JobQueue,
    input: CreateArticle,
) -> ArticleResult<Article> {
    let title = input.title.trim().to_string();
    let content = input.content;
    let meta_description = normalize_optional(input.meta_description);

    let mut errors = validate_required(&title, &content);
    let explicit_slug = check_slug(input.slug.as_deref(), &mut errors);
    let image_type = check_image(input.image.as_ref(), &mut errors);
    if !errors.is_empty() {
        return Err(ArticleError::Validation(errors));
    }

    let base = explicit_slug.unwrap_or_else(|| generate_slug(&title));

    let pending = store_image(blobs, input.image, image_type)?;

    let result = insert_with_retries(db, &base, |conn, slug| {
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO articles (title, content, slug, meta_description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            (&title, &content, slug, &meta_description, &now, &now),
        )?;
        let id = conn.last_insert_rowid();
        if let Some(image) = &pending {
            upsert_attachment(conn, id, image)?;
        }
        Ok(id)
    });

    let id = match result {
        Ok(id) => id,
        Err(e) => {
            discard_pending(blobs, pending.as_ref());
            return Err(e);
        }
    };

    // Committed: only now is it safe to hand work to the background runner.
    if pending.is_some() {
        jobs.enqueue(Job::NormalizeImage { article_id: id });
    }

    let article = get_article(db, id)?;
    tracing::info!("Created article id={} slug={}", article.id, article.slug);
    Ok(article)
}

pub fn update_article(
    db: &Database,
    blobs: &BlobStore,
    jobs: &JobQueue,
    id: i64,
    input: UpdateArticle,
) -> ArticleResult<Article> {
    let current = get_article(db, id)?;
    let changed = changed_fields(&current, &input);

    let title = input
        .title
        .as_deref()
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| current.title.clone());
    let content = input.content.clone().unwrap_or_else(|| current.content.clone());
    let meta_description = match input.meta_description.clone() {
        Some(md) => normalize_optional(Some(md)),
        None => current.meta_description.clone(),
    };

    let mut errors = validate_required(&title, &content);
    let explicit_slug = check_slug(input.slug.as_deref(), &mut errors);
    let image_type = check_image(input.image.as_ref(), &mut errors);
    if !errors.is_empty() {
        return Err(ArticleError::Validation(errors));
    }

    if changed.is_empty() {
        return Ok(current);
    }

    // The slug follows the title, and only the title, unless one is given.
    let base = if changed.contains(&ArticleField::Slug) {
        explicit_slug
    } else if should_regenerate_slug(&changed) {
        Some(generate_slug(&title))
    } else {
        None
    };

    let pending = store_image(blobs, input.image, image_type)?;
    let mut replaced_key: Option<String> = None;

    let write = |conn: &Connection, slug: &str| -> ArticleResult<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE articles SET title = ?, content = ?, slug = ?, meta_description = ?, updated_at = ? WHERE id = ?",
            (&title, &content, slug, &meta_description, &now, id),
        )?;
        Ok(id)
    };

    let result = match &base {
        Some(base) => insert_with_retries_excluding(db, base, Some(id), |conn, slug| {
            write(conn, slug)?;
            if let Some(image) = &pending {
                replaced_key = upsert_attachment(conn, id, image)?;
            }
            Ok(id)
        }),
        None => in_transaction(db, |conn| {
            write(conn, &current.slug)?;
            if let Some(image) = &pending {
                replaced_key = upsert_attachment(conn, id, image)?;
            }
            Ok(id)
        }),
    };

    if let Err(e) = result {
        discard_pending(blobs, pending.as_ref());
        return Err(e);
    }

    if let Some(old_key) = replaced_key {
        if let Err(e) = blobs.delete(&old_key) {
            tracing::warn!("Could not release replaced image {}: {}", old_key, e);
        }
    }
    if pending.is_some() {
        jobs.enqueue(Job::NormalizeImage { article_id: id });
    }

    let article = get_article(db, id)?;
    tracing::info!(
        "Updated article id={} slug={} fields={:?}",
        article.id,
        article.slug,
        changed
    );
    Ok(article)
}

pub fn delete_article(db: &Database, blobs: &BlobStore, id: i64) -> ArticleResult<()> {
    let mut conn = db.get()?;
    // One write transaction, so a concurrent normalization cannot swap in a
    // blob between reading the key and removing the row.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let blob_key: Option<String> = tx
        .query_row(
            "SELECT blob_key FROM attachments WHERE article_id = ?",
            [id],
            |row| row.get(0),
        )
        .optional()?;

    let deleted = tx.execute("DELETE FROM articles WHERE id = ?", [id])?;
    if deleted == 0 {
        return Err(ArticleError::NotFound(format!("id {}", id)));
    }
    tx.commit()?;

    if let Some(key) = blob_key {
        if let Err(e) = blobs.delete(&key) {
            tracing::warn!("Could not release image {} of article {}: {}", key, id, e);
        }
    }

    tracing::info!("Deleted article id={}", id);
    Ok(())
}

pub fn find_by_slug(db: &Database, slug: &str) -> ArticleResult<Article> {
    let conn = db.get()?;
    conn.query_row(
        &format!("{} WHERE a.slug = ?", ARTICLE_SELECT),
        [slug],
        row_to_article,
    )
    .optional()?
    .ok_or_else(|| ArticleError::NotFound(format!("slug '{}'", slug)))
}

pub fn get_article(db: &Database, id: i64) -> ArticleResult<Article> {
    let conn = db.get()?;
    conn.query_row(
        &format!("{} WHERE a.id = ?", ARTICLE_SELECT),
        [id],
        row_to_article,
    )
    .optional()?
    .ok_or_else(|| ArticleError::NotFound(format!("id {}", id)))
}

pub fn list_articles(db: &Database) -> Result<Vec<ArticleSummary>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(
        r#"
        SELECT a.id, a.title, a.slug, a.meta_description, t.id IS NOT NULL, a.created_at, a.updated_at
        FROM articles a
        LEFT JOIN attachments t ON t.article_id = a.id
        ORDER BY a.created_at DESC, a.id DESC
        "#,
    )?;

    let articles = stmt
        .query_map([], |row| {
            Ok(ArticleSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                slug: row.get(2)?,
                meta_description: row.get(3)?,
                has_image: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(articles)
}

pub fn count_articles(db: &Database) -> Result<i64> {
    let conn = db.get()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
    Ok(count)
}

pub fn get_attachment(db: &Database, article_id: i64) -> Result<Option<ImageAttachment>> {
    let conn = db.get()?;
    let attachment = conn
        .query_row(
            "SELECT id, article_id, blob_key, filename, content_type, byte_size, checksum, width, height, created_at FROM attachments WHERE article_id = ?",
            [article_id],
            |row| {
                Ok(ImageAttachment {
                    id: row.get(0)?,
                    article_id: row.get(1)?,
                    blob_key: row.get(2)?,
                    filename: row.get(3)?,
                    content_type: row.get(4)?,
                    byte_size: row.get(5)?,
                    checksum: row.get(6)?,
                    width: row.get(7)?,
                    height: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(attachment)
}

pub fn list_article_ids_with_images(db: &Database) -> Result<Vec<i64>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare("SELECT article_id FROM attachments ORDER BY article_id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Articles whose attachment is not yet in the target format, for instance
/// because the process stopped before its normalization job ran.
pub fn list_article_ids_needing_normalization(db: &Database) -> Result<Vec<i64>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(
        "SELECT article_id FROM attachments WHERE content_type != ? ORDER BY article_id",
    )?;
    let ids = stmt
        .query_map([TARGET_CONTENT_TYPE], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Fields whose submitted value differs from what is stored.
pub fn changed_fields(current: &Article, input: &UpdateArticle) -> Vec<ArticleField> {
    let mut changed = Vec::new();

    if let Some(title) = &input.title {
        if title.trim() != current.title {
            changed.push(ArticleField::Title);
        }
    }
    if let Some(content) = &input.content {
        if *content != current.content {
            changed.push(ArticleField::Content);
        }
    }
    if let Some(slug) = input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if normalize_slug(slug).as_deref() != Some(current.slug.as_str()) {
            changed.push(ArticleField::Slug);
        }
    }
    if let Some(md) = &input.meta_description {
        if normalize_optional(Some(md.clone())) != current.meta_description {
            changed.push(ArticleField::MetaDescription);
        }
    }
    if input.image.is_some() {
        changed.push(ArticleField::Image);
    }

    changed
}

pub fn should_regenerate_slug(changed: &[ArticleField]) -> bool {
    changed.contains(&ArticleField::Title)
}

fn validate_required(title: &str, content: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push(FieldError::new("title", "can't be blank"));
    }
    if content.trim().is_empty() {
        errors.push(FieldError::new("content", "can't be blank"));
    }
    errors
}

/// A blank slug means "derive it"; anything else must normalize to a usable one.
fn check_slug(slug: Option<&str>, errors: &mut Vec<FieldError>) -> Option<String> {
    let slug = slug.map(str::trim).filter(|s| !s.is_empty())?;
    let normalized = normalize_slug(slug);
    if normalized.is_none() {
        errors.push(FieldError::new("slug", "is invalid"));
    }
    normalized
}

fn check_image(
    image: Option<&ImageUpload>,
    errors: &mut Vec<FieldError>,
) -> Option<(&'static str, &'static str)> {
    let image = image?;
    match sniff_image(&image.data) {
        Some(kind) => Some(kind),
        None => {
            errors.push(FieldError::new(
                "image",
                "must be a JPEG, PNG, GIF or WebP image",
            ));
            None
        }
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn store_image(
    blobs: &BlobStore,
    image: Option<ImageUpload>,
    kind: Option<(&'static str, &'static str)>,
) -> ArticleResult<Option<PendingImage>> {
    let (Some(image), Some((content_type, extension))) = (image, kind) else {
        return Ok(None);
    };

    let blob = blobs.put(&image.data, extension)?;
    Ok(Some(PendingImage {
        blob,
        filename: sanitize_filename(&image.filename, extension),
        content_type,
        dimensions: read_dimensions(&image.data),
    }))
}

fn discard_pending(blobs: &BlobStore, pending: Option<&PendingImage>) {
    if let Some(image) = pending {
        if let Err(e) = blobs.delete(&image.blob.key) {
            tracing::warn!("Could not discard uncommitted image {}: {}", image.blob.key, e);
        }
    }
}

fn sanitize_filename(name: &str, extension: &str) -> String {
    let base = std::path::Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::trim)
        .unwrap_or("");
    if base.is_empty() {
        format!("image.{}", extension)
    } else {
        base.to_string()
    }
}

/// Attaches the image, returning the blob key it replaced, if any.
fn upsert_attachment(
    conn: &Connection,
    article_id: i64,
    image: &PendingImage,
) -> rusqlite::Result<Option<String>> {
    let previous: Option<String> = conn
        .query_row(
            "SELECT blob_key FROM attachments WHERE article_id = ?",
            [article_id],
            |row| row.get(0),
        )
        .optional()?;

    let (width, height) = match image.dimensions {
        Some((w, h)) => (Some(w), Some(h)),
        None => (None, None),
    };

    conn.execute(
        r#"
        INSERT INTO attachments (article_id, blob_key, filename, content_type, byte_size, checksum, width, height, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(article_id) DO UPDATE SET
            blob_key = excluded.blob_key,
            filename = excluded.filename,
            content_type = excluded.content_type,
            byte_size = excluded.byte_size,
            checksum = excluded.checksum,
            width = excluded.width,
            height = excluded.height,
            created_at = excluded.created_at
        "#,
        rusqlite::params![
            article_id,
            image.blob.key,
            image.filename,
            image.content_type,
            image.blob.byte_size,
            image.blob.checksum,
            width,
            height,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(previous)
}

pub(crate) fn insert_with_retries<F>(db: &Database, base: &str, write: F) -> ArticleResult<i64>
where
    F: FnMut(&Connection, &str) -> ArticleResult<i64>,
{
    insert_with_retries_excluding(db, base, None, write)
}

/// Runs `write` in an immediate transaction with a freshly derived slug,
/// deriving again whenever the unique index rejects it.
fn insert_with_retries_excluding<F>(
    db: &Database,
    base: &str,
    exclude_id: Option<i64>,
    mut write: F,
) -> ArticleResult<i64>
where
    F: FnMut(&Connection, &str) -> ArticleResult<i64>,
{
    let mut conn = db.get()?;

    for attempt in 1..=MAX_SLUG_ATTEMPTS {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let slug = derive_unique_slug(&tx, base, exclude_id)?;

        match write(&tx, &slug) {
            Ok(id) => {
                tx.commit()?;
                return Ok(id);
            }
            Err(ArticleError::Storage(e)) if is_slug_violation(&e) => {
                tracing::warn!(
                    "Slug '{}' taken at write time (attempt {}/{}), deriving again",
                    slug,
                    attempt,
                    MAX_SLUG_ATTEMPTS
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(ArticleError::SlugConflict {
        base: base.to_string(),
        attempts: MAX_SLUG_ATTEMPTS,
    })
}

fn in_transaction<F>(db: &Database, write: F) -> ArticleResult<i64>
where
    F: FnOnce(&Connection) -> ArticleResult<i64>,
{
    let mut conn = db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let id = write(&tx)?;
    tx.commit()?;
    Ok(id)
}

/// Picks the first free slug for `base` among slugs owned by other articles.
fn derive_unique_slug(
    conn: &Connection,
    base: &str,
    exclude_id: Option<i64>,
) -> rusqlite::Result<String> {
    // Disambiguated candidates may truncate the base, so match on a prefix
    // that every candidate keeps.
    let prefix_len = base.len().min(MAX_SLUG_LENGTH - 20);
    let pattern = format!("{}%", &base[..prefix_len]);

    let mut stmt = conn.prepare(
        "SELECT slug FROM articles WHERE slug LIKE ? AND (? IS NULL OR id != ?)",
    )?;
    let taken = stmt
        .query_map(rusqlite::params![pattern, exclude_id, exclude_id], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<HashSet<_>, _>>()?;

    Ok(disambiguate(base, &taken))
}

fn is_slug_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, Some(msg))) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.contains("articles.slug")
        }
        _ => false,
    }
}

fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
    let attachment_id: Option<i64> = row.get(7)?;
    let image = match attachment_id {
        Some(id) => Some(ImageAttachment {
            id,
            article_id: row.get(8)?,
            blob_key: row.get(9)?,
            filename: row.get(10)?,
            content_type: row.get(11)?,
            byte_size: row.get(12)?,
            checksum: row.get(13)?,
            width: row.get(14)?,
            height: row.get(15)?,
            created_at: row.get(16)?,
        }),
        None => None,
    };

    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        slug: row.get(3)?,
        meta_description: row.get(4)?,
        image,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
