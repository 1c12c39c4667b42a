use crate::models::ImageAttachment;
use crate::services::article::get_attachment;
use crate::services::blob::{BlobStore, StoredBlob};
use crate::services::image::{
    normalized_filename, transcode, Transcoded, TARGET_CONTENT_TYPE, TARGET_EXTENSION,
};
use crate::Database;
use anyhow::Result;
use rusqlite::TransactionBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    Normalized { width: u32, height: u32 },
    /// The article has no image, or no longer exists.
    NoImage,
    /// The attachment was replaced while transcoding; the result was dropped.
    Superseded,
}

/// Transcodes the article's attachment to WebP within `max_dimension` and
/// swaps it in place of the original. On any failure the stored attachment
/// is left as it was.
pub fn normalize(
    db: &Database,
    blobs: &BlobStore,
    article_id: i64,
    max_dimension: u32,
) -> Result<NormalizeOutcome> {
    let Some(original) = get_attachment(db, article_id)? else {
        return Ok(NormalizeOutcome::NoImage);
    };

    // Removed on drop, whichever way this function returns.
    let mut scratch = tempfile::Builder::new()
        .prefix("normalize-")
        .tempfile_in(blobs.scratch_dir())?;
    blobs.download_to(&original.blob_key, scratch.as_file_mut())?;
    let data = std::fs::read(scratch.path())?;

    let transcoded = transcode(&data, max_dimension)?;
    let stored = blobs.put(&transcoded.data, TARGET_EXTENSION)?;

    match swap_attachment(db, &original, &stored, &transcoded) {
        Ok(true) => {
            if let Err(e) = blobs.delete(&original.blob_key) {
                tracing::warn!(
                    "Could not remove original image {} of article {}: {}",
                    original.blob_key,
                    article_id,
                    e
                );
            }
            tracing::info!(
                "Normalized image of article {} to {}x{} webp",
                article_id,
                transcoded.width,
                transcoded.height
            );
            Ok(NormalizeOutcome::Normalized {
                width: transcoded.width,
                height: transcoded.height,
            })
        }
        Ok(false) => {
            blobs.delete(&stored.key)?;
            tracing::info!(
                "Image of article {} changed during normalization, discarding result",
                article_id
            );
            Ok(NormalizeOutcome::Superseded)
        }
        Err(e) => {
            if let Err(cleanup) = blobs.delete(&stored.key) {
                tracing::warn!("Could not remove orphaned blob {}: {}", stored.key, cleanup);
            }
            Err(e)
        }
    }
}

/// Replaces the attachment only if it still points at `original`.
fn swap_attachment(
    db: &Database,
    original: &ImageAttachment,
    stored: &StoredBlob,
    transcoded: &Transcoded,
) -> Result<bool> {
    let mut conn = db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let updated = tx.execute(
        r#"
        UPDATE attachments
        SET blob_key = ?, filename = ?, content_type = ?, byte_size = ?, checksum = ?, width = ?, height = ?
        WHERE article_id = ? AND blob_key = ?
        "#,
        rusqlite::params![
            stored.key,
            normalized_filename(&original.filename),
            TARGET_CONTENT_TYPE,
            stored.byte_size,
            stored.checksum,
            transcoded.width,
            transcoded.height,
            original.article_id,
            original.blob_key,
        ],
    )?;
    tx.commit()?;
    Ok(updated == 1)
}
