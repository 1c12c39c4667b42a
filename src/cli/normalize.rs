use crate::services::article;
use crate::services::blob::BlobStore;
use crate::services::normalize::{self, NormalizeOutcome};
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: &Path, slug: Option<String>, all: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path, config.database.pool_size)?;
    db.migrate()?;
    let blobs = BlobStore::open(&config.media.storage_dir)?;

    let ids = match (slug, all) {
        (_, true) => article::list_article_ids_with_images(&db)?,
        (Some(slug), false) => vec![article::find_by_slug(&db, &slug)?.id],
        (None, false) => anyhow::bail!("Pass an article slug or --all"),
    };

    let mut normalized = 0;
    let mut failed = 0;
    for id in ids {
        match normalize::normalize(&db, &blobs, id, config.images.max_dimension) {
            Ok(NormalizeOutcome::Normalized { width, height }) => {
                println!("  article {}: {}x{} webp", id, width, height);
                normalized += 1;
            }
            Ok(NormalizeOutcome::NoImage) => println!("  article {}: no image", id),
            Ok(NormalizeOutcome::Superseded) => println!("  article {}: image changed, skipped", id),
            Err(e) => {
                tracing::error!("Could not normalize image of article {}: {:#}", id, e);
                failed += 1;
            }
        }
    }

    println!("\n  {} normalized, {} failed.\n", normalized, failed);
    if failed > 0 {
        anyhow::bail!("{} image(s) could not be normalized", failed);
    }

    Ok(())
}
