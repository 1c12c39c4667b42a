use crate::services::sitemap;
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path, config.database.pool_size)?;
    db.migrate()?;

    let count = sitemap::refresh(&db, config.base_url(), Path::new(&config.sitemap.path))?;
    tracing::info!("Wrote {} with {} article(s)", config.sitemap.path, count);

    Ok(())
}
