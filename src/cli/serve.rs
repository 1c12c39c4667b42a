use crate::jobs::{self, JobContext, JobQueue, JobRunner, RetryPolicy};
use crate::services::blob::BlobStore;
use crate::web::{self, AppState};
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

pub async fn run(config_path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path, config.database.pool_size)?;
    db.migrate()?;

    let blobs = BlobStore::open(&config.media.storage_dir)?;

    let (queue, rx) = JobQueue::channel();
    let runner = JobRunner::new(
        JobContext::from_config(&config, db.clone(), blobs.clone()),
        RetryPolicy::from_config(&config),
    );
    runner.spawn(rx);
    jobs::enqueue_pending_normalizations(&db, &queue)?;
    jobs::spawn_sitemap_schedule(
        queue.clone(),
        Duration::from_secs(config.jobs.sitemap_interval_secs),
    );

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );
    tracing::info!("Starting server at http://{}", addr);

    let state = AppState::new(config, db, blobs, queue)?;
    web::serve(state, &addr).await?;

    Ok(())
}
