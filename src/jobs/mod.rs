use crate::services::article;
use crate::services::blob::BlobStore;
use crate::services::normalize::{self, NormalizeOutcome};
use crate::services::sitemap;
use crate::{Config, Database};
use anyhow::Result;
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    NormalizeImage { article_id: i64 },
    RefreshSitemap,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NormalizeImage { article_id } => write!(f, "normalize-image({})", article_id),
            Self::RefreshSitemap => write!(f, "refresh-sitemap"),
        }
    }
}

/// Sending half of the job channel. Cheap to clone into request handlers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: Job) {
        tracing::debug!("Enqueued job {}", job);
        if self.tx.send(job).is_err() {
            tracing::error!("Job runner is not running, dropped job {}", job);
        }
    }
}

/// Everything a job needs, detached from request state.
pub struct JobContext {
    pub db: Database,
    pub blobs: BlobStore,
    pub max_dimension: u32,
    pub base_url: String,
    pub sitemap_path: PathBuf,
}

impl JobContext {
    pub fn from_config(config: &Config, db: Database, blobs: BlobStore) -> Self {
        Self {
            db,
            blobs,
            max_dimension: config.images.max_dimension,
            base_url: config.base_url().to_string(),
            sitemap_path: PathBuf::from(&config.sitemap.path),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.jobs.max_attempts,
            base_delay: Duration::from_millis(config.jobs.retry_base_ms),
        }
    }

    /// Exponential backoff with up to 50% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(16)));
        let jitter_ms = self.base_delay.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        exp.saturating_add(Duration::from_millis(jitter))
    }
}

/// One lock per article so two normalizations of the same image never race.
#[derive(Default)]
struct ArticleLocks {
    locks: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ArticleLocks {
    fn lock_for(&self, article_id: i64) -> Arc<Mutex<()>> {
        if let Some(lock) = self.read().get(&article_id) {
            return lock.clone();
        }
        self.write().entry(article_id).or_default().clone()
    }

    fn release(&self, article_id: i64) {
        let mut locks = self.write();
        if let Some(lock) = locks.get(&article_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&article_id);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, Arc<Mutex<()>>>> {
        self.locks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<i64, Arc<Mutex<()>>>> {
        self.locks.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct JobRunner {
    ctx: Arc<JobContext>,
    policy: RetryPolicy,
    locks: Arc<ArticleLocks>,
}

impl JobRunner {
    pub fn new(ctx: JobContext, policy: RetryPolicy) -> Self {
        Self {
            ctx: Arc::new(ctx),
            policy,
            locks: Arc::new(ArticleLocks::default()),
        }
    }

    /// Consumes jobs until every `JobQueue` handle is dropped. Each job runs
    /// on its own task.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<Job>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut running = Vec::new();
            while let Some(job) = rx.recv().await {
                let runner = self.clone();
                running.push(tokio::spawn(async move {
                    // Failures are already logged by the retry loop.
                    let _ = runner.run_with_retry(job).await;
                }));
                running.retain(|handle: &JoinHandle<()>| !handle.is_finished());
            }
            for handle in running {
                let _ = handle.await;
            }
            tracing::info!("Job runner stopped");
        })
    }

    pub async fn run_with_retry(&self, job: Job) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.run(job).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        "Job {} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        job,
                        attempt,
                        self.policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Job {} failed after {} attempt(s): {:#}",
                        job,
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.read().len()
    }

    /// A single attempt at `job`.
    pub async fn run(&self, job: Job) -> Result<()> {
        match job {
            Job::NormalizeImage { article_id } => {
                let lock = self.locks.lock_for(article_id);
                let outcome = {
                    let _guard = lock.lock().await;
                    let ctx = self.ctx.clone();
                    tokio::task::spawn_blocking(move || {
                        normalize::normalize(&ctx.db, &ctx.blobs, article_id, ctx.max_dimension)
                    })
                    .await?
                };
                drop(lock);
                self.locks.release(article_id);

                if outcome? == NormalizeOutcome::NoImage {
                    tracing::debug!("Article {} has no image to normalize", article_id);
                }
                Ok(())
            }
            Job::RefreshSitemap => {
                let ctx = self.ctx.clone();
                tokio::task::spawn_blocking(move || {
                    sitemap::refresh(&ctx.db, &ctx.base_url, &ctx.sitemap_path)
                })
                .await??;
                Ok(())
            }
        }
    }
}

/// Queues normalization for every attachment still in its uploaded format.
/// Covers jobs lost to a restart and jobs that ran out of attempts.
pub fn enqueue_pending_normalizations(db: &Database, queue: &JobQueue) -> Result<usize> {
    let ids = article::list_article_ids_needing_normalization(db)?;
    for &article_id in &ids {
        queue.enqueue(Job::NormalizeImage { article_id });
    }
    if !ids.is_empty() {
        tracing::info!("Queued {} pending image normalization(s)", ids.len());
    }
    Ok(ids.len())
}

/// Enqueues a sitemap refresh now and then every `every`.
pub fn spawn_sitemap_schedule(queue: JobQueue, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            queue.enqueue(Job::RefreshSitemap);
        }
    })
}
