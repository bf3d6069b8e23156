//! Command implementations for the codehist CLI.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use codehist_core::Config;
use engine::{BlobCache, FileFilter, GitStore, JsonReportSink, RevisionDriver, TcpRunner, WorkerPool};
use tracing::info;

pub async fn cmd_analyse(
  repo: PathBuf,
  config: Config,
  from_tag: Option<String>,
  revisions: Vec<String>,
  all_tags: bool,
) -> Result<()> {
  let filter = FileFilter::from_config(&config.filter);
  let store = GitStore::open(&repo, filter).with_context(|| format!("cannot open {}", repo.display()))?;

  let revisions = if revisions.is_empty() {
    store
      .tags(from_tag.as_deref(), !all_tags)
      .await
      .context("failed to list tags")?
  } else {
    revisions
  };
  if revisions.is_empty() {
    bail!("no revisions to analyse (check --from-tag)");
  }
  info!(count = revisions.len(), "Revisions selected");

  let cache_dir = config.cache.effective_dir();
  let cache = BlobCache::open(&cache_dir, config.cache.memory_capacity)
    .await
    .with_context(|| format!("cannot open blob cache at {}", cache_dir.display()))?;

  let pool = WorkerPool::spawn(&config.pool, &repo)
    .await
    .context("failed to start worker pool")?;

  let driver = RevisionDriver::new(
    Arc::new(store),
    cache,
    pool,
    Arc::new(TcpRunner),
    Box::new(JsonReportSink::new(&config.output.dir)),
  )
  .with_job_timeout(Duration::from_secs(config.pool.job_timeout_secs));

  let summary = driver.run(&revisions).await?;

  println!(
    "Analysed {} revisions ({} files, {} file failures)",
    summary.revisions_processed, summary.files_analysed, summary.file_failures
  );
  if !summary.persist_failures.is_empty() {
    println!("Reports that could not be written:");
    for (revision, reason) in &summary.persist_failures {
      println!("  {revision}: {reason}");
    }
    bail!("{} report(s) failed to persist", summary.persist_failures.len());
  }

  Ok(())
}

pub async fn cmd_tags(repo: PathBuf, from_tag: Option<String>, all_tags: bool) -> Result<()> {
  let store = GitStore::open(&repo, FileFilter::default()).with_context(|| format!("cannot open {}", repo.display()))?;
  let tags = store.tags(from_tag.as_deref(), !all_tags).await?;
  for tag in tags {
    println!("{tag}");
  }
  Ok(())
}
