//! Drives scheduler passes across revisions with one warm worker pool.
//!
//! Workers are spawned before the first revision and torn down after the
//! last: the expensive part of a pass is the cold cache, not process startup,
//! so the pool and the blob cache both carry over from tag to tag.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use codehist_core::RevisionReport;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  cache::BlobCache,
  pool::WorkerPool,
  runner::JobRunner,
  scheduler::{JobScheduler, PassError},
  store::ContentStore,
};

#[derive(Debug, Error)]
pub enum SinkError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("revision {revision} failed: {source}")]
  Pass {
    revision: String,
    #[source]
    source: PassError,
  },
}

/// Where finished reports go. Separated from the driver so the artifact
/// format stays a caller concern.
#[async_trait]
pub trait ReportSink: Send + Sync {
  /// Persist one report, returning where it landed.
  async fn persist(&self, report: &RevisionReport) -> Result<PathBuf, SinkError>;
}

/// Writes `<dir>/<revision>.json`, compact JSON, one file per revision.
pub struct JsonReportSink {
  dir: PathBuf,
}

impl JsonReportSink {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }
}

#[async_trait]
impl ReportSink for JsonReportSink {
  async fn persist(&self, report: &RevisionReport) -> Result<PathBuf, SinkError> {
    tokio::fs::create_dir_all(&self.dir).await?;
    // Tag names may contain path separators.
    let name = report.revision.replace(['/', '\\'], "-");
    let path = self.dir.join(format!("{name}.json"));
    let bytes = serde_json::to_vec(report)?;
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
  }
}

/// Outcome of a full run across revisions.
#[derive(Debug, Default)]
pub struct RunSummary {
  pub revisions_processed: usize,
  pub files_analysed: usize,
  pub file_failures: usize,
  /// Revisions whose report could not be written, with the reason. The run
  /// continues past these; the pool stays warm.
  pub persist_failures: Vec<(String, String)>,
}

pub struct RevisionDriver {
  store: Arc<dyn ContentStore>,
  cache: BlobCache,
  pool: WorkerPool,
  runner: Arc<dyn JobRunner>,
  sink: Box<dyn ReportSink>,
  job_timeout: Duration,
}

impl RevisionDriver {
  pub fn new(
    store: Arc<dyn ContentStore>,
    cache: BlobCache,
    pool: WorkerPool,
    runner: Arc<dyn JobRunner>,
    sink: Box<dyn ReportSink>,
  ) -> Self {
    Self {
      store,
      cache,
      pool,
      runner,
      sink,
      job_timeout: Duration::ZERO,
    }
  }

  pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
    self.job_timeout = timeout;
    self
  }

  /// Process revisions in order, one scheduler pass each. A pass-level
  /// failure (worker crash, unreachable store) aborts the run; per-file
  /// failures and persist failures do not. The pool is torn down exactly
  /// once, on every exit path.
  pub async fn run(mut self, revisions: &[String]) -> Result<RunSummary, EngineError> {
    let mut summary = RunSummary::default();

    for revision in revisions {
      info!(%revision, "Processing revision");

      let scheduler = JobScheduler::new(
        revision.clone(),
        Arc::clone(&self.store),
        &self.cache,
        &mut self.pool,
        Arc::clone(&self.runner),
      )
      .with_job_timeout(self.job_timeout);

      let report = match scheduler.run().await {
        Ok(report) => report,
        Err(e) => {
          error!(%revision, error = %e, "Revision pass failed, aborting run");
          self.pool.shutdown().await;
          return Err(EngineError::Pass {
            revision: revision.clone(),
            source: e,
          });
        }
      };

      summary.files_analysed += report.len();
      summary.file_failures += report.failure_count();

      match self.sink.persist(&report).await {
        Ok(path) => info!(%revision, files = report.len(), path = %path.display(), "Report written"),
        Err(e) => {
          warn!(%revision, error = %e, "Failed to persist report, continuing");
          summary.persist_failures.push((revision.clone(), e.to_string()));
        }
      }

      summary.revisions_processed += 1;
    }

    self.pool.shutdown().await;
    info!(
      revisions = summary.revisions_processed,
      files = summary.files_analysed,
      "Run complete"
    );
    Ok(summary)
  }
}
