//! The per-revision job scheduler.
//!
//! One cooperative pass over a revision's file list:
//!
//! ```text
//! Enumerating → (Dispatching ⇄ Suspended) → Draining → Done
//! ```
//!
//! For each enumerated file the scheduler resolves from the blob cache when it
//! can (the dominant path given how much content revisions share), and
//! otherwise reserves a worker slot and dispatches. When the pool is saturated
//! it suspends: enumeration stops advancing until some in-flight job completes
//! over the completion channel, and the completion names the slot that just
//! freed, which is immediately reserved for the pending entry. After the list
//! is exhausted the scheduler drains: the pass is complete only once every
//! outstanding job has reported back.
//!
//! All report and cache writes, slot bookkeeping and in-flight accounting
//! happen on this single logical task; dispatched jobs only ever send one
//! completion message, so no locks are needed anywhere in the pass.

use std::{collections::HashMap, sync::Arc, time::Duration};

use codehist_core::{ContentId, Facts, FileFacts, RevisionReport};
use ipc::{JobRequest, WireErrorKind};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
  cache::BlobCache,
  pool::{SlotId, WorkerPool},
  runner::JobRunner,
  store::{ContentStore, StoreError},
};

/// A failure that aborts the whole revision pass, as opposed to the per-file
/// failures recorded inside the report.
#[derive(Debug, Error)]
pub enum PassError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("worker on slot {slot} failed while analysing {content_id}: {reason}")]
  Worker {
    slot: SlotId,
    content_id: ContentId,
    reason: String,
  },

  #[error("pool has no worker slots to dispatch to")]
  NoWorkers,

  #[error("completion channel closed with jobs outstanding")]
  CompletionChannelClosed,
}

/// What a dispatched job reported back.
enum JobOutcome {
  /// Analysis succeeded; facts fan out to every path sharing the blob.
  Facts(Facts),
  /// The content itself could not be analysed or fetched. Recorded per path,
  /// never aborts the pass.
  ContentFailed(String),
  /// The worker is in trouble (connect failure, crash mid-job, timeout).
  /// Silently losing the job would corrupt the report's completeness, so
  /// this fails the pass.
  WorkerFailed(String),
}

struct JobDone {
  slot: SlotId,
  content_id: ContentId,
  outcome: JobOutcome,
}

pub struct JobScheduler<'a> {
  revision: String,
  store: Arc<dyn ContentStore>,
  cache: &'a BlobCache,
  pool: &'a mut WorkerPool,
  runner: Arc<dyn JobRunner>,
  /// Per-job timeout; zero disables it.
  job_timeout: Duration,
  next_job_id: u64,
}

impl<'a> JobScheduler<'a> {
  pub fn new(
    revision: impl Into<String>,
    store: Arc<dyn ContentStore>,
    cache: &'a BlobCache,
    pool: &'a mut WorkerPool,
    runner: Arc<dyn JobRunner>,
  ) -> Self {
    Self {
      revision: revision.into(),
      store,
      cache,
      pool,
      runner,
      job_timeout: Duration::ZERO,
      next_job_id: 0,
    }
  }

  pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
    self.job_timeout = timeout;
    self
  }

  /// Run one full pass. On success the report holds exactly one entry per
  /// enumerated path, regardless of completion order.
  pub async fn run(mut self) -> Result<RevisionReport, PassError> {
    let jobs = self.store.list_files(&self.revision).await?;
    let mut report = RevisionReport::new(&self.revision);
    debug!(revision = %self.revision, files = jobs.len(), "Starting scheduler pass");

    // Completions flow back here; capacity of pool size means a completion
    // send never blocks a finished job.
    let (done_tx, mut done_rx) = mpsc::channel::<JobDone>(self.pool.size().max(1));

    // Content ids currently in flight, with every path waiting on each.
    // Checked before the cache so a duplicate id within one revision costs
    // one dispatch, not two.
    let mut pending: HashMap<ContentId, Vec<String>> = HashMap::new();
    let mut in_flight = 0usize;
    let mut fatal: Option<PassError> = None;

    for job in jobs {
      if fatal.is_some() {
        break;
      }

      if let Some(paths) = pending.get_mut(&job.content_id) {
        trace!(path = %job.path, "Duplicate content id in flight, fanning out");
        paths.push(job.path);
        continue;
      }

      if let Some(facts) = self.cache.get(&job.content_id).await {
        trace!(path = %job.path, "Cache hit");
        report.record(job.path, FileFacts::Analysed { facts });
        continue;
      }

      let slot = match self.pool.reserve_free() {
        Some(slot) => slot,
        None => {
          // A pool with zero slots can never free one; waiting would hang
          // forever. Only reachable with an externally built empty pool.
          if in_flight == 0 {
            return Err(PassError::NoWorkers);
          }
          // Suspended: the pool is saturated, so enumeration cannot advance.
          // The next completion frees exactly one slot, which the resumed
          // pass claims for the pending entry.
          let done = recv_done(&mut done_rx).await?;
          let freed = self.complete(done, &mut report, &mut pending, &mut in_flight, &mut fatal).await;
          if fatal.is_some() {
            break;
          }
          self.pool.reserve(freed);
          freed
        }
      };

      pending.insert(job.content_id.clone(), vec![job.path]);
      in_flight += 1;
      self.dispatch(slot, job.content_id, done_tx.clone());
    }

    // Draining: enumeration is exhausted (or aborted), but the pass is only
    // done once every dispatched job has completed and released its slot.
    while in_flight > 0 {
      let done = recv_done(&mut done_rx).await?;
      self.complete(done, &mut report, &mut pending, &mut in_flight, &mut fatal).await;
    }

    if let Some(err) = fatal {
      return Err(err);
    }

    debug!(
      revision = %self.revision,
      files = report.len(),
      failures = report.failure_count(),
      "Scheduler pass complete"
    );
    Ok(report)
  }

  /// Handle one completion: release the slot, fan the outcome out to every
  /// path waiting on the content id, and memoize successes. Returns the
  /// freed slot id so a suspended pass can reclaim it.
  async fn complete(
    &mut self,
    done: JobDone,
    report: &mut RevisionReport,
    pending: &mut HashMap<ContentId, Vec<String>>,
    in_flight: &mut usize,
    fatal: &mut Option<PassError>,
  ) -> SlotId {
    *in_flight -= 1;
    self.pool.release(done.slot);
    let paths = pending.remove(&done.content_id).unwrap_or_default();

    match done.outcome {
      JobOutcome::Facts(facts) => {
        if let Err(e) = self.cache.put(&done.content_id, &facts).await {
          // The result still lands in the report; only memoization is lost.
          warn!(content_id = %done.content_id, error = %e, "Failed to write cache entry");
        }
        for path in paths {
          report.record(path, FileFacts::Analysed { facts: facts.clone() });
        }
      }
      JobOutcome::ContentFailed(error) => {
        debug!(content_id = %done.content_id, %error, "Content failed analysis");
        for path in paths {
          report.record(path, FileFacts::Failed { error: error.clone() });
        }
      }
      JobOutcome::WorkerFailed(reason) => {
        if fatal.is_none() {
          *fatal = Some(PassError::Worker {
            slot: done.slot,
            content_id: done.content_id.clone(),
            reason,
          });
        }
      }
    }

    done.slot
  }

  /// Dispatch one job to the reserved slot. The spawned task does nothing but
  /// the remote exchange and a single completion send; every state change
  /// happens back on the scheduler task.
  fn dispatch(&mut self, slot: SlotId, content_id: ContentId, done_tx: mpsc::Sender<JobDone>) {
    self.next_job_id += 1;
    let request = JobRequest {
      id: self.next_job_id,
      content_id: content_id.clone(),
    };
    let endpoint = self.pool.endpoint(slot).to_string();
    let runner = Arc::clone(&self.runner);
    let timeout = self.job_timeout;

    trace!(job = request.id, %content_id, slot, "Dispatching");
    tokio::spawn(async move {
      let outcome = run_one(runner.as_ref(), &endpoint, request, timeout).await;
      // The receiver only drops once in_flight reaches zero, so this send
      // cannot fail while the job is outstanding.
      let _ = done_tx.send(JobDone {
        slot,
        content_id,
        outcome,
      })
      .await;
    });
  }
}

async fn recv_done(rx: &mut mpsc::Receiver<JobDone>) -> Result<JobDone, PassError> {
  rx.recv().await.ok_or(PassError::CompletionChannelClosed)
}

async fn run_one(runner: &dyn JobRunner, endpoint: &str, request: JobRequest, timeout: Duration) -> JobOutcome {
  let result = if timeout.is_zero() {
    runner.run_job(endpoint, request).await
  } else {
    match tokio::time::timeout(timeout, runner.run_job(endpoint, request)).await {
      Ok(result) => result,
      Err(_) => return JobOutcome::WorkerFailed(format!("job timed out after {timeout:?}")),
    }
  };

  match result {
    Ok(response) => match (response.facts, response.error) {
      (Some(facts), _) => JobOutcome::Facts(facts),
      (None, Some(error)) => match error.kind {
        WireErrorKind::Analysis | WireErrorKind::ContentFetch => JobOutcome::ContentFailed(error.message),
        // A malformed-request response means the protocol itself broke.
        WireErrorKind::Malformed => JobOutcome::WorkerFailed(error.message),
      },
      (None, None) => JobOutcome::WorkerFailed("empty response".to_string()),
    },
    Err(e) => JobOutcome::WorkerFailed(e.to_string()),
  }
}
