//! Fixed-size pool of persistent analysis worker processes.
//!
//! Workers are spawned once at startup and reused across every revision pass;
//! slot busy-state is the sole admission control, capping in-flight jobs at
//! the pool size. Each worker prints its `tcp://` endpoint on stdout as a
//! startup handshake, then serves jobs until its stdin closes (the shutdown
//! signal) or it is killed after the grace period.

use std::{path::Path, process::Stdio, time::Duration};

use codehist_core::config::PoolConfig;
use thiserror::Error;
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  process::{Child, ChildStdin, ChildStdout, Command},
  time::timeout,
};
use tracing::{debug, info, warn};

pub type SlotId = usize;

#[derive(Debug, Error)]
pub enum PoolError {
  #[error("failed to spawn worker {bin}: {source}")]
  Spawn {
    bin: String,
    #[source]
    source: std::io::Error,
  },

  #[error("worker {0} did not report an endpoint")]
  Handshake(SlotId),

  #[error("worker {0} did not start within the startup timeout")]
  StartupTimeout(SlotId),

  #[error("worker binary not found; set pool.worker_bin or install codehist-worker")]
  WorkerBinary,

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// One unit of bounded concurrency, backed by a worker process.
///
/// `busy` flips true when the scheduler reserves the slot and back to false
/// only when the job running on it completes (success or failure); there is
/// no other transition.
pub struct WorkerSlot {
  pub id: SlotId,
  pub endpoint: String,
  busy: bool,
  process: Option<Child>,
  /// Held open while the worker should keep running; dropping it is the
  /// shutdown signal.
  stdin: Option<ChildStdin>,
}

pub struct WorkerPool {
  slots: Vec<WorkerSlot>,
  grace: Duration,
}

impl WorkerPool {
  /// Spawn `config.effective_size()` worker processes analysing blobs from
  /// `repo`, waiting for each to report its endpoint.
  pub async fn spawn(config: &PoolConfig, repo: &Path) -> Result<Self, PoolError> {
    let bin = match &config.worker_bin {
      Some(path) => path.clone(),
      None => default_worker_binary()?,
    };
    let size = config.effective_size();
    let startup = Duration::from_secs(config.startup_timeout_secs);
    let mut slots = Vec::with_capacity(size);

    for id in 0..size {
      let mut child = Command::new(&bin)
        .arg("--repo")
        .arg(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PoolError::Spawn {
          bin: bin.display().to_string(),
          source,
        })?;

      let stdout = child.stdout.take().ok_or(PoolError::Handshake(id))?;
      let stdin = child.stdin.take();
      let endpoint = match timeout(startup, read_endpoint(stdout)).await {
        Ok(Ok(endpoint)) => endpoint,
        Ok(Err(_)) => return Err(PoolError::Handshake(id)),
        Err(_) => return Err(PoolError::StartupTimeout(id)),
      };

      debug!(worker = id, %endpoint, "Worker ready");
      slots.push(WorkerSlot {
        id,
        endpoint,
        busy: false,
        process: Some(child),
        stdin,
      });
    }

    info!(size, "Worker pool started");
    Ok(Self {
      slots,
      grace: Duration::from_secs(config.shutdown_grace_secs),
    })
  }

  /// Build a pool over externally managed endpoints (tests, remote workers).
  /// No processes are owned; `shutdown` only marks the pool closed.
  pub fn for_endpoints(endpoints: Vec<String>) -> Self {
    let slots = endpoints
      .into_iter()
      .enumerate()
      .map(|(id, endpoint)| WorkerSlot {
        id,
        endpoint,
        busy: false,
        process: None,
        stdin: None,
      })
      .collect();
    Self {
      slots,
      grace: Duration::from_secs(1),
    }
  }

  pub fn size(&self) -> usize {
    self.slots.len()
  }

  pub fn busy_count(&self) -> usize {
    self.slots.iter().filter(|s| s.busy).count()
  }

  pub fn endpoint(&self, id: SlotId) -> &str {
    &self.slots[id].endpoint
  }

  /// Reserve an idle slot, marking it busy. Non-blocking: returns `None`
  /// when the pool is saturated and the caller must wait for a completion.
  pub fn reserve_free(&mut self) -> Option<SlotId> {
    let slot = self.slots.iter_mut().find(|s| !s.busy)?;
    slot.busy = true;
    Some(slot.id)
  }

  /// Reserve a specific slot the caller knows just freed up.
  pub fn reserve(&mut self, id: SlotId) {
    debug_assert!(!self.slots[id].busy, "reserving a busy slot");
    self.slots[id].busy = true;
  }

  /// Release a slot after its job completed. Called exactly once per
  /// completion, on success and failure alike: a leaked slot would
  /// permanently shrink the pool.
  pub fn release(&mut self, id: SlotId) {
    debug_assert!(self.slots[id].busy, "releasing an idle slot");
    self.slots[id].busy = false;
  }

  /// Terminate every worker: close its stdin (the polite signal), wait out
  /// the grace period, then kill whatever is still running. Idempotent.
  pub async fn shutdown(&mut self) {
    for slot in &mut self.slots {
      drop(slot.stdin.take());
    }

    for slot in &mut self.slots {
      let Some(mut child) = slot.process.take() else {
        continue;
      };
      match timeout(self.grace, child.wait()).await {
        Ok(Ok(status)) => debug!(worker = slot.id, %status, "Worker exited"),
        Ok(Err(e)) => warn!(worker = slot.id, error = %e, "Failed to wait for worker"),
        Err(_) => {
          warn!(worker = slot.id, "Worker ignored shutdown, killing");
          if let Err(e) = child.kill().await {
            warn!(worker = slot.id, error = %e, "Failed to kill worker");
          }
        }
      }
    }
  }
}

/// Resolve the worker binary as a sibling of the current executable.
fn default_worker_binary() -> Result<std::path::PathBuf, PoolError> {
  let exe = std::env::current_exe().map_err(|_| PoolError::WorkerBinary)?;
  let candidate = exe.with_file_name("codehist-worker");
  if candidate.is_file() {
    Ok(candidate)
  } else {
    Err(PoolError::WorkerBinary)
  }
}

/// Read the handshake line from a freshly spawned worker's stdout, tolerating
/// any noise before it.
async fn read_endpoint(stdout: ChildStdout) -> Result<String, std::io::Error> {
  let mut lines = BufReader::new(stdout).lines();
  while let Some(line) = lines.next_line().await? {
    if let Some(addr) = line.trim().strip_prefix("tcp://") {
      return Ok(addr.to_string());
    }
  }
  Err(std::io::Error::new(
    std::io::ErrorKind::UnexpectedEof,
    "worker stdout closed before handshake",
  ))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn test_pool(n: usize) -> WorkerPool {
    WorkerPool::for_endpoints((0..n).map(|i| format!("127.0.0.1:{}", 9000 + i)).collect())
  }

  #[test]
  fn reserve_free_caps_at_pool_size() {
    let mut pool = test_pool(2);
    let a = pool.reserve_free().unwrap();
    let b = pool.reserve_free().unwrap();
    assert_ne!(a, b);
    assert_eq!(pool.reserve_free(), None);
    assert_eq!(pool.busy_count(), 2);
  }

  #[test]
  fn release_makes_slot_reservable_again() {
    let mut pool = test_pool(1);
    let slot = pool.reserve_free().unwrap();
    assert_eq!(pool.reserve_free(), None);
    pool.release(slot);
    assert_eq!(pool.reserve_free(), Some(slot));
  }

  #[test]
  fn reserve_specific_slot() {
    let mut pool = test_pool(3);
    pool.reserve(1);
    assert_eq!(pool.busy_count(), 1);
    // reserve_free skips the busy slot.
    let next = pool.reserve_free().unwrap();
    assert_ne!(next, 1);
  }

  #[tokio::test]
  async fn shutdown_without_processes_is_a_no_op() {
    let mut pool = test_pool(2);
    pool.shutdown().await;
    pool.shutdown().await;
    assert_eq!(pool.size(), 2);
  }
}
