//! Shared fixtures: an in-memory content store builder and a stub job runner
//! that records dispatch counts and concurrency instead of talking to real
//! worker processes.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
  time::Duration,
};

use async_trait::async_trait;
use codehist_core::{ContentId, Facts, FileJob};
use engine::{InMemoryStore, JobRunner, RunnerError};
use ipc::{JobRequest, JobResponse, WireErrorKind};

/// How the stub worker behaves for one content id.
#[derive(Clone)]
pub enum Behavior {
  /// Respond with these facts.
  Facts(Facts),
  /// Respond with a structured analysis failure.
  AnalysisError(String),
  /// Simulate a worker crash: fail at the transport level.
  Crash,
  /// Never respond, to exercise the job timeout.
  Hang,
}

#[derive(Default)]
pub struct StubState {
  pub dispatches: usize,
  pub current: usize,
  pub peak: usize,
  pub per_id: HashMap<ContentId, usize>,
}

pub struct StubRunner {
  behaviors: HashMap<ContentId, Behavior>,
  delay: Duration,
  pub state: Mutex<StubState>,
}

impl StubRunner {
  pub fn new(behaviors: HashMap<ContentId, Behavior>, delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      behaviors,
      delay,
      state: Mutex::new(StubState::default()),
    })
  }

  pub fn dispatches(&self) -> usize {
    self.state.lock().unwrap().dispatches
  }

  pub fn peak_concurrency(&self) -> usize {
    self.state.lock().unwrap().peak
  }

  pub fn dispatches_for(&self, id: &ContentId) -> usize {
    self.state.lock().unwrap().per_id.get(id).copied().unwrap_or(0)
  }
}

#[async_trait]
impl JobRunner for StubRunner {
  async fn run_job(&self, endpoint: &str, request: JobRequest) -> Result<JobResponse, RunnerError> {
    {
      let mut state = self.state.lock().unwrap();
      state.dispatches += 1;
      state.current += 1;
      state.peak = state.peak.max(state.current);
      *state.per_id.entry(request.content_id.clone()).or_insert(0) += 1;
    }

    tokio::time::sleep(self.delay).await;
    let behavior = self.behaviors.get(&request.content_id).cloned();

    if matches!(behavior, Some(Behavior::Hang)) {
      futures::future::pending::<()>().await;
    }
    self.state.lock().unwrap().current -= 1;

    match behavior {
      Some(Behavior::Facts(facts)) => Ok(JobResponse::success(request.id, facts)),
      Some(Behavior::AnalysisError(message)) => Ok(JobResponse::failure(request.id, WireErrorKind::Analysis, message)),
      Some(Behavior::Crash) => Err(RunnerError::ConnectionClosed(endpoint.to_string())),
      Some(Behavior::Hang) => unreachable!(),
      None => Ok(JobResponse::failure(
        request.id,
        WireErrorKind::ContentFetch,
        "unknown blob",
      )),
    }
  }
}

/// Facts with a single recognizable symbol.
pub fn facts(symbol: &str) -> Facts {
  Facts {
    symbols: vec![symbol.to_string()],
    aliases: Vec::new(),
  }
}

/// Builder for a store plus matching stub behaviors.
#[derive(Default)]
pub struct Fixture {
  pub store: InMemoryStore,
  pub behaviors: HashMap<ContentId, Behavior>,
}

impl Fixture {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a blob whose stub analysis yields `facts(symbol)`.
  pub fn blob(&mut self, content: &str, symbol: &str) -> ContentId {
    let id = self.store.add_blob(content);
    self.behaviors.insert(id.clone(), Behavior::Facts(facts(symbol)));
    id
  }

  pub fn blob_with(&mut self, content: &str, behavior: Behavior) -> ContentId {
    let id = self.store.add_blob(content);
    self.behaviors.insert(id.clone(), behavior);
    id
  }

  pub fn revision(&mut self, name: &str, files: &[(&str, &ContentId)]) {
    let jobs = files
      .iter()
      .map(|(path, id)| FileJob::new(*path, (*id).clone()))
      .collect();
    self.store.add_revision(name, jobs);
  }
}
