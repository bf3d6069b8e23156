//! Worker-side serve loop.
//!
//! A worker binds an ephemeral loopback port, prints `tcp://<addr>` on stdout
//! so its parent learns the endpoint, then serves one request/response
//! exchange at a time: fetch the blob named in the request, run the analyzer,
//! write back facts or a structured failure. Bad content never crashes the
//! worker: a malformed source file must not abort a whole revision pass.

use std::{io::Write, sync::Arc};

use codehist_core::Analyzer;
use futures::{SinkExt, StreamExt};
use ipc::{JobRequest, JobResponse, WireErrorKind};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
  codec::{Framed, LinesCodec},
  sync::CancellationToken,
};
use tracing::{debug, info, warn};

use crate::store::ContentStore;

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

pub struct WorkerServer {
  store: Arc<dyn ContentStore>,
  analyzer: Arc<dyn Analyzer>,
}

impl WorkerServer {
  /// Both collaborators are explicit capabilities: the server owns no global
  /// state, so several servers in one process are safe.
  pub fn new(store: Arc<dyn ContentStore>, analyzer: Arc<dyn Analyzer>) -> Self {
    Self { store, analyzer }
  }

  /// Bind, print the endpoint handshake, and serve until cancelled.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // The parent reads this exact line from stdout to learn our endpoint;
    // logging goes to stderr so the handshake stays clean.
    let mut stdout = std::io::stdout();
    writeln!(stdout, "tcp://{addr}")?;
    stdout.flush()?;

    self.serve(listener, cancel).await
  }

  /// Serve on an already-bound listener. Split out so tests can bind first
  /// and know the address without parsing stdout.
  pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
    info!(addr = %listener.local_addr()?, "Worker listening");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Worker shutting down (cancelled)");
          break;
        }

        result = listener.accept() => {
          match result {
            // One connection at a time: the worker backs a single pool slot
            // and never pipelines.
            Ok((stream, _)) => self.serve_connection(stream).await,
            Err(e) => warn!(error = %e, "Accept error"),
          }
        }
      }
    }

    Ok(())
  }

  async fn serve_connection(&self, stream: TcpStream) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    let mut served = 0u64;

    while let Some(result) = framed.next().await {
      let line = match result {
        Ok(l) => l,
        Err(e) => {
          warn!(error = %e, "Error reading from scheduler");
          break;
        }
      };

      let trimmed = line.trim();
      if trimmed.is_empty() {
        continue;
      }

      let response = match serde_json::from_str::<JobRequest>(trimmed) {
        Ok(request) => self.handle_job(request).await,
        Err(e) => JobResponse::failure(0, WireErrorKind::Malformed, format!("invalid request: {e}")),
      };

      let json = match serde_json::to_string(&response) {
        Ok(j) => j,
        Err(e) => {
          warn!(error = %e, "Failed to serialize response");
          break;
        }
      };
      if let Err(e) = framed.send(json).await {
        warn!(error = %e, "Failed to send response");
        break;
      }
      served += 1;
    }

    debug!(served, "Scheduler disconnected");
  }

  async fn handle_job(&self, request: JobRequest) -> JobResponse {
    let content = match self.store.fetch_content(&request.content_id).await {
      Ok(bytes) => bytes,
      Err(e) => return JobResponse::failure(request.id, WireErrorKind::ContentFetch, e.to_string()),
    };

    match self.analyzer.analyse(&content) {
      Ok(facts) => JobResponse::success(request.id, facts),
      Err(e) => JobResponse::failure(request.id, WireErrorKind::Analysis, e.to_string()),
    }
  }
}
