//! Job dispatch: one request/response exchange with a worker.
//!
//! The scheduler talks to workers through this trait so its properties can be
//! tested without processes or sockets. `TcpRunner` is the real thing: a
//! loopback TCP connection per job carrying newline-delimited JSON.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use ipc::{JobRequest, JobResponse};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::trace;

/// Transport-level dispatch failure. These mean the *worker* is in trouble
/// (unreachable, crashed mid-job, protocol garbage), as opposed to a
/// well-formed failure response about the content, and they fail the
/// revision pass rather than a single file.
#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("failed to connect to worker at {endpoint}: {source}")]
  Connect {
    endpoint: String,
    #[source]
    source: std::io::Error,
  },

  #[error("worker at {0} closed the connection before responding")]
  ConnectionClosed(String),

  #[error("transport error talking to {endpoint}: {message}")]
  Transport { endpoint: String, message: String },

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait JobRunner: Send + Sync {
  async fn run_job(&self, endpoint: &str, request: JobRequest) -> Result<JobResponse, RunnerError>;
}

/// Connect-per-job TCP dispatch, mirroring the worker's one-job-at-a-time
/// contract.
#[derive(Debug, Default, Clone)]
pub struct TcpRunner;

#[async_trait]
impl JobRunner for TcpRunner {
  async fn run_job(&self, endpoint: &str, request: JobRequest) -> Result<JobResponse, RunnerError> {
    let stream = TcpStream::connect(endpoint).await.map_err(|source| RunnerError::Connect {
      endpoint: endpoint.to_string(),
      source,
    })?;
    let mut framed = Framed::new(stream, LinesCodec::new());

    let json = serde_json::to_string(&request)?;
    framed.send(json).await.map_err(|e| RunnerError::Transport {
      endpoint: endpoint.to_string(),
      message: e.to_string(),
    })?;

    let line = match framed.next().await {
      Some(Ok(line)) => line,
      Some(Err(e)) => {
        return Err(RunnerError::Transport {
          endpoint: endpoint.to_string(),
          message: e.to_string(),
        });
      }
      None => return Err(RunnerError::ConnectionClosed(endpoint.to_string())),
    };

    let response: JobResponse = serde_json::from_str(&line)?;
    if response.id != request.id {
      return Err(RunnerError::Transport {
        endpoint: endpoint.to_string(),
        message: format!("response id {} does not match request id {}", response.id, request.id),
      });
    }

    trace!(endpoint, job = request.id, success = response.is_success(), "Job completed");
    Ok(response)
  }
}
