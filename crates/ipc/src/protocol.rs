use codehist_core::{ContentId, Facts};
use serde::{Deserialize, Serialize};

/// One job: analyse the blob named by `content_id`.
///
/// The `id` correlates the response on a connection that serves several
/// sequential jobs; it is never reused while a job is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
  pub id: u64,
  pub content_id: ContentId,
}

/// Result of one job: either extracted facts or a structured failure.
///
/// A failure response means the *content* could not be analysed (unparseable
/// source, unfetchable blob); the worker itself stays healthy and keeps
/// serving. Transport-level trouble is signalled by the connection, not by
/// this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
  pub id: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub facts: Option<Facts>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<WireError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
  pub kind: WireErrorKind,
  pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
  /// The analyzer rejected the content.
  Analysis,
  /// The worker could not fetch the blob from the content store.
  ContentFetch,
  /// The request could not be understood.
  Malformed,
}

impl JobResponse {
  pub fn success(id: u64, facts: Facts) -> Self {
    Self {
      id,
      facts: Some(facts),
      error: None,
    }
  }

  pub fn failure(id: u64, kind: WireErrorKind, message: impl Into<String>) -> Self {
    Self {
      id,
      facts: None,
      error: Some(WireError {
        kind,
        message: message.into(),
      }),
    }
  }

  pub fn is_success(&self) -> bool {
    self.facts.is_some()
  }
}
