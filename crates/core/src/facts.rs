//! Content identity and analysis output types.
//!
//! A `ContentId` names a blob of file content independent of path or revision:
//! identical bytes always carry the same id. Everything downstream (the blob
//! cache, in-flight dedup, the wire protocol) keys on it.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Content identity
// ============================================================================

/// Stable identifier for a blob of file content.
///
/// For git-backed stores this is the blob object id; the in-memory store
/// derives ids by hashing the bytes. The engine never inspects the value, it
/// only compares and forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  /// Derive an id from raw content bytes.
  pub fn of_bytes(bytes: &[u8]) -> Self {
    let digest = Sha256::digest(bytes);
    Self(hex::encode(digest))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ContentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ContentId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

// ============================================================================
// Jobs and facts
// ============================================================================

/// One file to analyse: a path at some revision plus the id of its content.
///
/// Produced by enumerating a revision's file list, consumed exactly once by
/// the scheduler, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileJob {
  pub path: String,
  pub content_id: ContentId,
}

impl FileJob {
  pub fn new(path: impl Into<String>, content_id: ContentId) -> Self {
    Self {
      path: path.into(),
      content_id,
    }
  }
}

/// A dynamic alias declaration found in content: `alias` becomes another name
/// for `original`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasFact {
  pub original: String,
  pub alias: String,
}

/// Structural facts extracted from one content blob.
///
/// Pure function of the content: the same `ContentId` always yields the same
/// `Facts`, which is what makes blob-level memoization sound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facts {
  /// Fully qualified names of declared symbols (classes, interfaces, ...).
  pub symbols: Vec<String>,
  /// Dynamic alias calls with statically known arguments.
  pub aliases: Vec<AliasFact>,
}

impl Facts {
  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty() && self.aliases.is_empty()
  }
}

// ============================================================================
// Per-revision report
// ============================================================================

/// Outcome of analysing one path within a revision.
///
/// Per-file failures (unparseable content, unfetchable blob) are recorded here
/// rather than aborting the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum FileFacts {
  Analysed { facts: Facts },
  Failed { error: String },
}

impl FileFacts {
  pub fn facts(&self) -> Option<&Facts> {
    match self {
      FileFacts::Analysed { facts } => Some(facts),
      FileFacts::Failed { .. } => None,
    }
  }
}

/// The complete analysis output for one revision: one entry per enumerated
/// path. Built incrementally during a scheduler pass, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionReport {
  pub revision: String,
  /// BTreeMap so serialized artifacts are stable across runs.
  pub files: BTreeMap<String, FileFacts>,
}

impl RevisionReport {
  pub fn new(revision: impl Into<String>) -> Self {
    Self {
      revision: revision.into(),
      files: BTreeMap::new(),
    }
  }

  pub fn record(&mut self, path: impl Into<String>, outcome: FileFacts) {
    self.files.insert(path.into(), outcome);
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  /// Number of paths whose analysis failed.
  pub fn failure_count(&self) -> usize {
    self
      .files
      .values()
      .filter(|f| matches!(f, FileFacts::Failed { .. }))
      .count()
  }
}
