//! Persistent content-addressed cache of analysis results.
//!
//! Keyed by `ContentId`, so a blob analysed for one revision never needs a
//! worker again for any later revision that carries the same bytes. Entries
//! live on disk (sharded by id prefix, git-object style) with a moka hot
//! layer in front. Writes are idempotent: analysis is pure, so concurrent
//! writers for the same key converge on equal values and last-writer-wins
//! is safe.

use std::path::PathBuf;

use codehist_core::{ContentId, Facts};
use moka::sync::Cache;
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub struct BlobCache {
  dir: PathBuf,
  hot: Cache<ContentId, Facts>,
}

impl BlobCache {
  /// Open (creating if needed) a cache rooted at `dir`.
  pub async fn open(dir: impl Into<PathBuf>, memory_capacity: u64) -> Result<Self, CacheError> {
    let dir = dir.into();
    tokio::fs::create_dir_all(&dir).await?;
    Ok(Self {
      dir,
      hot: Cache::new(memory_capacity),
    })
  }

  /// Look up cached facts. An unreadable or undecodable entry is treated as
  /// a miss; the scheduler falls back to recomputation, which rewrites it.
  pub async fn get(&self, id: &ContentId) -> Option<Facts> {
    if let Some(facts) = self.hot.get(id) {
      return Some(facts);
    }

    let path = self.entry_path(id);
    let bytes = match tokio::fs::read(&path).await {
      Ok(b) => b,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(id = %id, error = %e, "Failed to read cache entry, treating as miss");
        return None;
      }
    };

    match serde_json::from_slice::<Facts>(&bytes) {
      Ok(facts) => {
        self.hot.insert(id.clone(), facts.clone());
        Some(facts)
      }
      Err(e) => {
        warn!(id = %id, error = %e, "Corrupt cache entry, treating as miss");
        let _ = tokio::fs::remove_file(&path).await;
        None
      }
    }
  }

  /// Store facts for a content id. Written via a temp file and rename so a
  /// crashed writer never leaves a half-written entry behind.
  pub async fn put(&self, id: &ContentId, facts: &Facts) -> Result<(), CacheError> {
    let path = self.entry_path(id);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec(facts)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;

    self.hot.insert(id.clone(), facts.clone());
    trace!(id = %id, "Cached analysis result");
    Ok(())
  }

  /// Sharded entry path: `<dir>/<first two id chars>/<rest>.json`.
  fn entry_path(&self, id: &ContentId) -> PathBuf {
    let id = id.as_str();
    let (shard, rest) = if id.len() > 2 { id.split_at(2) } else { ("_", id) };
    self.dir.join(shard).join(format!("{rest}.json"))
  }
}
