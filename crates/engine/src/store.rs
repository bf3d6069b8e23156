//! Content stores: enumerate the files of a revision and fetch blob content.
//!
//! A store yields `(path, content id)` pairs for a revision and resolves a
//! content id to raw bytes. Ids are stable across revisions (identical bytes
//! always produce the same id), which is the property the whole caching layer
//! rests on. `GitStore` backs onto a git clone (blob object ids are the
//! content ids); `InMemoryStore` backs onto fixtures.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use codehist_core::{ContentId, FileJob, config::FilterConfig};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("not a git clone: {0}")]
  NotAClone(PathBuf),

  #[error("git {command} failed: {stderr}")]
  Git { command: String, stderr: String },

  #[error("unknown revision: {0}")]
  UnknownRevision(String),

  #[error("unknown content id: {0}")]
  UnknownContent(ContentId),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Read access to versioned file content.
///
/// Both sides of the wire consume this: the scheduler enumerates file lists,
/// the worker fetches blob bytes. Implementations apply the caller's file
/// filter during enumeration so ignored trees never reach the scheduler.
#[async_trait]
pub trait ContentStore: Send + Sync {
  async fn list_files(&self, revision: &str) -> Result<Vec<FileJob>, StoreError>;
  async fn fetch_content(&self, id: &ContentId) -> Result<Vec<u8>, StoreError>;
}

// ============================================================================
// File filtering
// ============================================================================

/// Caller-owned enumeration filter: extension allowlist plus excluded path
/// substrings (vendored trees, generated data).
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
  suffixes: Vec<String>,
  exclude: Vec<String>,
}

impl FileFilter {
  pub fn from_config(config: &FilterConfig) -> Self {
    Self {
      suffixes: config.extensions.iter().map(|ext| format!(".{ext}")).collect(),
      exclude: config.exclude.clone(),
    }
  }

  pub fn matches(&self, path: &str) -> bool {
    if !self.suffixes.is_empty() && !self.suffixes.iter().any(|s| path.ends_with(s.as_str())) {
      return false;
    }
    !self.exclude.iter().any(|fragment| path.contains(fragment.as_str()))
  }
}

// ============================================================================
// Git-backed store
// ============================================================================

/// Content store over a git clone (standard or bare).
///
/// Enumeration is `git ls-tree -r`, content is `git cat-file blob`, so the
/// working tree is never touched and bare clones work the same as full ones.
pub struct GitStore {
  repo: PathBuf,
  filter: FileFilter,
}

impl GitStore {
  /// Open a git clone, validating that the path actually is one.
  pub fn open(repo: impl Into<PathBuf>, filter: FileFilter) -> Result<Self, StoreError> {
    let repo = repo.into();
    if !is_clone(&repo) {
      return Err(StoreError::NotAClone(repo));
    }
    Ok(Self { repo, filter })
  }

  pub fn repo(&self) -> &Path {
    &self.repo
  }

  /// List tags, oldest first by version, optionally restricted to stable
  /// releases at or above `from`. Version ordering comes from git itself
  /// (`--sort=v:refname`), which also makes sequential passes walk history
  /// in order.
  pub async fn tags(&self, from: Option<&str>, stable_only: bool) -> Result<Vec<String>, StoreError> {
    let output = run_git(&self.repo, &["tag", "-l", "--sort=v:refname"]).await?;
    let floor = from.map(version_key);
    let tags = String::from_utf8_lossy(&output)
      .lines()
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .filter(|t| !stable_only || is_stable_tag(t))
      .filter(|t| match &floor {
        Some(floor) => version_key(t) >= *floor,
        None => true,
      })
      .map(String::from)
      .collect();
    Ok(tags)
  }
}

#[async_trait]
impl ContentStore for GitStore {
  async fn list_files(&self, revision: &str) -> Result<Vec<FileJob>, StoreError> {
    let output = run_git(&self.repo, &["ls-tree", "-r", "-z", revision]).await.map_err(|e| match e {
      StoreError::Git { stderr, .. } if stderr.contains("Not a valid object name") => {
        StoreError::UnknownRevision(revision.to_string())
      }
      other => other,
    })?;

    let text = String::from_utf8_lossy(&output);
    let jobs: Vec<FileJob> = text
      .split('\0')
      .filter_map(parse_ls_tree_entry)
      .filter(|job| self.filter.matches(&job.path))
      .collect();

    debug!(revision, files = jobs.len(), "Enumerated revision");
    Ok(jobs)
  }

  async fn fetch_content(&self, id: &ContentId) -> Result<Vec<u8>, StoreError> {
    run_git(&self.repo, &["cat-file", "blob", id.as_str()])
      .await
      .map_err(|e| match e {
        StoreError::Git { .. } => StoreError::UnknownContent(id.clone()),
        other => other,
      })
  }
}

fn is_clone(path: &Path) -> bool {
  // Standard clone has .git; a bare clone is the git dir itself.
  path.join(".git").is_dir() || (path.join("HEAD").is_file() && path.join("objects").is_dir())
}

async fn run_git(repo: &Path, args: &[&str]) -> Result<Vec<u8>, StoreError> {
  let output = Command::new("git").arg("-C").arg(repo).args(args).output().await?;
  if !output.status.success() {
    return Err(StoreError::Git {
      command: args.join(" "),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }
  Ok(output.stdout)
}

/// Parse one `ls-tree -z` entry: `<mode> <type> <oid>\t<path>`. Non-blob
/// entries (submodules, trees) yield nothing.
fn parse_ls_tree_entry(entry: &str) -> Option<FileJob> {
  let (meta, path) = entry.split_once('\t')?;
  let mut fields = meta.split(' ');
  let _mode = fields.next()?;
  let kind = fields.next()?;
  let oid = fields.next()?;
  if kind != "blob" {
    return None;
  }
  Some(FileJob::new(path, ContentId::new(oid)))
}

/// Numeric components of a version tag, for ordering and floor comparison.
/// `v4.1.2` → `[4, 1, 2]`.
fn version_key(tag: &str) -> Vec<u64> {
  tag
    .trim_start_matches(|c: char| !c.is_ascii_digit())
    .split(|c: char| !c.is_ascii_digit())
    .filter(|part| !part.is_empty())
    .filter_map(|part| part.parse().ok())
    .collect()
}

/// A stable tag carries no pre-release suffix (`-rc1`, `-beta`, ...).
fn is_stable_tag(tag: &str) -> bool {
  let lower = tag.to_lowercase();
  !["rc", "beta", "alpha", "dev"].iter().any(|marker| lower.contains(marker))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Fixture-backed store for tests and embedding: revisions and blobs are
/// registered up front, content ids are content hashes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
  revisions: HashMap<String, Vec<FileJob>>,
  blobs: HashMap<ContentId, Vec<u8>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register blob content, returning its id.
  pub fn add_blob(&mut self, bytes: impl Into<Vec<u8>>) -> ContentId {
    let bytes = bytes.into();
    let id = ContentId::of_bytes(&bytes);
    self.blobs.insert(id.clone(), bytes);
    id
  }

  pub fn add_revision(&mut self, revision: impl Into<String>, files: Vec<FileJob>) {
    self.revisions.insert(revision.into(), files);
  }
}

#[async_trait]
impl ContentStore for InMemoryStore {
  async fn list_files(&self, revision: &str) -> Result<Vec<FileJob>, StoreError> {
    self
      .revisions
      .get(revision)
      .cloned()
      .ok_or_else(|| StoreError::UnknownRevision(revision.to_string()))
  }

  async fn fetch_content(&self, id: &ContentId) -> Result<Vec<u8>, StoreError> {
    self
      .blobs
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::UnknownContent(id.clone()))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn filter_applies_extensions_and_excludes() {
    let filter = FileFilter::from_config(&FilterConfig {
      extensions: vec!["php".into()],
      exclude: vec!["lib/aws-sdk/src/data".into()],
    });
    assert!(filter.matches("lib/moodlelib.php"));
    assert!(!filter.matches("lib/moodlelib.js"));
    assert!(!filter.matches("lib/aws-sdk/src/data/manifest.json.php"));
  }

  #[test]
  fn empty_filter_matches_everything() {
    let filter = FileFilter::default();
    assert!(filter.matches("anything/at/all.txt"));
  }

  #[test]
  fn parses_blob_entries_only() {
    let blob = parse_ls_tree_entry("100644 blob a1b2c3\tlib/weblib.php").unwrap();
    assert_eq!(blob.path, "lib/weblib.php");
    assert_eq!(blob.content_id, ContentId::new("a1b2c3"));

    assert!(parse_ls_tree_entry("160000 commit deadbeef\tvendored").is_none());
    assert!(parse_ls_tree_entry("").is_none());
  }

  #[test]
  fn version_keys_order_tags() {
    assert!(version_key("v4.1.2") > version_key("v4.1.1"));
    assert!(version_key("v4.10.0") > version_key("v4.9.9"));
    assert!(version_key("v3.9.0") >= version_key("v3.9"));
    assert_eq!(version_key("v4.1.2"), vec![4, 1, 2]);
  }

  #[test]
  fn stable_tags_exclude_prereleases() {
    assert!(is_stable_tag("v4.1.2"));
    assert!(!is_stable_tag("v4.2.0-rc1"));
    assert!(!is_stable_tag("v4.2.0-beta"));
    assert!(!is_stable_tag("v4.2.0-dev"));
  }

  #[tokio::test]
  async fn in_memory_store_round_trips() {
    let mut store = InMemoryStore::new();
    let id = store.add_blob("<?php class a {}");
    store.add_revision("v1", vec![FileJob::new("a.php", id.clone())]);

    let files = store.list_files("v1").await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].content_id, id);
    assert_eq!(store.fetch_content(&id).await.unwrap(), b"<?php class a {}");

    assert!(matches!(
      store.list_files("v2").await,
      Err(StoreError::UnknownRevision(_))
    ));
    assert!(matches!(
      store.fetch_content(&ContentId::new("missing")).await,
      Err(StoreError::UnknownContent(_))
    ));
  }
}
