//! codehist-worker: one persistent analysis worker process.
//!
//! Spawned by the pool, never run by hand. Prints its `tcp://` endpoint on
//! stdout once listening, serves analysis jobs until its stdin closes (the
//! parent's shutdown signal), then exits.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use codehist_core::{Config, LexicalAnalyzer};
use engine::{FileFilter, GitStore, WorkerServer};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod logging;

#[derive(Parser)]
#[command(name = "codehist-worker")]
struct WorkerArgs {
  /// Path to the git clone to fetch blob content from
  #[arg(long)]
  repo: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = WorkerArgs::parse();
  let config = Config::load_for_project(&args.repo);
  logging::init_worker_logging(&config.log.level);

  // The worker only fetches blobs by id; enumeration (and filtering) is the
  // scheduler's business.
  let store = Arc::new(GitStore::open(&args.repo, FileFilter::default())?);
  let analyzer = Arc::new(LexicalAnalyzer);

  let cancel = CancellationToken::new();
  let stdin_cancel = cancel.clone();
  tokio::spawn(async move {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 64];
    loop {
      match stdin.read(&mut buf).await {
        Ok(0) | Err(_) => break,
        Ok(_) => {} // nothing meaningful arrives on stdin; wait for EOF
      }
    }
    debug!("stdin closed, shutting down");
    stdin_cancel.cancel();
  });

  WorkerServer::new(store, analyzer).run(cancel).await?;
  Ok(())
}
