//! The codehist engine: parallel, cache-aware analysis of every file across
//! a codebase's revision history.
//!
//! Revisions share most of their content, so the engine's job is avoiding
//! redundant work: enumerate a revision, dedupe by content identity, resolve
//! what the blob cache already knows, and dispatch only the genuinely new
//! content across a fixed pool of persistent worker processes.
//!
//! ```text
//! RevisionDriver → JobScheduler ⇄ WorkerPool ⇄ worker process ⇄ Analyzer
//!                       ⇅
//!                   BlobCache
//! ```

pub mod cache;
pub mod driver;
pub mod pool;
pub mod runner;
pub mod scheduler;
pub mod server;
pub mod store;

pub use cache::{BlobCache, CacheError};
pub use driver::{EngineError, JsonReportSink, ReportSink, RevisionDriver, RunSummary, SinkError};
pub use pool::{PoolError, SlotId, WorkerPool, WorkerSlot};
pub use runner::{JobRunner, RunnerError, TcpRunner};
pub use scheduler::{JobScheduler, PassError};
pub use server::{ServerError, WorkerServer};
pub use store::{ContentStore, FileFilter, GitStore, InMemoryStore, StoreError};
