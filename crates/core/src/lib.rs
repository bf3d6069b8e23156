//! Shared types for codehist: content identity, analysis facts, per-revision
//! reports, the analyzer capability, and configuration.

pub mod analyzer;
pub mod config;
pub mod facts;

pub use analyzer::{AnalysisError, Analyzer, LexicalAnalyzer};
pub use config::Config;
pub use facts::{AliasFact, ContentId, Facts, FileFacts, FileJob, RevisionReport};
